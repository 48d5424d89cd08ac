//! The MoldUDP64 pacer (C4): coalesces ITCH messages into MoldUDP64
//! packets and paces the outgoing stream by the original inter-message
//! timestamps, so a replay preserves the feed's original timing.

use std::time::Duration;

use tracing::{debug, trace};

/// 10-byte session id + 8-byte sequence number + 2-byte block count.
const HEADER_LEN: usize = 20;
/// MoldUDP64 packets are UDP datagrams; this comfortably covers the
/// largest realistic MTU-bounded packet and is the rolling scratch
/// buffer size the pacer reuses across flushes.
const SCRATCH_LEN: usize = 65_536;

/// Errors from [`Pacer::handle_message`].
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum PacerError {
    /// The message is too large to ever fit in a single MoldUDP64 block
    /// or packet at the configured MTU. Fatal for the pacer — the
    /// caller should abort rather than retry.
    #[error("message of {len} bytes exceeds the MoldUDP64 block/MTU limit")]
    OversizedMessage {
        /// The offending message length.
        len: usize,
    },
}

/// Pacer configuration. Also usable directly as the `PacerConfig`
/// ambient-config struct — see [`crate::config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PacerConfig {
    /// The 10-byte MoldUDP64 session id, space-padded if shorter.
    #[serde(with = "session_id_serde")]
    pub session_id: [u8; 10],
    /// Messages within this many microseconds of the last send are
    /// coalesced into the current packet rather than triggering a
    /// flush-and-sleep.
    pub max_delay_micros: u64,
    /// Maximum MoldUDP64 packet size, in bytes.
    pub mtu: usize,
}

impl Default for PacerConfig {
    fn default() -> Self {
        PacerConfig {
            session_id: [b' '; 10],
            max_delay_micros: 1_000,
            mtu: 1_400,
        }
    }
}

impl PacerConfig {
    /// Build a session id from a human-readable string, space-padded or
    /// truncated to 10 bytes.
    pub fn with_session_id(mut self, id: &str) -> Self {
        let mut bytes = [b' '; 10];
        let n = id.len().min(10);
        bytes[..n].copy_from_slice(&id.as_bytes()[..n]);
        self.session_id = bytes;
        self
    }

    fn max_delay(&self) -> Duration {
        Duration::from_micros(self.max_delay_micros)
    }
}

mod session_id_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &[u8; 10], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&String::from_utf8_lossy(id))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 10], D::Error> {
        let raw = String::deserialize(d)?;
        let mut bytes = [b' '; 10];
        let n = raw.len().min(10);
        bytes[..n].copy_from_slice(&raw.as_bytes()[..n]);
        Ok(bytes)
    }
}

/// Something that can sleep for a [`Duration`] — a dependency-injection
/// point so tests can run the pacing algorithm without actually
/// blocking (mirrors the `sleep_functor_type` template parameter in the
/// original `mold_udp_pacer`).
pub trait Sleeper: Send {
    /// Block the calling thread for (approximately) `duration`.
    fn sleep(&mut self, duration: Duration);
}

/// A [`Sleeper`] that actually sleeps, for production use.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealSleeper;

impl Sleeper for RealSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Paces a stream of raw ITCH-5.x message bytes into MoldUDP64 packets.
///
/// Not thread-safe — like [`crate::book::Engine`], its host daemon pins
/// it to a single thread.
pub struct Pacer {
    config: PacerConfig,
    buffer: Vec<u8>,
    packet_size: usize,
    first_block_seq: u64,
    first_block_ts: u64,
    block_count: u16,
    last_send: Option<u64>,
}

impl Pacer {
    /// Construct a pacer starting at sequence number 0.
    pub fn new(config: PacerConfig) -> Self {
        Pacer {
            config,
            buffer: vec![0u8; SCRATCH_LEN],
            packet_size: HEADER_LEN,
            first_block_seq: 0,
            first_block_ts: 0,
            block_count: 0,
            last_send: None,
        }
    }

    /// Process one raw ITCH message, timestamped by its own embedded
    /// `message_ts_ns` (nanoseconds on whatever timeline the feed uses —
    /// for ITCH-5.0, nanoseconds since midnight). `sink` receives each
    /// flushed packet's bytes; `sleeper` is invoked to pace real time
    /// when a gap wider than `max_delay` is encountered.
    ///
    /// # Errors
    /// [`PacerError::OversizedMessage`] if `payload` cannot ever fit a
    /// block or packet at the configured MTU. The pacer's state is left
    /// unmodified when this happens.
    pub fn handle_message(
        &mut self,
        message_ts_ns: u64,
        payload: &[u8],
        sink: &mut dyn FnMut(&[u8]),
        sleeper: &mut dyn Sleeper,
    ) -> Result<(), PacerError> {
        self.validate_size(payload.len())?;

        let last_send = *self.last_send.get_or_insert(message_ts_ns);
        let elapsed = message_ts_ns.saturating_sub(last_send);
        let max_delay = self.config.max_delay().as_nanos() as u64;

        if elapsed < max_delay {
            self.coalesce(message_ts_ns, payload, sink);
            return Ok(());
        }

        self.flush(message_ts_ns, sink);
        sleeper.sleep(Duration::from_nanos(elapsed));
        self.coalesce(message_ts_ns, payload, sink);
        Ok(())
    }

    /// Flush the current packet, if it holds any blocks.
    pub fn flush(&mut self, ts: u64, sink: &mut dyn FnMut(&[u8])) {
        if self.block_count == 0 {
            return;
        }
        self.flush_impl(ts, sink);
    }

    /// Send a heartbeat: flushes any pending blocks (becoming the
    /// heartbeat itself), or — if nothing is pending — a header-only,
    /// zero-block packet carrying the next expected sequence number.
    pub fn heartbeat(&mut self, sink: &mut dyn FnMut(&[u8])) {
        let ts = self.first_block_ts;
        self.flush_impl(ts, sink);
    }

    /// The sequence number the next flushed packet will carry.
    pub fn next_sequence(&self) -> u64 {
        self.first_block_seq
    }

    fn validate_size(&self, len: usize) -> Result<(), PacerError> {
        if len >= (1 << 16) || len >= self.config.mtu - HEADER_LEN - 2 {
            return Err(PacerError::OversizedMessage { len });
        }
        Ok(())
    }

    fn packet_full(&self, block_len: usize) -> bool {
        block_len + 2 + self.packet_size >= self.config.mtu || self.block_count == u16::MAX
    }

    fn coalesce(&mut self, ts: u64, payload: &[u8], sink: &mut dyn FnMut(&[u8])) {
        if self.packet_full(payload.len()) {
            self.flush(ts, sink);
        }
        if self.block_count == 0 {
            self.first_block_ts = ts;
        }
        let len = payload.len();
        let at = self.packet_size;
        self.buffer[at..at + 2].copy_from_slice(&(len as u16).to_be_bytes());
        self.buffer[at + 2..at + 2 + len].copy_from_slice(payload);
        self.packet_size += len + 2;
        self.block_count += 1;
        trace!(block_count = self.block_count, packet_size = self.packet_size, "coalesced block");
    }

    fn flush_impl(&mut self, ts: u64, sink: &mut dyn FnMut(&[u8])) {
        self.buffer[0..10].copy_from_slice(&self.config.session_id);
        self.buffer[10..18].copy_from_slice(&self.first_block_seq.to_be_bytes());
        self.buffer[18..20].copy_from_slice(&self.block_count.to_be_bytes());
        sink(&self.buffer[..self.packet_size]);
        debug!(
            sequence = self.first_block_seq,
            block_count = self.block_count,
            packet_size = self.packet_size,
            "flushed MoldUDP64 packet"
        );
        self.last_send = Some(ts);
        self.first_block_seq += u64::from(self.block_count);
        self.block_count = 0;
        self.packet_size = HEADER_LEN;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSleeper {
        slept: Vec<Duration>,
    }

    impl Sleeper for FakeSleeper {
        fn sleep(&mut self, duration: Duration) {
            self.slept.push(duration);
        }
    }

    fn header(buf: &[u8]) -> (u64, u16) {
        let seq = u64::from_be_bytes(buf[10..18].try_into().unwrap());
        let count = u16::from_be_bytes(buf[18..20].try_into().unwrap());
        (seq, count)
    }

    fn blocks(buf: &[u8], count: u16) -> Vec<&[u8]> {
        let mut out = Vec::new();
        let mut at = HEADER_LEN;
        for _ in 0..count {
            let len = u16::from_be_bytes([buf[at], buf[at + 1]]) as usize;
            out.push(&buf[at + 2..at + 2 + len]);
            at += 2 + len;
        }
        out
    }

    #[test]
    fn coalesce_then_flush_on_gap() {
        // MTU sized so {m1, m2} just fit in one packet but m3 does not.
        let config = PacerConfig {
            max_delay_micros: 1_000,
            mtu: 210,
            ..PacerConfig::default()
        };
        let mut pacer = Pacer::new(config);
        let mut sleeper = FakeSleeper { slept: Vec::new() };
        let mut packets: Vec<Vec<u8>> = Vec::new();
        let mut sink = |buf: &[u8]| packets.push(buf.to_vec());

        let m1 = vec![0xAAu8; 100];
        let m2 = vec![0xBBu8; 80];
        pacer
            .handle_message(0, &m1, &mut sink, &mut sleeper)
            .unwrap();
        pacer
            .handle_message(500_000, &m2, &mut sink, &mut sleeper)
            .unwrap();
        assert!(packets.is_empty(), "still within one packet, no flush yet");

        let m3 = vec![0xCCu8; 80];
        pacer
            .handle_message(600_000, &m3, &mut sink, &mut sleeper)
            .unwrap();
        assert_eq!(packets.len(), 1, "MTU overflow forces a flush of {{m1,m2}}");
        let (seq, count) = header(&packets[0]);
        assert_eq!(seq, 0);
        assert_eq!(count, 2);
        assert_eq!(blocks(&packets[0], 2), vec![m1.as_slice(), m2.as_slice()]);

        let m4 = vec![0xDDu8; 10];
        pacer
            .handle_message(5_000_000, &m4, &mut sink, &mut sleeper)
            .unwrap();
        assert_eq!(packets.len(), 2, "4.4ms gap forces a flush of {{m3}}");
        let (seq, count) = header(&packets[1]);
        assert_eq!(seq, 2);
        assert_eq!(count, 1);
        assert_eq!(sleeper.slept, vec![Duration::from_nanos(4_400_000)]);
        assert_eq!(pacer.next_sequence(), 3);
    }

    #[test]
    fn oversized_message_is_rejected_without_mutating_state() {
        let config = PacerConfig {
            mtu: 200,
            ..PacerConfig::default()
        };
        let mut pacer = Pacer::new(config);
        let mut sleeper = FakeSleeper { slept: Vec::new() };
        let mut sink = |_: &[u8]| panic!("sink should not be called");
        let huge = vec![0u8; 500];
        let err = pacer
            .handle_message(0, &huge, &mut sink, &mut sleeper)
            .unwrap_err();
        assert_eq!(err, PacerError::OversizedMessage { len: 500 });
        assert_eq!(pacer.next_sequence(), 0);
    }

    #[test]
    fn heartbeat_with_no_pending_blocks_is_header_only() {
        let mut pacer = Pacer::new(PacerConfig::default());
        let mut packets: Vec<Vec<u8>> = Vec::new();
        {
            let mut sink = |buf: &[u8]| packets.push(buf.to_vec());
            pacer.heartbeat(&mut sink);
        }
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), HEADER_LEN);
        let (seq, count) = header(&packets[0]);
        assert_eq!(seq, 0);
        assert_eq!(count, 0);
    }
}
