//! Length-prefixed message framing for file-backed ITCH-5.0 sources.
//!
//! Individual ITCH messages carry no self-describing length, so any
//! byte-stream source (a replay file, in this repo) needs a framing
//! convention. We reuse the same 2-byte-big-endian length prefix
//! MoldUDP64 itself uses for each block,
//! so a recorded session's blocks and a flat replay file share one
//! format: `[u16 length][message bytes]...`.

use super::ItchError;

/// Split a buffer of consecutive length-prefixed messages into their
/// individual message byte spans, in order.
///
/// # Errors
/// [`ItchError::Truncated`] if a length prefix or its payload runs past
/// the end of `buf`.
pub fn iter_frames(buf: &[u8]) -> Result<Vec<&[u8]>, ItchError> {
    let mut frames = Vec::new();
    let mut at = 0usize;
    while at < buf.len() {
        if buf.len() - at < 2 {
            return Err(ItchError::Truncated {
                expected: 2,
                got: buf.len() - at,
            });
        }
        let len = u16::from_be_bytes([buf[at], buf[at + 1]]) as usize;
        at += 2;
        if buf.len() - at < len {
            return Err(ItchError::Truncated {
                expected: len,
                got: buf.len() - at,
            });
        }
        frames.push(&buf[at..at + len]);
        at += len;
    }
    Ok(frames)
}

/// Encode one message payload with its 2-byte length prefix, appending
/// to `out`. Inverse of a single [`iter_frames`] element.
pub fn push_frame(out: &mut Vec<u8>, payload: &[u8]) {
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_multiple_frames() {
        let mut buf = Vec::new();
        push_frame(&mut buf, b"hello");
        push_frame(&mut buf, b"world!");
        let frames = iter_frames(&buf).unwrap();
        assert_eq!(frames, vec![b"hello".as_slice(), b"world!".as_slice()]);
    }

    #[test]
    fn empty_buffer_yields_no_frames() {
        assert_eq!(iter_frames(&[]).unwrap(), Vec::<&[u8]>::new());
    }

    #[test]
    fn truncated_length_prefix_is_reported() {
        assert!(iter_frames(&[0x00]).is_err());
    }

    #[test]
    fn truncated_payload_is_reported() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u16.to_be_bytes());
        buf.extend_from_slice(b"short");
        assert!(iter_frames(&buf).is_err());
    }
}
