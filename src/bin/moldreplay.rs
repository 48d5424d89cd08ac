//! `moldreplay`: replays a file of ITCH-5.0 messages through
//! [`jaybeams::moldudp::Pacer`], writing paced MoldUDP64 packets to a
//! primary UDP destination and, optionally, a secondary one.
//!
//! The secondary write is best-effort: a `WouldBlock` is logged and
//! dropped rather than delaying the primary.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use clap::Parser;
use tracing::{error, info, warn};

use jaybeams::admin::{register_standard_handlers, AdminResponse, Dispatcher};
use jaybeams::config::{self, DaemonConfig};
use jaybeams::itch::{ItchMessage, iter_frames};
use jaybeams::moldudp::{Pacer, RealSleeper};
use jaybeams::utils::{exit_code, init_logging, shutdown_signal};

/// MoldUDP64 replayer: paces a file of ITCH-5.0 messages by their
/// original inter-message timestamps.
#[derive(Parser, Debug)]
#[command(name = "moldreplay")]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,

    /// Source of length-prefixed ITCH-5.0 bytes.
    #[arg(long)]
    input_file: PathBuf,

    /// Primary UDP destination host.
    #[arg(long = "primary-destination", default_value = "127.0.0.1")]
    primary_destination: String,

    /// Primary UDP destination port.
    #[arg(long = "primary-port")]
    primary_port: u16,

    /// Secondary UDP destination host.
    #[arg(long = "secondary-destination")]
    secondary_destination: Option<String>,

    /// Secondary UDP destination port.
    #[arg(long = "secondary-port")]
    secondary_port: Option<u16>,

    #[arg(long = "control-host")]
    control_host: Option<String>,
    #[arg(long = "control-port")]
    control_port: Option<u16>,
    #[arg(long = "log.filter")]
    log_filter: Option<String>,
    #[arg(long = "set", value_name = "section.key=value")]
    overrides: Vec<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.log_filter.as_deref());

    if let Err(err) = run(args).await {
        error!(error = %err, "moldreplay exited with an error");
        std::process::exit(exit_code::ERROR);
    }
    std::process::exit(exit_code::OK);
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let search_path = args
        .config
        .clone()
        .unwrap_or_else(|| config::search_path("moldreplay", "jaybeams.yaml"));
    let daemon_config: DaemonConfig = config::load_yaml(Some(&search_path)).unwrap_or_default();
    let daemon_config = config::merge_overrides(daemon_config, &args.overrides)?;
    let pacer_config = daemon_config.pacer;
    let mut admin_config = daemon_config.admin;
    if let Some(host) = &args.control_host {
        admin_config.host = host.parse()?;
    }
    if let Some(port) = args.control_port {
        admin_config.port = port;
    }

    let primary_addr: SocketAddr = format!("{}:{}", args.primary_destination, args.primary_port).parse()?;
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(primary_addr)?;

    let secondary: Option<(UdpSocket, SocketAddr)> =
        match (&args.secondary_destination, args.secondary_port) {
            (Some(host), Some(port)) => {
                let addr: SocketAddr = format!("{host}:{port}").parse()?;
                let sock = UdpSocket::bind("0.0.0.0:0")?;
                sock.set_nonblocking(true)?;
                sock.connect(addr)?;
                Some((sock, addr))
            }
            _ => None,
        };

    let status = Arc::new(ReplayStatus::default());
    let dispatcher = Arc::new(Dispatcher::new("moldreplay"));
    register_standard_handlers(&dispatcher, move || config::to_yaml(&pacer_config));
    let status_for_handler = status.clone();
    dispatcher.add_handler("/replay-status", move |_req| {
        AdminResponse::ok(
            "text/plain",
            format!(
                "state: {}\npackets_sent: {}\nsequence: {}\n",
                status_for_handler.state(),
                status_for_handler.packets_sent.load(Ordering::Relaxed),
                status_for_handler.sequence.load(Ordering::Relaxed),
            ),
        )
    });

    let admin_addr = admin_config.socket_addr();
    let admin_task = tokio::spawn(jaybeams::admin::serve(
        dispatcher,
        admin_addr,
        Box::pin(shutdown_signal()),
    ));

    status.set_state(ReplayState::Replaying);
    let bytes = std::fs::read(&args.input_file)?;
    let mut pacer = Pacer::new(pacer_config);
    let mut sleeper = RealSleeper;

    for frame in iter_frames(&bytes)? {
        let message = match ItchMessage::decode(frame) {
            Ok(m) => m,
            Err(err) => {
                error!(error = %err, "failed to decode ITCH message, skipping");
                continue;
            }
        };
        let ts = message.header().timestamp_ns;
        let encoded = message.encode();
        let sent = status.clone();
        pacer.handle_message(ts, &encoded, &mut |packet| {
            send_packet(&socket, secondary.as_ref(), packet);
            sent.packets_sent.fetch_add(1, Ordering::Relaxed);
            sent.sequence.store(pacer_sequence_hint(packet), Ordering::Relaxed);
        }, &mut sleeper)?;
    }
    pacer.flush(0, &mut |packet| {
        send_packet(&socket, secondary.as_ref(), packet);
        status.packets_sent.fetch_add(1, Ordering::Relaxed);
    });
    status.set_state(ReplayState::Idle);
    info!(packets_sent = status.packets_sent.load(Ordering::Relaxed), "replay complete");

    admin_task.abort();
    Ok(())
}

fn send_packet(primary: &UdpSocket, secondary: Option<&(UdpSocket, SocketAddr)>, packet: &[u8]) {
    if let Err(err) = primary.send(packet) {
        error!(error = %err, "primary UDP send failed");
    }
    if let Some((socket, addr)) = secondary {
        match socket.send_to(packet, addr) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                warn!("secondary UDP send would block, dropping packet");
            }
            Err(err) => {
                warn!(error = %err, "secondary UDP send failed");
            }
        }
    }
}

/// The MoldUDP64 sequence number is the first 8 bytes after the
/// 10-byte session id; used only to populate `/replay-status`.
fn pacer_sequence_hint(packet: &[u8]) -> u64 {
    if packet.len() < 18 {
        return 0;
    }
    u64::from_be_bytes(packet[10..18].try_into().unwrap())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplayState {
    Idle,
    Replaying,
}

struct ReplayStatus {
    state: AtomicUsize,
    packets_sent: AtomicU64,
    sequence: AtomicU64,
}

impl Default for ReplayStatus {
    fn default() -> Self {
        ReplayStatus {
            state: AtomicUsize::new(0),
            packets_sent: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
        }
    }
}

impl ReplayStatus {
    fn set_state(&self, state: ReplayState) {
        self.state.store(state as usize, Ordering::Relaxed);
    }

    fn state(&self) -> &'static str {
        match self.state.load(Ordering::Relaxed) {
            1 => "replaying",
            _ => "idle",
        }
    }
}
