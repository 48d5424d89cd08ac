//! `feed-handler`: raw ITCH-5.0 bytes (from a file, standing in for the
//! external MoldUDP64 session layer's decoded output) →
//! [`jaybeams::book::Engine`] → change callback → log, with the
//! standard admin surface alongside.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use jaybeams::admin::{register_standard_handlers, Dispatcher};
use jaybeams::book::Engine;
use jaybeams::config::{self, DaemonConfig};
use jaybeams::itch::{ItchMessage, iter_frames};
use jaybeams::utils::{exit_code, init_logging, shutdown_signal};

/// ITCH-5.0 feed handler: maintains per-symbol order books from a raw
/// message stream.
#[derive(Parser, Debug)]
#[command(name = "feed-handler")]
struct Args {
    /// Optional YAML configuration file, loaded before CLI overrides.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Source of length-prefixed ITCH-5.0 bytes.
    #[arg(long)]
    input_file: PathBuf,

    /// Admin listener host.
    #[arg(long = "control-host")]
    control_host: Option<String>,

    /// Admin listener port.
    #[arg(long = "control-port")]
    control_port: Option<u16>,

    /// `tracing` env-filter directive.
    #[arg(long = "log.filter")]
    log_filter: Option<String>,

    /// Repeatable `--section.key=value` config overrides.
    #[arg(long = "set", value_name = "section.key=value")]
    overrides: Vec<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.log_filter.as_deref());

    if let Err(err) = run(args).await {
        error!(error = %err, "feed-handler exited with an error");
        std::process::exit(exit_code::ERROR);
    }
    std::process::exit(exit_code::OK);
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let search_path = args
        .config
        .clone()
        .unwrap_or_else(|| config::search_path("feed-handler", "jaybeams.yaml"));
    let daemon_config: DaemonConfig = config::load_yaml(Some(&search_path)).unwrap_or_default();
    let daemon_config = config::merge_overrides(daemon_config, &args.overrides)?;
    let book_config = daemon_config.book;
    let mut admin_config = daemon_config.admin;
    if let Some(host) = &args.control_host {
        admin_config.host = host.parse()?;
    }
    if let Some(port) = args.control_port {
        admin_config.port = port;
    }

    let side_kind = book_config.side_kind()?;
    let mut engine = Engine::new(side_kind);
    engine.on_update(|event| {
        info!(
            symbol = %event.symbol,
            side = %event.side,
            price = %event.price,
            delta_qty = event.delta_qty,
            cxlreplx = event.cxlreplx,
            "book update"
        );
    });

    let dispatcher = Arc::new(Dispatcher::new("feed-handler"));
    register_standard_handlers(&dispatcher, move || config::to_yaml(&book_config));

    let addr: SocketAddr = admin_config.socket_addr();
    let admin_task = tokio::spawn(jaybeams::admin::serve(
        dispatcher,
        addr,
        Box::pin(shutdown_signal()),
    ));

    let bytes = std::fs::read(&args.input_file)?;
    let mut processed = 0u64;
    for frame in iter_frames(&bytes)? {
        match ItchMessage::decode(frame) {
            Ok(message) => {
                let receive_time_ns = message.header().timestamp_ns;
                if let Err(err) = engine.handle(receive_time_ns, &message) {
                    warn!(error = %err, "dropped anomalous message");
                }
                processed += 1;
            }
            Err(err) => {
                error!(error = %err, "failed to decode ITCH message, skipping");
            }
        }
    }
    info!(processed, order_count = engine.order_count(), "feed replay complete");

    admin_task.abort();
    Ok(())
}
