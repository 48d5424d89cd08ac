//! `itch5inside`: replays a file of ITCH-5.0 messages through
//! [`jaybeams::book::Engine`] and writes the evolving best-bid/best-offer
//! (the "inside" quote) to a CSV file or stdout, optionally stopping
//! after a configured number of seconds of recorded time.

use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing::{error, info, warn};

use jaybeams::book::{BookUpdateEvent, Engine};
use jaybeams::config::{self, DaemonConfig};
use jaybeams::itch::{ItchMessage, iter_frames};
use jaybeams::utils::{exit_code, init_logging};

/// ITCH-5.0 inside-quote extractor: replays a message file and prints
/// the best bid/offer after every change.
#[derive(Parser, Debug)]
#[command(name = "itch5inside")]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,

    /// Source of length-prefixed ITCH-5.0 bytes.
    #[arg(long)]
    input_file: PathBuf,

    /// Destination for the inside-quote CSV; stdout if omitted.
    #[arg(long = "output-file")]
    output_file: Option<PathBuf>,

    /// Stop once an event's receive time passes this many seconds past
    /// the first event.
    #[arg(long = "stop-after-seconds")]
    stop_after_seconds: Option<u64>,

    #[arg(long = "log.filter")]
    log_filter: Option<String>,
    #[arg(long = "set", value_name = "section.key=value")]
    overrides: Vec<String>,
}

fn main() {
    let args = Args::parse();
    init_logging(args.log_filter.as_deref());

    if let Err(err) = run(args) {
        error!(error = %err, "itch5inside exited with an error");
        std::process::exit(exit_code::ERROR);
    }
    std::process::exit(exit_code::OK);
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let search_path = args
        .config
        .clone()
        .unwrap_or_else(|| config::search_path("itch5inside", "jaybeams.yaml"));
    let daemon_config: DaemonConfig = config::load_yaml(Some(&search_path)).unwrap_or_default();
    let daemon_config = config::merge_overrides(daemon_config, &args.overrides)?;
    let side_kind = daemon_config.book.side_kind()?;

    let mut out: Box<dyn Write> = match &args.output_file {
        Some(path) => Box::new(BufWriter::new(std::fs::File::create(path)?)),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };
    writeln!(
        out,
        "receive_time_ns,symbol,bid_price,bid_qty,offer_price,offer_qty"
    )?;

    let mut engine = Engine::new(side_kind);
    let events: Arc<Mutex<Vec<BookUpdateEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let events_for_callback = events.clone();
    engine.on_update(move |event| events_for_callback.lock().unwrap().push(*event));

    let bytes = std::fs::read(&args.input_file)?;
    let mut start_time_ns: Option<u64> = None;
    let mut rows = 0u64;

    'replay: for frame in iter_frames(&bytes)? {
        let message = match ItchMessage::decode(frame) {
            Ok(message) => message,
            Err(err) => {
                error!(error = %err, "failed to decode ITCH message, skipping");
                continue;
            }
        };
        let receive_time_ns = message.header().timestamp_ns;

        if let Some(stop_after) = args.stop_after_seconds {
            let t0 = *start_time_ns.get_or_insert(receive_time_ns);
            if receive_time_ns.saturating_sub(t0) > stop_after * 1_000_000_000 {
                info!(rows, "stop-after-seconds reached, ending replay");
                break 'replay;
            }
        }

        if let Err(err) = engine.handle(receive_time_ns, &message) {
            warn!(error = %err, "dropped anomalous message");
            continue;
        }

        let fired: Vec<BookUpdateEvent> = events.lock().unwrap().drain(..).collect();
        for event in fired {
            let Some(book) = engine.book(event.symbol) else {
                continue;
            };
            let bid = book.best_bid();
            let offer = book.best_offer();
            writeln!(
                out,
                "{},{},{},{},{},{}",
                event.receive_time_ns,
                event.symbol,
                bid.price.raw(),
                bid.quantity,
                offer.price.raw(),
                offer.quantity,
            )?;
            rows += 1;
        }
    }

    out.flush()?;
    info!(rows, order_count = engine.order_count(), "inside-quote extraction complete");
    Ok(())
}
