//! Small pieces of ambient daemon plumbing shared by every binary:
//! `tracing-subscriber` initialization from `--log.*` flags, and a
//! combined SIGINT/SIGTERM shutdown future that triggers graceful
//! shutdown of the admin server followed by the daemon.
//!
//! Logging and configuration are process-wide state with explicit init
//! and teardown called from the daemon's `main`; nothing here is
//! reached for by library code — only a binary's `main` calls
//! [`init_logging`].

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber. `filter` is normally the
/// `--log.filter` flag value (an `EnvFilter` directive string, e.g.
/// `"info,jaybeams::book=debug"`); `None` falls back to `RUST_LOG` or
/// `info`.
pub fn init_logging(filter: Option<&str>) {
    let env_filter = match filter {
        Some(directive) => EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

/// Resolve to the first `Ctrl-C` or (on Unix) `SIGTERM`, whichever
/// arrives first. Every daemon awaits this to trigger graceful
/// shutdown of its admin listener and then the rest of its pipeline.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Process exit codes: `0` normal, `1` uncaught
/// exception, `2` usage error.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const ERROR: i32 = 1;
    pub const USAGE: i32 = 2;
}
