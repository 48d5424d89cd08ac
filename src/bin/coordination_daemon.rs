//! `coordination-daemon`: demonstrates C5–C7 end to end against a real
//! etcd cluster — grant a lease, campaign in an election, and serve the
//! standard admin surface reporting leadership status.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tonic::transport::Channel;
use tracing::{error, info};

use jaybeams::admin::{register_standard_handlers, AdminResponse, Dispatcher};
use jaybeams::config::{self, DaemonConfig};
use jaybeams::etcd::grpc::RealInterceptor;
use jaybeams::etcd::{ElectionRunner, GrpcInterceptor, Session};
use jaybeams::utils::{exit_code, init_logging, shutdown_signal};

/// Coordination daemon: holds a lease and campaigns in a leader
/// election against an etcd cluster.
#[derive(Parser, Debug)]
#[command(name = "coordination-daemon")]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,

    /// etcd gRPC endpoint, e.g. `http://127.0.0.1:2379`.
    #[arg(long = "etcd.endpoint")]
    etcd_endpoint: Option<String>,

    /// Election key prefix to campaign under.
    #[arg(long = "etcd.election-name")]
    election_name: Option<String>,

    /// A prior lease id to offer as a restart hint.
    #[arg(long = "previous-lease-id")]
    previous_lease_id: Option<i64>,

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
        error!(error = %err, "coordination-daemon exited with an error");
        std::process::exit(exit_code::ERROR);
    }
    std::process::exit(exit_code::OK);
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let search_path = args
        .config
        .clone()
        .unwrap_or_else(|| config::search_path("coordination-daemon", "jaybeams.yaml"));
    let daemon_config: DaemonConfig = config::load_yaml(Some(&search_path)).unwrap_or_default();
    let daemon_config = config::merge_overrides(daemon_config, &args.overrides)?;
    let mut etcd_config = daemon_config.etcd;
    let mut admin_config = daemon_config.admin;
    if let Some(endpoint) = &args.etcd_endpoint {
        etcd_config.endpoint = endpoint.clone();
    }
    if let Some(name) = &args.election_name {
        etcd_config.election_name = name.clone();
    }
    if let Some(host) = &args.control_host {
        admin_config.host = host.parse()?;
    }
    if let Some(port) = args.control_port {
        admin_config.port = port;
    }

    let channel = Channel::from_shared(etcd_config.endpoint.clone())?
        .connect()
        .await?;
    let interceptor: Arc<dyn GrpcInterceptor> = Arc::new(RealInterceptor::new(channel));

    let session = Arc::new(
        Session::connect(
            interceptor.clone(),
            Duration::from_millis(etcd_config.lease_ttl_ms),
            etcd_config.ka_ratio,
            args.previous_lease_id,
        )
        .await?,
    );
    info!(lease_id = session.lease_id(), "lease session established");

    let runner = Arc::new(
        ElectionRunner::new(
            interceptor,
            etcd_config.election_name.clone(),
            b"coordination-daemon".to_vec(),
            session.lease_id(),
        )
        .await?,
    );

    let is_leader = Arc::new(AtomicBool::new(false));
    let is_leader_for_campaign = is_leader.clone();
    runner.campaign(move |elected| {
        is_leader_for_campaign.store(elected, Ordering::SeqCst);
        info!(elected, "election campaign resolved");
    });

    let dispatcher = Arc::new(Dispatcher::new("coordination-daemon"));
    register_standard_handlers(&dispatcher, move || config::to_yaml(&etcd_config));
    let is_leader_for_status = is_leader.clone();
    let revision = runner.participant_revision();
    dispatcher.add_handler("/leader-status", move |_req| {
        AdminResponse::ok(
            "text/plain",
            format!(
                "is_leader: {}\nparticipant_revision: {}\n",
                is_leader_for_status.load(Ordering::SeqCst),
                revision,
            ),
        )
    });

    let admin_addr = admin_config.socket_addr();
    let shutdown = shutdown_signal();
    jaybeams::admin::serve(dispatcher, admin_addr, Box::pin(shutdown)).await?;

    runner.resign().await;
    session.revoke().await?;
    info!("coordination-daemon shut down cleanly");
    Ok(())
}
