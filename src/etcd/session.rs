//! The lease session (C6): holds a time-to-live lease on the
//! coordination service for the life of the process, refreshing it at
//! roughly `actual_TTL / 5`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tonic::Status;
use tracing::{debug, warn};

use super::error::EtcdError;
use super::grpc::{BoxStream, DuplexStream, GrpcInterceptor};
use super::pb::{LeaseGrantRequest, LeaseKeepAliveRequest, LeaseKeepAliveResponse, LeaseRevokeRequest};

/// Desired lease TTL if the caller does not override it.
pub const DEFAULT_DESIRED_TTL: Duration = Duration::from_millis(5000);
/// Refresh a lease every `actual_TTL / KA_RATIO`.
pub const DEFAULT_KA_RATIO: u32 = 5;
/// Consecutive missed keep-alive responses before the session
/// considers the lease expired.
const MAX_CONSECUTIVE_MISSES: u32 = 2;

/// Holds a lease on the coordination service and keeps it alive with a
/// background timer -> write -> read loop, enforcing the strict
/// alternation the keep-alive protocol requires.
pub struct Session {
    lease_id: i64,
    actual_ttl_ms: Arc<AtomicU64>,
    interceptor: Arc<dyn GrpcInterceptor>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    failed_rx: Mutex<Option<oneshot::Receiver<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Connect: submit a lease-grant request, then open the
    /// keep-alive stream and start refreshing. `previous_lease_id` is
    /// an advisory restart hint passed on the grant request; the
    /// server still authoritatively assigns the id.
    pub async fn connect(
        interceptor: Arc<dyn GrpcInterceptor>,
        desired_ttl: Duration,
        ka_ratio: u32,
        previous_lease_id: Option<i64>,
    ) -> Result<Self, EtcdError> {
        let grant = interceptor
            .lease_grant(LeaseGrantRequest {
                ttl: desired_ttl.as_secs().max(1) as i64,
                id: previous_lease_id.unwrap_or(0),
            })
            .await?;
        if !grant.error.is_empty() {
            return Err(EtcdError::LeaseGrantFailed {
                message: grant.error,
            });
        }

        let DuplexStream { writer, reader } = interceptor.open_keep_alive().await?;
        let actual_ttl_ms = Arc::new(AtomicU64::new((grant.ttl.max(1) as u64) * 1000));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (failed_tx, failed_rx) = oneshot::channel();

        let task = tokio::spawn(run(
            writer,
            reader,
            grant.id,
            actual_ttl_ms.clone(),
            ka_ratio.max(1),
            shutdown_rx,
            failed_tx,
        ));

        debug!(lease_id = grant.id, ttl_ms = grant.ttl * 1000, "lease session connected");

        Ok(Session {
            lease_id: grant.id,
            actual_ttl_ms,
            interceptor,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            failed_rx: Mutex::new(Some(failed_rx)),
            task: Mutex::new(Some(task)),
        })
    }

    pub fn lease_id(&self) -> i64 {
        self.lease_id
    }

    /// The TTL currently in effect, as last adopted from a keep-alive
    /// response (the server may lengthen or shorten it).
    pub fn actual_ttl(&self) -> Duration {
        Duration::from_millis(self.actual_ttl_ms.load(Ordering::SeqCst))
    }

    /// True once the keep-alive loop has observed lease expiry.
    pub fn is_failed(&self) -> bool {
        let mut guard = self.failed_rx.lock().unwrap();
        match guard.as_mut() {
            Some(rx) => matches!(rx.try_recv(), Ok(())),
            None => false,
        }
    }

    /// Cancel the keep-alive loop and release local resources, without
    /// contacting the server.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Revoke the lease on the server, tearing down any election keys
    /// it holds, then shut down locally.
    pub async fn revoke(&self) -> Result<(), EtcdError> {
        self.interceptor
            .lease_revoke(LeaseRevokeRequest { id: self.lease_id })
            .await?;
        self.shutdown().await;
        Ok(())
    }
}

async fn run(
    mut writer: mpsc::Sender<LeaseKeepAliveRequest>,
    mut reader: BoxStream<Result<LeaseKeepAliveResponse, Status>>,
    lease_id: i64,
    actual_ttl_ms: Arc<AtomicU64>,
    ka_ratio: u32,
    mut shutdown_rx: oneshot::Receiver<()>,
    failed_tx: oneshot::Sender<()>,
) {
    let mut consecutive_misses = 0u32;
    loop {
        let delay_ms = (actual_ttl_ms.load(Ordering::SeqCst) / u64::from(ka_ratio)).max(1);
        tokio::select! {
            _ = &mut shutdown_rx => return,
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
        }

        if writer
            .send(LeaseKeepAliveRequest { id: lease_id })
            .await
            .is_err()
        {
            consecutive_misses += 1;
            warn!(lease_id, consecutive_misses, "keep-alive write failed");
        } else {
            match reader.next().await {
                Some(Ok(response)) => {
                    consecutive_misses = 0;
                    actual_ttl_ms.store((response.ttl.max(1) as u64) * 1000, Ordering::SeqCst);
                }
                _ => {
                    consecutive_misses += 1;
                    warn!(lease_id, consecutive_misses, "keep-alive read failed");
                }
            }
        }

        if consecutive_misses >= MAX_CONSECUTIVE_MISSES {
            warn!(lease_id, "lease expired: keep-alive stream failed");
            let _ = failed_tx.send(());
            return;
        }
    }
}
