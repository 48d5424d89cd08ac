//! Error kinds for the coordination layer: rpc errors, lease
//! expiration, election failure, plus the other session/election
//! failure modes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EtcdError {
    #[error("lease-grant-failed: {message}")]
    LeaseGrantFailed { message: String },
    #[error("rpc-error: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("lease-expired")]
    LeaseExpired,
    #[error("election-failed")]
    ElectionFailed,
    #[error("inconsistent-state")]
    InconsistentState,
    #[error("proclaim-failed")]
    ProclaimFailed,
}
