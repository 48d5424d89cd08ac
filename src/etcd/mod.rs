//! The coordination layer: a completion-queue runtime (C5), a
//! lease-session (C6), and a sequenced-key election runner (C7) built
//! on top of it.

pub mod election;
pub mod error;
pub mod grpc;
pub mod pb;
pub mod queue;
pub mod session;

pub use election::ElectionRunner;
pub use error::EtcdError;
pub use grpc::{GrpcInterceptor, RealInterceptor};
pub use queue::CompletionQueue;
pub use session::Session;
