//! The interceptor hook: the seam between every
//! public coordination operation and the underlying gRPC channel. The
//! real interceptor forwards to `tonic`-generated clients over a live
//! channel; the mock interceptor used in tests records operations and
//! lets a test script their responses synchronously. "This is the
//! polymorphism-over-capabilities point for the whole runtime".

use std::future::Future;
use std::pin::Pin;

use futures::Stream;
use tonic::transport::Channel;
use tonic::Status;

use super::pb::{
    kv_client::KvClient, lease_client::LeaseClient, watch_client::WatchClient,
    LeaseGrantRequest, LeaseGrantResponse, LeaseKeepAliveRequest, LeaseKeepAliveResponse,
    LeaseRevokeRequest, LeaseRevokeResponse, RangeRequest, RangeResponse, TxnRequest, TxnResponse,
    WatchRequest, WatchResponse,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// A duplex handle on a bidirectional stream: the write half the
/// caller drives, and the boxed response stream read from it.
pub struct DuplexStream<Req, Resp> {
    pub writer: tokio::sync::mpsc::Sender<Req>,
    pub reader: BoxStream<Result<Resp, Status>>,
}

/// Everything the session and election runner need from the
/// coordination service, abstracted so production and test code share
/// one seam.
pub trait GrpcInterceptor: Send + Sync {
    fn range(&self, request: RangeRequest) -> BoxFuture<'_, Result<RangeResponse, Status>>;
    fn txn(&self, request: TxnRequest) -> BoxFuture<'_, Result<TxnResponse, Status>>;
    fn lease_grant(
        &self,
        request: LeaseGrantRequest,
    ) -> BoxFuture<'_, Result<LeaseGrantResponse, Status>>;
    fn lease_revoke(
        &self,
        request: LeaseRevokeRequest,
    ) -> BoxFuture<'_, Result<LeaseRevokeResponse, Status>>;
    fn open_watch(
        &self,
    ) -> BoxFuture<'_, Result<DuplexStream<WatchRequest, WatchResponse>, Status>>;
    fn open_keep_alive(
        &self,
    ) -> BoxFuture<'_, Result<DuplexStream<LeaseKeepAliveRequest, LeaseKeepAliveResponse>, Status>>;
}

/// Forwards every operation to a live etcd cluster over one shared
/// `tonic` channel. Client stubs are cheap to clone (they wrap a
/// shared `Channel`), so each call clones its client rather than
/// locking a shared one.
#[derive(Clone)]
pub struct RealInterceptor {
    kv: KvClient<Channel>,
    watch: WatchClient<Channel>,
    lease: LeaseClient<Channel>,
}

impl RealInterceptor {
    pub fn new(channel: Channel) -> Self {
        RealInterceptor {
            kv: KvClient::new(channel.clone()),
            watch: WatchClient::new(channel.clone()),
            lease: LeaseClient::new(channel),
        }
    }
}

impl GrpcInterceptor for RealInterceptor {
    fn range(&self, request: RangeRequest) -> BoxFuture<'_, Result<RangeResponse, Status>> {
        let mut client = self.kv.clone();
        Box::pin(async move { Ok(client.range(request).await?.into_inner()) })
    }

    fn txn(&self, request: TxnRequest) -> BoxFuture<'_, Result<TxnResponse, Status>> {
        let mut client = self.kv.clone();
        Box::pin(async move { Ok(client.txn(request).await?.into_inner()) })
    }

    fn lease_grant(
        &self,
        request: LeaseGrantRequest,
    ) -> BoxFuture<'_, Result<LeaseGrantResponse, Status>> {
        let mut client = self.lease.clone();
        Box::pin(async move { Ok(client.lease_grant(request).await?.into_inner()) })
    }

    fn lease_revoke(
        &self,
        request: LeaseRevokeRequest,
    ) -> BoxFuture<'_, Result<LeaseRevokeResponse, Status>> {
        let mut client = self.lease.clone();
        Box::pin(async move { Ok(client.lease_revoke(request).await?.into_inner()) })
    }

    fn open_watch(
        &self,
    ) -> BoxFuture<'_, Result<DuplexStream<WatchRequest, WatchResponse>, Status>> {
        let mut client = self.watch.clone();
        Box::pin(async move {
            let (tx, rx) = tokio::sync::mpsc::channel(16);
            let outbound = tokio_stream::wrappers::ReceiverStream::new(rx);
            let inbound = client.watch(outbound).await?.into_inner();
            Ok(DuplexStream {
                writer: tx,
                reader: Box::pin(inbound),
            })
        })
    }

    fn open_keep_alive(
        &self,
    ) -> BoxFuture<'_, Result<DuplexStream<LeaseKeepAliveRequest, LeaseKeepAliveResponse>, Status>>
    {
        let mut client = self.lease.clone();
        Box::pin(async move {
            let (tx, rx) = tokio::sync::mpsc::channel(16);
            let outbound = tokio_stream::wrappers::ReceiverStream::new(rx);
            let inbound = client.lease_keep_alive(outbound).await?.into_inner();
            Ok(DuplexStream {
                writer: tx,
                reader: Box::pin(inbound),
            })
        })
    }
}

/// A scriptable interceptor used by the session and election runner's
/// own unit tests: it records every operation and lets the test drive
/// responses without a live cluster.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    #[derive(Default)]
    pub struct MockInterceptor {
        range: Mutex<VecDeque<Result<RangeResponse, Status>>>,
        txn: Mutex<VecDeque<Result<TxnResponse, Status>>>,
        lease_grant: Mutex<VecDeque<Result<LeaseGrantResponse, Status>>>,
        lease_revoke: Mutex<VecDeque<Result<LeaseRevokeResponse, Status>>>,
        watch_writes_rx: Mutex<Option<mpsc::Receiver<WatchRequest>>>,
        watch_responses_tx: Mutex<Option<mpsc::UnboundedSender<Result<WatchResponse, Status>>>>,
        keep_alive_writes_rx: Mutex<Option<mpsc::Receiver<LeaseKeepAliveRequest>>>,
        keep_alive_responses_tx:
            Mutex<Option<mpsc::UnboundedSender<Result<LeaseKeepAliveResponse, Status>>>>,
    }

    impl MockInterceptor {
        pub fn new() -> Self {
            MockInterceptor::default()
        }

        pub fn push_range(&self, response: Result<RangeResponse, Status>) {
            self.range.lock().unwrap().push_back(response);
        }

        pub fn push_txn(&self, response: Result<TxnResponse, Status>) {
            self.txn.lock().unwrap().push_back(response);
        }

        pub fn push_lease_grant(&self, response: Result<LeaseGrantResponse, Status>) {
            self.lease_grant.lock().unwrap().push_back(response);
        }

        pub fn push_lease_revoke(&self, response: Result<LeaseRevokeResponse, Status>) {
            self.lease_revoke.lock().unwrap().push_back(response);
        }

        /// Take ownership of the channel receiving everything written
        /// to the watch stream so far. Panics if `open_watch()` has
        /// not yet been called.
        pub fn take_watch_writes(&self) -> mpsc::Receiver<WatchRequest> {
            self.watch_writes_rx
                .lock()
                .unwrap()
                .take()
                .expect("open_watch() must be called before take_watch_writes()")
        }

        /// Push the next item the watch stream's reader will yield.
        pub fn send_watch_response(&self, response: Result<WatchResponse, Status>) {
            if let Some(tx) = self.watch_responses_tx.lock().unwrap().as_ref() {
                let _ = tx.send(response);
            }
        }

        pub fn take_keep_alive_writes(&self) -> mpsc::Receiver<LeaseKeepAliveRequest> {
            self.keep_alive_writes_rx
                .lock()
                .unwrap()
                .take()
                .expect("open_keep_alive() must be called before take_keep_alive_writes()")
        }

        pub fn send_keep_alive_response(&self, response: Result<LeaseKeepAliveResponse, Status>) {
            if let Some(tx) = self.keep_alive_responses_tx.lock().unwrap().as_ref() {
                let _ = tx.send(response);
            }
        }

        /// Close the keep-alive response stream, simulating a broken
        /// stream: the next read on it observes end-of-stream.
        pub fn close_keep_alive_responses(&self) {
            self.keep_alive_responses_tx.lock().unwrap().take();
        }
    }

    impl GrpcInterceptor for MockInterceptor {
        fn range(&self, _request: RangeRequest) -> BoxFuture<'_, Result<RangeResponse, Status>> {
            let response = self
                .range
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Status::internal("no scripted range response")));
            Box::pin(async move { response })
        }

        fn txn(&self, _request: TxnRequest) -> BoxFuture<'_, Result<TxnResponse, Status>> {
            let response = self
                .txn
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Status::internal("no scripted txn response")));
            Box::pin(async move { response })
        }

        fn lease_grant(
            &self,
            _request: LeaseGrantRequest,
        ) -> BoxFuture<'_, Result<LeaseGrantResponse, Status>> {
            let response = self
                .lease_grant
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Status::internal("no scripted lease-grant response")));
            Box::pin(async move { response })
        }

        fn lease_revoke(
            &self,
            _request: LeaseRevokeRequest,
        ) -> BoxFuture<'_, Result<LeaseRevokeResponse, Status>> {
            let response = self
                .lease_revoke
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Status::internal("no scripted lease-revoke response")));
            Box::pin(async move { response })
        }

        fn open_watch(
            &self,
        ) -> BoxFuture<'_, Result<DuplexStream<WatchRequest, WatchResponse>, Status>> {
            let (write_tx, write_rx) = mpsc::channel(16);
            let (resp_tx, resp_rx) = mpsc::unbounded_channel();
            *self.watch_writes_rx.lock().unwrap() = Some(write_rx);
            *self.watch_responses_tx.lock().unwrap() = Some(resp_tx);
            Box::pin(async move {
                Ok(DuplexStream {
                    writer: write_tx,
                    reader: Box::pin(UnboundedReceiverStream::new(resp_rx)),
                })
            })
        }

        fn open_keep_alive(
            &self,
        ) -> BoxFuture<'_, Result<DuplexStream<LeaseKeepAliveRequest, LeaseKeepAliveResponse>, Status>>
        {
            let (write_tx, write_rx) = mpsc::channel(16);
            let (resp_tx, resp_rx) = mpsc::unbounded_channel();
            *self.keep_alive_writes_rx.lock().unwrap() = Some(write_rx);
            *self.keep_alive_responses_tx.lock().unwrap() = Some(resp_tx);
            Box::pin(async move {
                Ok(DuplexStream {
                    writer: write_tx,
                    reader: Box::pin(UnboundedReceiverStream::new(resp_rx)),
                })
            })
        }
    }
}
