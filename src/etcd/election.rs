//! The election runner (C7): implements the sequenced-key
//! leader-election pattern — create a key under a common
//! prefix, the smallest create_revision wins, everyone else watches
//! their immediate predecessor to avoid thundering-herd wake-ups.

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tonic::Status;
use tracing::{debug, info, warn};

use super::error::EtcdError;
use super::grpc::{BoxStream, DuplexStream, GrpcInterceptor};
use super::pb::{
    compare::{CompareResult, CompareTarget},
    request_op, response_op, watch_request, Compare, EventType, PutRequest, RangeRequest,
    RequestOp, TxnRequest, TxnResponse, WatchCreateRequest, WatchRequest, WatchResponse,
};

/// Leader-election participant.
pub struct ElectionRunner {
    interceptor: Arc<dyn GrpcInterceptor>,
    name: String,
    lease_id: i64,
    participant_key: Vec<u8>,
    participant_revision: i64,
    watch_writer: mpsc::Sender<WatchRequest>,
    watch_reader: Mutex<Option<BoxStream<Result<WatchResponse, Status>>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ElectionRunner {
    /// Preamble: open the watch stream used later by
    /// [`campaign`](Self::campaign), then run the test-and-set
    /// transaction that establishes this participant's key and
    /// revision. Blocks the constructor on the synchronous completion
    /// of that transaction.
    pub async fn new(
        interceptor: Arc<dyn GrpcInterceptor>,
        election_name: impl Into<String>,
        value: impl Into<Vec<u8>>,
        lease_id: i64,
    ) -> Result<Self, EtcdError> {
        let name = election_name.into();
        let value = value.into();
        let participant_key = format!("{name}/{lease_id:x}").into_bytes();

        let DuplexStream { writer, reader } = interceptor.open_watch().await?;

        let participant_revision =
            preamble(interceptor.as_ref(), &participant_key, &value, lease_id).await?;

        info!(
            election = name,
            lease_id,
            participant_revision,
            "election preamble complete"
        );

        Ok(ElectionRunner {
            interceptor,
            name,
            lease_id,
            participant_key,
            participant_revision,
            watch_writer: writer,
            watch_reader: Mutex::new(Some(reader)),
            shutdown_tx: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    pub fn participant_revision(&self) -> i64 {
        self.participant_revision
    }

    /// Campaign: range-query for the immediate predecessor,
    /// watch it if one exists, and re-query whenever it disappears.
    /// `callback` fires exactly once, with `ok = true` the moment this
    /// participant has no predecessor.
    pub fn campaign(self: &Arc<Self>, callback: impl FnOnce(bool) + Send + 'static) {
        let reader = self
            .watch_reader
            .lock()
            .unwrap()
            .take()
            .expect("campaign() called more than once");
        let writer = self.watch_writer.clone();
        let interceptor = self.interceptor.clone();
        let prefix = format!("{}/", self.name);
        let participant_revision = self.participant_revision;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.shutdown_tx.lock().unwrap() = Some(shutdown_tx);

        let task = tokio::spawn(campaign_loop(
            interceptor,
            prefix,
            participant_revision,
            writer,
            reader,
            Box::new(callback),
            shutdown_rx,
        ));
        *self.task.lock().unwrap() = Some(task);
    }

    /// Resign: cancel the campaign, drain in-flight operations,
    /// and invoke the user callback with `ok = false` if it has not
    /// fired yet (the campaign loop does this on its shutdown branch).
    /// The caller remains responsible for revoking the lease, which is
    /// what actually removes the key server-side.
    pub async fn resign(&self) {
        if let Some(tx) = self.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Proclaim(value): transactional overwrite conditioned on
    /// this participant's create_revision. Failure is fatal
    /// ("proclaim-failed").
    pub async fn proclaim(&self, value: Vec<u8>) -> Result<(), EtcdError> {
        let response = self
            .interceptor
            .txn(TxnRequest {
                compare: vec![Compare {
                    result: CompareResult::Equal as i32,
                    target: CompareTarget::Create as i32,
                    key: self.participant_key.clone(),
                    create_revision: self.participant_revision,
                    value: Vec::new(),
                }],
                success: vec![RequestOp {
                    request: Some(request_op::Request::RequestPut(PutRequest {
                        key: self.participant_key.clone(),
                        value,
                        lease: self.lease_id,
                    })),
                }],
                failure: Vec::new(),
            })
            .await?;
        if response.succeeded {
            Ok(())
        } else {
            Err(EtcdError::ProclaimFailed)
        }
    }
}

async fn preamble(
    interceptor: &dyn GrpcInterceptor,
    key: &[u8],
    value: &[u8],
    lease_id: i64,
) -> Result<i64, EtcdError> {
    let txn = interceptor
        .txn(TxnRequest {
            compare: vec![Compare {
                result: CompareResult::Equal as i32,
                target: CompareTarget::Create as i32,
                key: key.to_vec(),
                create_revision: 0,
                value: Vec::new(),
            }],
            success: vec![RequestOp {
                request: Some(request_op::Request::RequestPut(PutRequest {
                    key: key.to_vec(),
                    value: value.to_vec(),
                    lease: lease_id,
                })),
            }],
            failure: vec![RequestOp {
                request: Some(request_op::Request::RequestRange(RangeRequest {
                    key: key.to_vec(),
                    range_end: Vec::new(),
                    limit: 1,
                })),
            }],
        })
        .await?;

    if txn.succeeded {
        let range = interceptor
            .range(RangeRequest {
                key: key.to_vec(),
                range_end: Vec::new(),
                limit: 1,
            })
            .await?;
        let kv = range
            .kvs
            .into_iter()
            .next()
            .ok_or(EtcdError::InconsistentState)?;
        return Ok(kv.create_revision);
    }

    let existing = existing_kv_from_txn(&txn).ok_or(EtcdError::InconsistentState)?;
    if existing.value == value {
        return Ok(existing.create_revision);
    }

    let overwrite = interceptor
        .txn(TxnRequest {
            compare: vec![Compare {
                result: CompareResult::Equal as i32,
                target: CompareTarget::Create as i32,
                key: key.to_vec(),
                create_revision: existing.create_revision,
                value: Vec::new(),
            }],
            success: vec![RequestOp {
                request: Some(request_op::Request::RequestPut(PutRequest {
                    key: key.to_vec(),
                    value: value.to_vec(),
                    lease: lease_id,
                })),
            }],
            failure: Vec::new(),
        })
        .await?;
    if !overwrite.succeeded {
        return Err(EtcdError::InconsistentState);
    }
    Ok(existing.create_revision)
}

fn existing_kv_from_txn(txn: &TxnResponse) -> Option<super::pb::KeyValue> {
    match txn.responses.first()?.response.clone()? {
        response_op::Response::ResponseRange(r) => r.kvs.into_iter().next(),
        _ => None,
    }
}

#[allow(clippy::too_many_arguments)]
async fn campaign_loop(
    interceptor: Arc<dyn GrpcInterceptor>,
    prefix: String,
    participant_revision: i64,
    mut watch_writer: mpsc::Sender<WatchRequest>,
    mut watch_reader: BoxStream<Result<WatchResponse, Status>>,
    callback: Box<dyn FnOnce(bool) + Send>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut callback = Some(callback);
    let range_end = prefix_range_end(&prefix);

    loop {
        let range = tokio::select! {
            _ = &mut shutdown_rx => {
                fire(&mut callback, false);
                return;
            }
            res = interceptor.range(RangeRequest {
                key: prefix.clone().into_bytes(),
                range_end: range_end.clone(),
                limit: 0,
            }) => res,
        };

        let response = match range {
            Ok(r) => r,
            Err(err) => {
                warn!(error = %err, "election range query failed");
                fire(&mut callback, false);
                return;
            }
        };

        let predecessor = response
            .kvs
            .iter()
            .filter(|kv| kv.create_revision < participant_revision)
            .max_by_key(|kv| kv.create_revision)
            .cloned();

        let predecessor = match predecessor {
            None => {
                debug!("no predecessor found, elected");
                fire(&mut callback, true);
                return;
            }
            Some(kv) => kv,
        };

        let create = WatchRequest {
            request_union: Some(watch_request::RequestUnion::CreateRequest(
                WatchCreateRequest {
                    key: predecessor.key.clone(),
                    range_end: Vec::new(),
                    // Start one revision before the predecessor's own
                    // mod_revision (spec.md §4.7 step 3: "starting at the
                    // revision - 1") so the watch's start_revision is
                    // inclusive of the predecessor's current state rather
                    // than only events strictly after it.
                    start_revision: predecessor.mod_revision - 1,
                    prev_kv: false,
                },
            )),
        };
        if watch_writer.send(create).await.is_err() {
            warn!("failed to install watch on predecessor key");
            fire(&mut callback, false);
            return;
        }

        loop {
            let next = tokio::select! {
                _ = &mut shutdown_rx => {
                    fire(&mut callback, false);
                    return;
                }
                item = watch_reader.next() => item,
            };
            match next {
                Some(Ok(resp)) if resp.compact_revision != 0 => {
                    debug!(
                        compact_revision = resp.compact_revision,
                        "compact revision observed, re-running range query"
                    );
                    break;
                }
                Some(Ok(resp)) => {
                    let predecessor_deleted = resp
                        .events
                        .iter()
                        .any(|e| e.r#type == EventType::Delete as i32);
                    if predecessor_deleted {
                        break;
                    }
                }
                _ => {
                    warn!("watch stream failed while waiting on predecessor");
                    fire(&mut callback, false);
                    return;
                }
            }
        }
    }
}

fn fire(callback: &mut Option<Box<dyn FnOnce(bool) + Send>>, ok: bool) {
    if let Some(cb) = callback.take() {
        cb(ok);
    }
}

/// The canonical etcd "prefix" range end: the lexicographically
/// smallest key strictly greater than every key with this prefix,
/// computed by incrementing the prefix's last non-0xff byte.
fn prefix_range_end(prefix: &str) -> Vec<u8> {
    let mut end = prefix.as_bytes().to_vec();
    for i in (0..end.len()).rev() {
        if end[i] < 0xff {
            end[i] += 1;
            end.truncate(i + 1);
            return end;
        }
    }
    Vec::new()
}
