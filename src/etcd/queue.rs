//! The completion-queue runtime (C5): wraps every asynchronous
//! coordination-service operation and timer in a callback invoked
//! exactly once with an "ok" flag.
//!
//! `tokio`'s scheduler plays the role of a single reaper thread: each
//! operation is a spawned task racing its future against a
//! cancellation signal — the idiomatic Rust shape of "pull a tagged
//! completion off a queue and dispatch its callback". The tag ->
//! cancel-sender map is the operation arena: entries are removed
//! before the callback fires, and the `Arc` on the map itself is the
//! shared ownership that keeps the queue alive for every in-flight
//! operation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

/// Default period at which the reaper checks for shutdown.
pub const LOOP_TIMEOUT: Duration = Duration::from_millis(250);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<()>>>>;

/// A handle to an in-flight operation. Dropping it does not cancel the
/// operation; call [`cancel`](Self::cancel) explicitly.
#[derive(Clone)]
pub struct OperationHandle {
    tag: u64,
    pending: PendingMap,
}

impl OperationHandle {
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// Cancel the operation. A no-op if it has already completed.
    /// Otherwise its callback fires with `ok = false` and the entry is
    /// removed from the pending map.
    pub fn cancel(&self) {
        if let Some(tx) = self.pending.lock().unwrap().remove(&self.tag) {
            let _ = tx.send(());
        }
    }
}

/// The completion-queue runtime.
pub struct CompletionQueue {
    shutdown: Arc<AtomicBool>,
    next_tag: AtomicU64,
    pending: PendingMap,
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionQueue {
    pub fn new() -> Self {
        CompletionQueue {
            shutdown: Arc::new(AtomicBool::new(false)),
            next_tag: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of in-flight operations. Used by tests asserting no leak
    /// after cancellation or shutdown.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Submit `fut` to run to completion or be canceled. `callback` is
    /// invoked exactly once: `Some(value)` on success, `None` on error,
    /// cancellation, or shutdown.
    pub fn async_rpc<F, T>(
        &self,
        fut: F,
        callback: impl FnOnce(Option<T>) + Send + 'static,
    ) -> Option<OperationHandle>
    where
        F: Future<Output = Result<T, tonic::Status>> + Send + 'static,
        T: Send + 'static,
    {
        if self.shutdown.load(Ordering::SeqCst) {
            callback(None);
            return None;
        }
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(tag, cancel_tx);
        let pending = self.pending.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                res = fut => res.ok(),
                _ = cancel_rx => None,
            };
            pending.lock().unwrap().remove(&tag);
            callback(outcome);
        });
        Some(OperationHandle {
            tag,
            pending: self.pending.clone(),
        })
    }

    /// One-shot timer firing at `deadline`. `callback(ok)` fires
    /// exactly once: `true` if the timer ran to completion, `false` if
    /// canceled or the queue shut down first.
    pub fn make_deadline_timer(
        &self,
        deadline: Instant,
        callback: impl FnOnce(bool) + Send + 'static,
    ) -> Option<OperationHandle> {
        self.async_rpc(
            async move {
                tokio::time::sleep_until(deadline.into()).await;
                Ok::<(), tonic::Status>(())
            },
            move |res| callback(res.is_some()),
        )
    }

    /// Timer firing `delay` from now.
    pub fn make_relative_timer(
        &self,
        delay: Duration,
        callback: impl FnOnce(bool) + Send + 'static,
    ) -> Option<OperationHandle> {
        self.make_deadline_timer(Instant::now() + delay, callback)
    }

    /// Shut the queue down: no further operations may be submitted, and
    /// every currently pending operation is canceled so its callback
    /// drains with `ok = false`.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let mut pending = self.pending.lock().unwrap();
        for (_, tx) in pending.drain() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::time::{sleep, Duration as TokioDuration};

    #[tokio::test]
    async fn timer_cancel_fires_once_with_ok_false() {
        let queue = CompletionQueue::new();
        let calls = Arc::new(AtomicU32::new(0));
        let seen_ok = Arc::new(Mutex::new(None));

        let calls2 = calls.clone();
        let seen_ok2 = seen_ok.clone();
        let handle = queue
            .make_relative_timer(Duration::from_millis(10), move |ok| {
                calls2.fetch_add(1, Ordering::SeqCst);
                *seen_ok2.lock().unwrap() = Some(ok);
            })
            .expect("queue is not shut down");

        assert_eq!(queue.pending_count(), 1);
        handle.cancel();

        sleep(TokioDuration::from_millis(20)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen_ok.lock().unwrap(), Some(false));
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn timer_left_uncanceled_fires_true() {
        let queue = CompletionQueue::new();
        let (tx, rx) = oneshot::channel();
        queue.make_relative_timer(Duration::from_millis(5), move |ok| {
            let _ = tx.send(ok);
        });
        let ok = rx.await.unwrap();
        assert!(ok);
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_all_pending_operations() {
        let queue = CompletionQueue::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        queue.make_relative_timer(Duration::from_secs(60), move |ok| {
            let _ = tx1.send(ok);
        });
        queue.make_relative_timer(Duration::from_secs(60), move |ok| {
            let _ = tx2.send(ok);
        });
        assert_eq!(queue.pending_count(), 2);

        queue.shutdown();

        assert!(!rx1.await.unwrap());
        assert!(!rx2.await.unwrap());
        assert_eq!(queue.pending_count(), 0);
        assert!(queue.is_shutdown());
    }

    #[tokio::test]
    async fn operations_rejected_after_shutdown() {
        let queue = CompletionQueue::new();
        queue.shutdown();
        let (tx, rx) = oneshot::channel();
        let handle = queue.make_relative_timer(Duration::from_millis(1), move |ok| {
            let _ = tx.send(ok);
        });
        assert!(handle.is_none());
        assert!(!rx.await.unwrap());
    }
}
