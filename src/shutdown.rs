//! Graceful teardown of open event streams.
//!
//! Event streams never end on their own, so server shutdown has to tell each
//! of them to finish and then wait until they actually have.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};

#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    /// Flips to true once shutdown starts
    shutdown_tx: watch::Sender<bool>,
    /// Open event streams
    open: AtomicUsize,
    /// Notified when the last stream closes
    all_closed: Notify,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                shutdown_tx,
                open: AtomicUsize::new(0),
                all_closed: Notify::new(),
            }),
        }
    }

    /// Track a new event stream. The guard must live as long as the stream.
    pub fn register(&self) -> (StreamGuard, watch::Receiver<bool>) {
        self.inner.open.fetch_add(1, Ordering::SeqCst);
        let guard = StreamGuard {
            inner: self.inner.clone(),
        };
        (guard, self.signal())
    }

    /// Receiver for the shutdown flag, for background tasks that are not
    /// streams (the heartbeat).
    pub fn signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown_tx.subscribe()
    }

    pub fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    /// Wait until every registered stream has closed.
    pub async fn wait_for_all_closed(&self) {
        loop {
            let notified = self.inner.all_closed.notified();
            let count = self.inner.open.load(Ordering::SeqCst);
            if count == 0 {
                return;
            }
            tracing::debug!(count, "waiting for event streams to close");
            notified.await;
        }
    }

    pub fn open_count(&self) -> usize {
        self.inner.open.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the open-stream count when dropped.
pub struct StreamGuard {
    inner: Arc<Inner>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let prev = self.inner.open.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 {
            self.inner.all_closed.notify_waiters();
        }
    }
}
