//! Shutdown signalling and in-flight request tracking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Shutdown trigger shared by every long-running task.
///
/// Backed by a watch channel, so tasks that subscribe after the trigger
/// still observe it.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Trigger shutdown. Returns false if it was already triggered.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                true
            }
        })
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once shutdown has been triggered.
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Number of outstanding receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(1);

/// Counts requests between entry and response.
#[derive(Debug, Clone)]
pub struct InFlightTracker {
    active: Arc<watch::Sender<u64>>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { active: Arc::new(tx) }
    }

    /// Record a request entering the pipeline. Dropping the guard records its exit.
    pub fn track(&self) -> InFlightGuard {
        self.active.send_modify(|n| *n += 1);
        InFlightGuard {
            active: Arc::clone(&self.active),
            seq: REQUEST_SEQ.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn active_count(&self) -> u64 {
        *self.active.borrow()
    }

    /// Wait until no request is in flight. Returns false if `timeout`
    /// elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let mut rx = self.active.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}

impl Default for InFlightTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    active: Arc<watch::Sender<u64>>,
    seq: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n = n.saturating_sub(1));
        tracing::trace!(seq = self.seq, "Request left the pipeline");
    }
}
