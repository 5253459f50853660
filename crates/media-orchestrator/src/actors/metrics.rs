//! Load counters shared between the orchestrator actor and background tasks.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Aggregate load published to peers.
///
/// Written by the orchestrator actor after every mutation, read by the load
/// publisher without going through the mailbox. All fields are atomic.
#[derive(Debug, Default)]
pub struct LoadMetrics {
    /// Sum of all worker load counters (live routers).
    total_routers: AtomicU64,
    /// Current pool size.
    workers: AtomicUsize,
}

/// Snapshot of load metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadMetricsSnapshot {
    pub total_routers: u64,
    pub workers: usize,
}

impl LoadMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_total_routers(&self, count: u64) {
        self.total_routers.store(count, Ordering::SeqCst);
    }

    pub fn set_workers(&self, count: usize) {
        self.workers.store(count, Ordering::SeqCst);
    }

    #[must_use]
    pub fn total_routers(&self) -> u64 {
        self.total_routers.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn snapshot(&self) -> LoadMetricsSnapshot {
        LoadMetricsSnapshot {
            total_routers: self.total_routers(),
            workers: self.workers(),
        }
    }
}
