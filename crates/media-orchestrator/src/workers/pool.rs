//! Worker pool.
//!
//! Owns the media workers and their load counters (live routers per worker).
//! Each worker gets a watcher task that turns the engine's exit signal into a
//! [`WorkerDeath`] message for the orchestrator, which then runs the crash
//! cascade as a single mailbox step.

use crate::engine::{MediaEngine, WorkerId, WorkerInfo};
use crate::errors::OrchestratorError;
use crate::observability::metrics as prom;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Load at or below which a worker counts as idle when scaling down.
pub const DEFAULT_MIN_IDLE_LOAD: u64 = 1;

/// A worker died without being closed.
#[derive(Debug, Clone)]
pub struct WorkerDeath {
    pub worker_id: WorkerId,
    pub pid: u32,
    pub reason: String,
}

/// A pooled worker and its load counter.
#[derive(Debug)]
pub struct WorkerEntry {
    pub info: WorkerInfo,
    pub load: u64,
    watcher: CancellationToken,
}

/// Per-worker load, in pool order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLoad {
    pub worker_id: WorkerId,
    pub pid: u32,
    pub routers: u64,
}

/// Pool of media workers.
pub struct WorkerPool {
    engine: Arc<dyn MediaEngine>,
    workers: Vec<WorkerEntry>,
    deaths: mpsc::UnboundedSender<WorkerDeath>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Create an empty pool. Watchers report deaths on `deaths` and stop when
    /// `cancel` fires.
    #[must_use]
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        deaths: mpsc::UnboundedSender<WorkerDeath>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            workers: Vec::new(),
            deaths,
            cancel,
        }
    }

    /// Spawn `count` workers. Spawn failures are logged; returns how many
    /// workers were actually added.
    pub async fn initialize(&mut self, count: usize) -> usize {
        let mut spawned = 0;
        for _ in 0..count {
            if self.spawn_worker().await.is_ok() {
                spawned += 1;
            }
        }

        if spawned < count {
            warn!(
                target: "mo.workers.pool",
                requested = count,
                spawned,
                "Worker pool running below target size"
            );
        } else {
            info!(target: "mo.workers.pool", workers = spawned, "Worker pool initialized");
        }
        spawned
    }

    /// Spawn one worker and start its watcher.
    pub async fn spawn_worker(&mut self) -> Result<WorkerId, OrchestratorError> {
        let spawned = self.engine.spawn_worker().await.map_err(|e| {
            error!(target: "mo.workers.pool", error = %e, "Failed to spawn worker");
            e
        })?;

        let info = spawned.info;
        let watcher = self.cancel.child_token();
        let exited = spawned.exited;
        let deaths = self.deaths.clone();
        let worker_id = info.id.clone();
        let pid = info.pid;
        let token = watcher.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                exit = exited => {
                    // A dropped sender means the worker was closed on purpose.
                    if let Ok(exit) = exit {
                        let _ = deaths.send(WorkerDeath {
                            worker_id,
                            pid,
                            reason: exit.reason,
                        });
                    }
                }
            }
        });

        info!(
            target: "mo.workers.pool",
            worker_id = %info.id,
            pid = info.pid,
            "Worker added"
        );

        let id = info.id.clone();
        self.workers.push(WorkerEntry {
            info,
            load: 0,
            watcher,
        });
        prom::set_workers_active(self.workers.len());
        Ok(id)
    }

    /// Worker with the smallest load; first in pool order on ties.
    pub fn least_loaded(&self) -> Result<WorkerId, OrchestratorError> {
        let mut best: Option<&WorkerEntry> = None;
        for worker in &self.workers {
            if best.map_or(true, |b| worker.load < b.load) {
                best = Some(worker);
            }
        }
        best.map(|w| w.info.id.clone())
            .ok_or(OrchestratorError::NoWorkerAvailable)
    }

    pub fn increment_load(&mut self, worker_id: &WorkerId) {
        if let Some(worker) = self.entry_mut(worker_id) {
            worker.load += 1;
        }
    }

    /// Decrement a worker's load, floored at 0.
    pub fn decrement_load(&mut self, worker_id: &WorkerId) {
        if let Some(worker) = self.entry_mut(worker_id) {
            worker.load = worker.load.saturating_sub(1);
        }
    }

    #[must_use]
    pub fn load_of(&self, worker_id: &WorkerId) -> Option<u64> {
        self.entry(worker_id).map(|w| w.load)
    }

    /// First worker whose load is at most `max_load`.
    #[must_use]
    pub fn find_idle(&self, max_load: u64) -> Option<WorkerId> {
        self.workers
            .iter()
            .find(|w| w.load <= max_load)
            .map(|w| w.info.id.clone())
    }

    /// Remove a worker and close it on the engine. Close errors are logged.
    pub async fn remove(&mut self, worker_id: &WorkerId) -> Option<WorkerInfo> {
        let entry = self.forget(worker_id)?;
        if let Err(e) = self.engine.close_worker(worker_id).await {
            warn!(
                target: "mo.workers.pool",
                worker_id = %worker_id,
                error = %e,
                "Failed to close removed worker"
            );
        }
        info!(
            target: "mo.workers.pool",
            worker_id = %worker_id,
            pid = entry.info.pid,
            "Worker removed"
        );
        Some(entry.info)
    }

    /// Drop a worker from the pool without touching the engine (used for
    /// workers that already died).
    pub fn forget(&mut self, worker_id: &WorkerId) -> Option<WorkerEntry> {
        let index = self.workers.iter().position(|w| &w.info.id == worker_id)?;
        let entry = self.workers.remove(index);
        entry.watcher.cancel();
        prom::set_workers_active(self.workers.len());
        Some(entry)
    }

    /// Close every worker. Returns `(closed, failed)`; the pool is empty
    /// afterwards either way.
    pub async fn close_all(&mut self) -> (usize, usize) {
        let mut closed = 0;
        let mut failed = 0;
        for entry in self.workers.drain(..) {
            entry.watcher.cancel();
            match self.engine.close_worker(&entry.info.id).await {
                Ok(()) => closed += 1,
                Err(e) => {
                    failed += 1;
                    warn!(
                        target: "mo.workers.pool",
                        worker_id = %entry.info.id,
                        error = %e,
                        "Failed to close worker"
                    );
                }
            }
        }
        prom::set_workers_active(0);
        (closed, failed)
    }

    #[must_use]
    pub fn contains(&self, worker_id: &WorkerId) -> bool {
        self.entry(worker_id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    #[must_use]
    pub fn total_load(&self) -> u64 {
        self.workers.iter().map(|w| w.load).sum()
    }

    #[must_use]
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|w| w.info.id.clone()).collect()
    }

    #[must_use]
    pub fn pids(&self) -> Vec<u32> {
        self.workers.iter().map(|w| w.info.pid).collect()
    }

    #[must_use]
    pub fn loads(&self) -> Vec<WorkerLoad> {
        self.workers
            .iter()
            .map(|w| WorkerLoad {
                worker_id: w.info.id.clone(),
                pid: w.info.pid,
                routers: w.load,
            })
            .collect()
    }

    fn entry(&self, worker_id: &WorkerId) -> Option<&WorkerEntry> {
        self.workers.iter().find(|w| &w.info.id == worker_id)
    }

    fn entry_mut(&mut self, worker_id: &WorkerId) -> Option<&mut WorkerEntry> {
        self.workers.iter_mut().find(|w| &w.info.id == worker_id)
    }
}
