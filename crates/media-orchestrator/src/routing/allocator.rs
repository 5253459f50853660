//! Router allocation per consultation.
//!
//! One router per consultation, placed on the least-loaded local worker.
//! The allocator owns the consultation to router map and keeps the worker
//! load counters in step with it: every registered router accounts for
//! exactly one unit of load on its hosting worker.

use super::codecs::baseline_codecs;
use crate::engine::{MediaEngine, RouterHandle, RtpCodecCapability, WorkerId};
use crate::errors::OrchestratorError;
use crate::observability::metrics as prom;
use crate::store::{AvailableServer, RouterMapping, SessionStore};
use crate::workers::WorkerPool;
use chrono::{DateTime, Utc};
use common::types::{ConsultationId, ServerId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// A consultation's routing context.
#[derive(Debug, Clone)]
pub struct RouterEntry {
    pub consultation_id: ConsultationId,
    pub router: RouterHandle,
    pub server_id: ServerId,
    pub created_at: DateTime<Utc>,
}

/// Pick the hosting server record: the advisory server if it is active,
/// otherwise the first active record.
pub async fn resolve_hosting_server(
    store: &dyn SessionStore,
    preferred: &ServerId,
) -> Result<AvailableServer, OrchestratorError> {
    let mut servers = store.find_active_servers().await?;
    if let Some(index) = servers.iter().position(|s| &s.server_id == preferred) {
        return Ok(servers.swap_remove(index));
    }
    servers
        .into_iter()
        .next()
        .ok_or(OrchestratorError::NoMediaServerAvailable)
}

/// Allocates and releases routers.
pub struct RouterAllocator {
    engine: Arc<dyn MediaEngine>,
    store: Arc<dyn SessionStore>,
    codecs: Vec<RtpCodecCapability>,
    routers: HashMap<ConsultationId, RouterEntry>,
}

impl RouterAllocator {
    #[must_use]
    pub fn new(engine: Arc<dyn MediaEngine>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            engine,
            store,
            codecs: baseline_codecs(),
            routers: HashMap::new(),
        }
    }

    /// Create the router for a consultation.
    ///
    /// # Errors
    ///
    /// - `RouterExists` if the consultation already has a router
    /// - `NoWorkerAvailable` if the pool is empty
    /// - `NoMediaServerAvailable` if no active server record exists
    /// - `Persistence` if the server registry cannot be read
    /// - `Engine` if the engine refuses to create the router
    #[instrument(skip_all, fields(consultation_id = %consultation_id))]
    pub async fn create_router_for_consultation(
        &mut self,
        consultation_id: ConsultationId,
        pool: &mut WorkerPool,
        preferred_server: &ServerId,
    ) -> Result<RouterHandle, OrchestratorError> {
        if self.routers.contains_key(&consultation_id) {
            return Err(OrchestratorError::RouterExists(consultation_id.to_string()));
        }

        let started = Instant::now();
        let worker_id = pool.least_loaded()?;
        let server = resolve_hosting_server(self.store.as_ref(), preferred_server).await?;
        let router = self.engine.create_router(&worker_id, &self.codecs).await?;
        let created_at = Utc::now();

        let mapping = RouterMapping {
            consultation_id,
            router_id: router.id.clone(),
            worker_id: worker_id.clone(),
            server_id: server.server_id.clone(),
            created_at,
        };
        if let Err(e) = self.store.save_router_mapping(&mapping).await {
            prom::record_persistence_failure("save_router_mapping");
            warn!(
                target: "mo.routing",
                consultation_id = %consultation_id,
                error = %e,
                "Failed to persist router mapping"
            );
        }

        self.routers.insert(
            consultation_id,
            RouterEntry {
                consultation_id,
                router: router.clone(),
                server_id: server.server_id,
                created_at,
            },
        );
        pool.increment_load(&worker_id);
        prom::record_router_create_duration(started.elapsed());

        info!(
            target: "mo.routing",
            consultation_id = %consultation_id,
            router_id = %router.id,
            worker_id = %worker_id,
            "Router created"
        );

        Ok(router)
    }

    #[must_use]
    pub fn get_router(&self, consultation_id: ConsultationId) -> Option<&RouterHandle> {
        self.routers.get(&consultation_id).map(|e| &e.router)
    }

    #[must_use]
    pub fn entry(&self, consultation_id: ConsultationId) -> Option<&RouterEntry> {
        self.routers.get(&consultation_id)
    }

    /// Release a consultation's router. Returns false (after a warning) if
    /// the consultation has none.
    ///
    /// Engine close and durable delete failures are logged; the in-memory
    /// entry and the load counter are always updated.
    #[instrument(skip_all, fields(consultation_id = %consultation_id))]
    pub async fn cleanup_router_for_consultation(
        &mut self,
        consultation_id: ConsultationId,
        pool: &mut WorkerPool,
    ) -> bool {
        let Some(entry) = self.routers.remove(&consultation_id) else {
            warn!(
                target: "mo.routing",
                consultation_id = %consultation_id,
                "No router to clean up"
            );
            return false;
        };

        let worker_id = entry.router.worker_id.clone();
        if let Err(e) = self.engine.close_router(&entry.router.id).await {
            warn!(
                target: "mo.routing",
                consultation_id = %consultation_id,
                router_id = %entry.router.id,
                error = %e,
                "Failed to close router"
            );
        }
        pool.decrement_load(&worker_id);

        if let Err(e) = self.store.delete_router_mapping(consultation_id).await {
            prom::record_persistence_failure("delete_router_mapping");
            warn!(
                target: "mo.routing",
                consultation_id = %consultation_id,
                error = %e,
                "Failed to delete router mapping"
            );
        }

        info!(
            target: "mo.routing",
            consultation_id = %consultation_id,
            router_id = %entry.router.id,
            worker_id = %worker_id,
            "Router cleaned up"
        );
        true
    }

    /// Consultations whose router lives on the given worker, sorted.
    #[must_use]
    pub fn consultations_on(&self, worker_id: &WorkerId) -> Vec<ConsultationId> {
        let mut ids: Vec<ConsultationId> = self
            .routers
            .values()
            .filter(|e| &e.router.worker_id == worker_id)
            .map(|e| e.consultation_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routers.is_empty()
    }

    /// Close every router (shutdown). Durable mappings are kept for recovery.
    /// Returns `(closed, failed)`; the map is empty afterwards.
    pub async fn close_all(&mut self, pool: &mut WorkerPool) -> (usize, usize) {
        let mut closed = 0;
        let mut failed = 0;
        for (consultation_id, entry) in self.routers.drain() {
            pool.decrement_load(&entry.router.worker_id);
            match self.engine.close_router(&entry.router.id).await {
                Ok(()) => closed += 1,
                Err(e) => {
                    failed += 1;
                    warn!(
                        target: "mo.routing",
                        consultation_id = %consultation_id,
                        error = %e,
                        "Failed to close router during shutdown"
                    );
                }
            }
        }
        debug!(target: "mo.routing", closed, failed, "Routers closed");
        (closed, failed)
    }
}
