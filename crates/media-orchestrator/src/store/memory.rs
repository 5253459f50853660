//! In-memory session store.
//!
//! Used when no Redis URL is configured and by tests. Write and delete
//! failures can be injected to exercise the persistence-failure paths.

use super::{AvailableServer, ProducerRecord, RouterMapping, SessionStore, TransportRecord};
use crate::engine::{ProducerId, TransportId};
use crate::errors::OrchestratorError;
use chrono::{DateTime, Utc};
use common::types::ConsultationId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    routers: HashMap<ConsultationId, RouterMapping>,
    transports: HashMap<TransportId, TransportRecord>,
    producers: HashMap<ProducerId, ProducerRecord>,
    servers: Vec<AvailableServer>,
    fail_writes: bool,
    fail_deletes: bool,
}

/// In-memory [`SessionStore`]. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a media server record.
    #[must_use]
    pub fn with_server(self, server: AvailableServer) -> Self {
        self.inner().servers.push(server);
        self
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.inner().fail_writes = fail;
    }

    /// Make every subsequent delete fail (or succeed again).
    pub fn fail_deletes(&self, fail: bool) {
        self.inner().fail_deletes = fail;
    }

    #[must_use]
    pub fn router_mapping(&self, consultation_id: ConsultationId) -> Option<RouterMapping> {
        self.inner().routers.get(&consultation_id).cloned()
    }

    #[must_use]
    pub fn transport(&self, transport_id: &TransportId) -> Option<TransportRecord> {
        self.inner().transports.get(transport_id).cloned()
    }

    #[must_use]
    pub fn producer(&self, producer_id: &ProducerId) -> Option<ProducerRecord> {
        self.inner().producers.get(producer_id).cloned()
    }

    #[must_use]
    pub fn router_mapping_count(&self) -> usize {
        self.inner().routers.len()
    }

    #[must_use]
    pub fn transport_count(&self) -> usize {
        self.inner().transports.len()
    }

    #[must_use]
    pub fn producer_count(&self) -> usize {
        self.inner().producers.len()
    }

    /// Insert a transport record directly, bypassing failure injection.
    pub fn insert_transport(&self, record: TransportRecord) {
        self.inner()
            .transports
            .insert(record.transport_id.clone(), record);
    }
}

fn write_guard(inner: &Inner, operation: &str) -> Result<(), OrchestratorError> {
    if inner.fail_writes {
        return Err(OrchestratorError::Persistence(format!(
            "{operation}: store unavailable"
        )));
    }
    Ok(())
}

fn delete_guard(inner: &Inner, operation: &str) -> Result<(), OrchestratorError> {
    if inner.fail_deletes {
        return Err(OrchestratorError::Persistence(format!(
            "{operation}: store unavailable"
        )));
    }
    Ok(())
}

#[async_trait::async_trait]
impl SessionStore for InMemoryStore {
    async fn save_router_mapping(&self, mapping: &RouterMapping) -> Result<(), OrchestratorError> {
        let mut inner = self.inner();
        write_guard(&inner, "save_router_mapping")?;
        inner
            .routers
            .insert(mapping.consultation_id, mapping.clone());
        Ok(())
    }

    async fn delete_router_mapping(
        &self,
        consultation_id: ConsultationId,
    ) -> Result<(), OrchestratorError> {
        let mut inner = self.inner();
        delete_guard(&inner, "delete_router_mapping")?;
        inner.routers.remove(&consultation_id);
        Ok(())
    }

    async fn save_transport(&self, record: &TransportRecord) -> Result<(), OrchestratorError> {
        let mut inner = self.inner();
        write_guard(&inner, "save_transport")?;
        inner
            .transports
            .insert(record.transport_id.clone(), record.clone());
        Ok(())
    }

    async fn delete_transport(&self, transport_id: &TransportId) -> Result<(), OrchestratorError> {
        let mut inner = self.inner();
        delete_guard(&inner, "delete_transport")?;
        inner.transports.remove(transport_id);
        Ok(())
    }

    async fn transports_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TransportRecord>, OrchestratorError> {
        let mut records: Vec<TransportRecord> = self
            .inner()
            .transports
            .values()
            .filter(|r| r.created_at < cutoff)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn save_producer(&self, record: &ProducerRecord) -> Result<(), OrchestratorError> {
        let mut inner = self.inner();
        write_guard(&inner, "save_producer")?;
        inner
            .producers
            .insert(record.producer_id.clone(), record.clone());
        Ok(())
    }

    async fn delete_producer(&self, producer_id: &ProducerId) -> Result<(), OrchestratorError> {
        let mut inner = self.inner();
        delete_guard(&inner, "delete_producer")?;
        inner.producers.remove(producer_id);
        Ok(())
    }

    async fn find_active_servers(&self) -> Result<Vec<AvailableServer>, OrchestratorError> {
        Ok(self
            .inner()
            .servers
            .iter()
            .filter(|s| s.is_active)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::engine::RouterId;
    use crate::session::TransportRole;
    use common::types::ServerId;

    fn transport_record(id: &str, created_at: DateTime<Utc>) -> TransportRecord {
        TransportRecord {
            transport_id: TransportId::from(id),
            consultation_id: ConsultationId(1),
            router_id: RouterId::from("r-1"),
            participant_id: None,
            role: TransportRole::Producer,
            server_id: ServerId::from("mo-a"),
            created_at,
        }
    }

    #[tokio::test]
    async fn test_find_active_servers_skips_inactive() {
        let store = InMemoryStore::new()
            .with_server(AvailableServer {
                server_id: ServerId::from("mo-a"),
                address: "10.0.0.1".to_string(),
                max_routers: 100,
                is_active: false,
            })
            .with_server(AvailableServer {
                server_id: ServerId::from("mo-b"),
                address: "10.0.0.2".to_string(),
                max_routers: 100,
                is_active: true,
            });

        let active = store.find_active_servers().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].server_id, ServerId::from("mo-b"));
    }

    #[tokio::test]
    async fn test_transports_created_before_is_exclusive_and_sorted() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.insert_transport(transport_record("newer", now - chrono::Duration::hours(3)));
        store.insert_transport(transport_record("older", now - chrono::Duration::hours(5)));
        store.insert_transport(transport_record("fresh", now));

        let stale = store.transports_created_before(now).await.unwrap();
        let ids: Vec<&str> = stale.iter().map(|r| r.transport_id.as_str()).collect();
        assert_eq!(ids, vec!["older", "newer"]);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = InMemoryStore::new();
        store.fail_writes(true);
        let record = transport_record("t-1", Utc::now());
        let err = store.save_transport(&record).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Persistence(_)));
        assert_eq!(store.transport_count(), 0);

        store.fail_writes(false);
        store.save_transport(&record).await.unwrap();
        store.fail_deletes(true);
        assert!(store.delete_transport(&record.transport_id).await.is_err());
        assert_eq!(store.transport_count(), 1);
    }
}
