//! Transport, producer and consumer bookkeeping.
//!
//! Closing a transport does not close its producers or consumers; callers
//! close children explicitly (the participant and session paths in the
//! orchestrator do so in consumer, producer, transport order).
//!
//! Durable records are best effort: a failed write or delete is logged and
//! counted, the in-memory entry stays authoritative.

use crate::engine::{
    ConsumerHandle, ConsumerId, MediaEngine, MediaKind, ProducerHandle, ProducerId, RouterId,
    TransportHandle, TransportId, TransportOptions,
};
use crate::errors::OrchestratorError;
use crate::observability::metrics as prom;
use crate::routing::RouterEntry;
use crate::store::{ProducerRecord, SessionStore, TransportRecord};
use chrono::{DateTime, Utc};
use common::types::{ConsultationId, ParticipantId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Direction of a transport from the participant's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportRole {
    /// Carries the participant's outgoing media (producers).
    Producer,
    /// Carries media to the participant (consumers).
    Consumer,
}

impl TransportRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportRole::Producer => "producer",
            TransportRole::Consumer => "consumer",
        }
    }
}

/// Transport lifecycle. `Closed` is terminal and may follow `Created`
/// directly when the remote side never connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Created,
    Connected,
    Closed,
}

#[derive(Debug, Clone)]
pub struct TrackedTransport {
    pub handle: TransportHandle,
    pub consultation_id: ConsultationId,
    pub router_id: RouterId,
    pub role: TransportRole,
    pub participant_id: Option<ParticipantId>,
    pub state: TransportState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TrackedProducer {
    pub handle: ProducerHandle,
    pub consultation_id: ConsultationId,
    pub app_data: Value,
}

#[derive(Debug, Clone)]
pub struct TrackedConsumer {
    pub handle: ConsumerHandle,
    pub consultation_id: ConsultationId,
}

/// Outcome of closing a whole collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseOutcome {
    pub closed: usize,
    pub failed: usize,
}

impl CloseOutcome {
    fn record(&mut self, ok: bool) {
        if ok {
            self.closed += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Owns transports, producers and consumers.
pub struct SessionTracker {
    engine: Arc<dyn MediaEngine>,
    store: Arc<dyn SessionStore>,
    transport_options: TransportOptions,
    consumers_start_paused: bool,
    transports: HashMap<TransportId, TrackedTransport>,
    producers: HashMap<ProducerId, TrackedProducer>,
    consumers: HashMap<ConsumerId, TrackedConsumer>,
}

impl SessionTracker {
    #[must_use]
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        store: Arc<dyn SessionStore>,
        transport_options: TransportOptions,
        consumers_start_paused: bool,
    ) -> Self {
        Self {
            engine,
            store,
            transport_options,
            consumers_start_paused,
            transports: HashMap::new(),
            producers: HashMap::new(),
            consumers: HashMap::new(),
        }
    }

    /// Create a transport on a consultation's router.
    pub async fn create_transport(
        &mut self,
        router: &RouterEntry,
        role: TransportRole,
        participant_id: Option<ParticipantId>,
    ) -> Result<TransportHandle, OrchestratorError> {
        let handle = self
            .engine
            .create_transport(&router.router.id, &self.transport_options)
            .await?;
        let created_at = Utc::now();

        let record = TransportRecord {
            transport_id: handle.id.clone(),
            consultation_id: router.consultation_id,
            router_id: router.router.id.clone(),
            participant_id,
            role,
            server_id: router.server_id.clone(),
            created_at,
        };
        if let Err(e) = self.store.save_transport(&record).await {
            prom::record_persistence_failure("save_transport");
            warn!(
                target: "mo.session",
                transport_id = %handle.id,
                error = %e,
                "Failed to persist transport record"
            );
        }

        self.transports.insert(
            handle.id.clone(),
            TrackedTransport {
                handle: handle.clone(),
                consultation_id: router.consultation_id,
                router_id: router.router.id.clone(),
                role,
                participant_id,
                state: TransportState::Created,
                created_at,
            },
        );

        debug!(
            target: "mo.session",
            consultation_id = %router.consultation_id,
            transport_id = %handle.id,
            role = role.as_str(),
            "Transport created"
        );
        Ok(handle)
    }

    pub async fn connect_transport(
        &mut self,
        transport_id: &TransportId,
        dtls_parameters: &Value,
    ) -> Result<(), OrchestratorError> {
        let transport = self
            .transports
            .get_mut(transport_id)
            .ok_or_else(|| OrchestratorError::TransportNotFound(transport_id.to_string()))?;

        self.engine
            .connect_transport(transport_id, dtls_parameters)
            .await?;
        transport.state = TransportState::Connected;

        debug!(target: "mo.session", transport_id = %transport_id, "Transport connected");
        Ok(())
    }

    pub async fn produce(
        &mut self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: &Value,
        app_data: Value,
    ) -> Result<ProducerHandle, OrchestratorError> {
        let consultation_id = self
            .transports
            .get(transport_id)
            .map(|t| t.consultation_id)
            .ok_or_else(|| OrchestratorError::TransportNotFound(transport_id.to_string()))?;

        let handle = self
            .engine
            .produce(transport_id, kind, rtp_parameters)
            .await?;

        let record = ProducerRecord {
            producer_id: handle.id.clone(),
            transport_id: transport_id.clone(),
            consultation_id,
            kind,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.save_producer(&record).await {
            prom::record_persistence_failure("save_producer");
            warn!(
                target: "mo.session",
                producer_id = %handle.id,
                error = %e,
                "Failed to persist producer record"
            );
        }

        self.producers.insert(
            handle.id.clone(),
            TrackedProducer {
                handle: handle.clone(),
                consultation_id,
                app_data,
            },
        );

        debug!(
            target: "mo.session",
            consultation_id = %consultation_id,
            producer_id = %handle.id,
            kind = %kind,
            "Producer created"
        );
        Ok(handle)
    }

    /// Create a consumer of `producer_id` on `transport_id`. The producer
    /// must belong to the same consultation as the transport.
    pub async fn consume(
        &mut self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &Value,
    ) -> Result<ConsumerHandle, OrchestratorError> {
        let consultation_id = self
            .transports
            .get(transport_id)
            .map(|t| t.consultation_id)
            .ok_or_else(|| OrchestratorError::TransportNotFound(transport_id.to_string()))?;
        match self.producers.get(producer_id) {
            Some(producer) if producer.consultation_id == consultation_id => {}
            Some(producer) => {
                warn!(
                    target: "mo.session",
                    consultation_id = %consultation_id,
                    producer_consultation_id = %producer.consultation_id,
                    producer_id = %producer_id,
                    "Rejected consume across consultations"
                );
                return Err(OrchestratorError::ProducerNotFound(producer_id.to_string()));
            }
            None => return Err(OrchestratorError::ProducerNotFound(producer_id.to_string())),
        }

        let handle = self
            .engine
            .consume(
                transport_id,
                producer_id,
                rtp_capabilities,
                self.consumers_start_paused,
            )
            .await?;

        self.consumers.insert(
            handle.id.clone(),
            TrackedConsumer {
                handle: handle.clone(),
                consultation_id,
            },
        );

        debug!(
            target: "mo.session",
            consultation_id = %consultation_id,
            consumer_id = %handle.id,
            producer_id = %producer_id,
            paused = handle.paused,
            "Consumer created"
        );
        Ok(handle)
    }

    /// Close a transport. Its producers and consumers stay registered.
    pub async fn close_transport(
        &mut self,
        transport_id: &TransportId,
    ) -> Result<TrackedTransport, OrchestratorError> {
        let mut transport = self
            .transports
            .remove(transport_id)
            .ok_or_else(|| OrchestratorError::TransportNotFound(transport_id.to_string()))?;

        if let Err(e) = self.engine.close_transport(transport_id).await {
            warn!(
                target: "mo.session",
                transport_id = %transport_id,
                error = %e,
                "Engine failed to close transport"
            );
        }
        self.delete_transport_record(transport_id).await;
        transport.state = TransportState::Closed;

        debug!(target: "mo.session", transport_id = %transport_id, "Transport closed");
        Ok(transport)
    }

    pub async fn close_producer(&mut self, producer_id: &ProducerId) -> Result<(), OrchestratorError> {
        self.producers
            .remove(producer_id)
            .ok_or_else(|| OrchestratorError::ProducerNotFound(producer_id.to_string()))?;

        if let Err(e) = self.engine.close_producer(producer_id).await {
            warn!(
                target: "mo.session",
                producer_id = %producer_id,
                error = %e,
                "Engine failed to close producer"
            );
        }
        self.delete_producer_record(producer_id).await;

        debug!(target: "mo.session", producer_id = %producer_id, "Producer closed");
        Ok(())
    }

    pub async fn close_consumer(&mut self, consumer_id: &ConsumerId) -> Result<(), OrchestratorError> {
        self.consumers
            .remove(consumer_id)
            .ok_or_else(|| OrchestratorError::ConsumerNotFound(consumer_id.to_string()))?;

        if let Err(e) = self.engine.close_consumer(consumer_id).await {
            warn!(
                target: "mo.session",
                consumer_id = %consumer_id,
                error = %e,
                "Engine failed to close consumer"
            );
        }

        debug!(target: "mo.session", consumer_id = %consumer_id, "Consumer closed");
        Ok(())
    }

    /// Close a transport that may only exist as a durable record. Returns
    /// true if it was tracked in memory.
    pub async fn reap_transport(&mut self, transport_id: &TransportId) -> bool {
        if self.close_transport(transport_id).await.is_ok() {
            return true;
        }
        // Untracked: the engine close fails for handles this process never
        // created, which is expected after a restart.
        if let Err(e) = self.engine.close_transport(transport_id).await {
            debug!(
                target: "mo.session",
                transport_id = %transport_id,
                error = %e,
                "Untracked hanging transport not closable on engine"
            );
        }
        self.delete_transport_record(transport_id).await;
        false
    }

    async fn delete_transport_record(&self, transport_id: &TransportId) {
        if let Err(e) = self.store.delete_transport(transport_id).await {
            prom::record_persistence_failure("delete_transport");
            warn!(
                target: "mo.session",
                transport_id = %transport_id,
                error = %e,
                "Failed to delete transport record"
            );
        }
    }

    async fn delete_producer_record(&self, producer_id: &ProducerId) {
        if let Err(e) = self.store.delete_producer(producer_id).await {
            prom::record_persistence_failure("delete_producer");
            warn!(
                target: "mo.session",
                producer_id = %producer_id,
                error = %e,
                "Failed to delete producer record"
            );
        }
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    #[must_use]
    pub fn transport(&self, transport_id: &TransportId) -> Option<&TrackedTransport> {
        self.transports.get(transport_id)
    }

    #[must_use]
    pub fn producer(&self, producer_id: &ProducerId) -> Option<&TrackedProducer> {
        self.producers.get(producer_id)
    }

    #[must_use]
    pub fn consumer(&self, consumer_id: &ConsumerId) -> Option<&TrackedConsumer> {
        self.consumers.get(consumer_id)
    }

    /// Transports of a consultation, optionally restricted to one participant.
    #[must_use]
    pub fn transports_of(
        &self,
        consultation_id: ConsultationId,
        participant_id: Option<ParticipantId>,
    ) -> Vec<TransportId> {
        let mut ids: Vec<TransportId> = self
            .transports
            .values()
            .filter(|t| t.consultation_id == consultation_id)
            .filter(|t| participant_id.map_or(true, |p| t.participant_id == Some(p)))
            .map(|t| t.handle.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Producers living on any of the given transports.
    #[must_use]
    pub fn producers_on(&self, transports: &HashSet<TransportId>) -> Vec<ProducerId> {
        let mut ids: Vec<ProducerId> = self
            .producers
            .values()
            .filter(|p| transports.contains(&p.handle.transport_id))
            .map(|p| p.handle.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Consumers living on any of the given transports or consuming any of
    /// the given producers.
    #[must_use]
    pub fn consumers_touching(
        &self,
        transports: &HashSet<TransportId>,
        producers: &HashSet<ProducerId>,
    ) -> Vec<ConsumerId> {
        let mut ids: Vec<ConsumerId> = self
            .consumers
            .values()
            .filter(|c| {
                transports.contains(&c.handle.transport_id)
                    || producers.contains(&c.handle.producer_id)
            })
            .map(|c| c.handle.id.clone())
            .collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn producers_of_consultation(&self, consultation_id: ConsultationId) -> Vec<ProducerId> {
        let mut ids: Vec<ProducerId> = self
            .producers
            .values()
            .filter(|p| p.consultation_id == consultation_id)
            .map(|p| p.handle.id.clone())
            .collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn consumers_of_consultation(&self, consultation_id: ConsultationId) -> Vec<ConsumerId> {
        let mut ids: Vec<ConsumerId> = self
            .consumers
            .values()
            .filter(|c| c.consultation_id == consultation_id)
            .map(|c| c.handle.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Tracked transports created strictly before `cutoff`.
    #[must_use]
    pub fn transports_created_before(&self, cutoff: DateTime<Utc>) -> Vec<TransportId> {
        let mut ids: Vec<TransportId> = self
            .transports
            .values()
            .filter(|t| t.created_at < cutoff)
            .map(|t| t.handle.id.clone())
            .collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }

    #[must_use]
    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    pub async fn close_all_consumers(&mut self) -> CloseOutcome {
        let mut outcome = CloseOutcome::default();
        for (id, _) in std::mem::take(&mut self.consumers) {
            let result = self.engine.close_consumer(&id).await;
            if let Err(e) = &result {
                warn!(target: "mo.session", consumer_id = %id, error = %e, "Failed to close consumer");
            }
            outcome.record(result.is_ok());
        }
        info!(target: "mo.session", closed = outcome.closed, failed = outcome.failed, "Consumers closed");
        outcome
    }

    pub async fn close_all_producers(&mut self) -> CloseOutcome {
        let mut outcome = CloseOutcome::default();
        for (id, _) in std::mem::take(&mut self.producers) {
            let result = self.engine.close_producer(&id).await;
            if let Err(e) = &result {
                warn!(target: "mo.session", producer_id = %id, error = %e, "Failed to close producer");
            }
            outcome.record(result.is_ok());
            self.delete_producer_record(&id).await;
        }
        info!(target: "mo.session", closed = outcome.closed, failed = outcome.failed, "Producers closed");
        outcome
    }

    pub async fn close_all_transports(&mut self) -> CloseOutcome {
        let mut outcome = CloseOutcome::default();
        for (id, _) in std::mem::take(&mut self.transports) {
            let result = self.engine.close_transport(&id).await;
            if let Err(e) = &result {
                warn!(target: "mo.session", transport_id = %id, error = %e, "Failed to close transport");
            }
            outcome.record(result.is_ok());
            self.delete_transport_record(&id).await;
        }
        info!(target: "mo.session", closed = outcome.closed, failed = outcome.failed, "Transports closed");
        outcome
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::{EngineCall, InProcessEngine, RtpCapabilities};
    use crate::routing::baseline_codecs;
    use crate::store::InMemoryStore;
    use common::types::ServerId;
    use serde_json::json;
    use std::net::{IpAddr, Ipv4Addr};

    fn options() -> TransportOptions {
        TransportOptions {
            listen_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            announced_address: None,
            port_min: 40000,
            port_max: 40100,
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
        }
    }

    async fn setup() -> (SessionTracker, RouterEntry, Arc<InProcessEngine>, InMemoryStore) {
        let engine = Arc::new(InProcessEngine::new());
        let worker = engine.spawn_worker().await.unwrap();
        let router = engine
            .create_router(&worker.info.id, &baseline_codecs())
            .await
            .unwrap();
        let entry = RouterEntry {
            consultation_id: ConsultationId(101),
            router,
            server_id: ServerId::from("mo-a"),
            created_at: Utc::now(),
        };
        let store = InMemoryStore::new();
        let tracker = SessionTracker::new(
            engine.clone(),
            Arc::new(store.clone()),
            options(),
            false,
        );
        (tracker, entry, engine, store)
    }

    fn dtls() -> Value {
        json!({ "role": "client", "fingerprints": [{ "algorithm": "sha-256", "value": "AA" }] })
    }

    fn caps() -> Value {
        serde_json::to_value(RtpCapabilities {
            codecs: baseline_codecs(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_transport_lifecycle() {
        let (mut tracker, router, _engine, store) = setup().await;

        let transport = tracker
            .create_transport(&router, TransportRole::Producer, Some(ParticipantId(1)))
            .await
            .unwrap();
        assert_eq!(
            tracker.transport(&transport.id).unwrap().state,
            TransportState::Created
        );
        assert_eq!(
            store.transport(&transport.id).unwrap().role,
            TransportRole::Producer
        );

        tracker.connect_transport(&transport.id, &dtls()).await.unwrap();
        assert_eq!(
            tracker.transport(&transport.id).unwrap().state,
            TransportState::Connected
        );

        let closed = tracker.close_transport(&transport.id).await.unwrap();
        assert_eq!(closed.state, TransportState::Closed);
        assert!(store.transport(&transport.id).is_none());
        assert_eq!(tracker.transport_count(), 0);
    }

    #[tokio::test]
    async fn test_close_without_connect() {
        let (mut tracker, router, _engine, _store) = setup().await;
        let transport = tracker
            .create_transport(&router, TransportRole::Consumer, None)
            .await
            .unwrap();

        let closed = tracker.close_transport(&transport.id).await.unwrap();
        assert_eq!(closed.state, TransportState::Closed);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let (mut tracker, _router, _engine, _store) = setup().await;
        let unknown = TransportId::from("missing");

        assert!(matches!(
            tracker.connect_transport(&unknown, &dtls()).await,
            Err(OrchestratorError::TransportNotFound(_))
        ));
        assert!(matches!(
            tracker
                .produce(&unknown, MediaKind::Audio, &json!({}), Value::Null)
                .await,
            Err(OrchestratorError::TransportNotFound(_))
        ));
        assert!(matches!(
            tracker
                .consume(&unknown, &ProducerId::from("p"), &caps())
                .await,
            Err(OrchestratorError::TransportNotFound(_))
        ));
        assert!(matches!(
            tracker.close_transport(&unknown).await,
            Err(OrchestratorError::TransportNotFound(_))
        ));
        assert!(matches!(
            tracker.close_producer(&ProducerId::from("p")).await,
            Err(OrchestratorError::ProducerNotFound(_))
        ));
        assert!(matches!(
            tracker.close_consumer(&ConsumerId::from("c")).await,
            Err(OrchestratorError::ConsumerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_transport_close_does_not_cascade() {
        let (mut tracker, router, _engine, _store) = setup().await;
        let send = tracker
            .create_transport(&router, TransportRole::Producer, None)
            .await
            .unwrap();
        let recv = tracker
            .create_transport(&router, TransportRole::Consumer, None)
            .await
            .unwrap();
        let producer = tracker
            .produce(&send.id, MediaKind::Audio, &json!({}), json!({ "consultationId": 101 }))
            .await
            .unwrap();
        tracker.consume(&recv.id, &producer.id, &caps()).await.unwrap();

        tracker.close_transport(&send.id).await.unwrap();

        assert_eq!(tracker.producer_count(), 1);
        assert_eq!(tracker.consumer_count(), 1);
        assert_eq!(
            tracker.producer(&producer.id).unwrap().app_data["consultationId"],
            101
        );
    }

    #[tokio::test]
    async fn test_consumer_start_policy_and_producer_check() {
        let (tracker, router, engine, store) = setup().await;
        drop(tracker);
        let mut tracker = SessionTracker::new(engine.clone(), Arc::new(store), options(), true);

        let send = tracker
            .create_transport(&router, TransportRole::Producer, None)
            .await
            .unwrap();
        let recv = tracker
            .create_transport(&router, TransportRole::Consumer, None)
            .await
            .unwrap();

        assert!(matches!(
            tracker.consume(&recv.id, &ProducerId::from("nope"), &caps()).await,
            Err(OrchestratorError::ProducerNotFound(_))
        ));

        let producer = tracker
            .produce(&send.id, MediaKind::Video, &json!({}), Value::Null)
            .await
            .unwrap();
        let consumer = tracker.consume(&recv.id, &producer.id, &caps()).await.unwrap();
        assert!(consumer.paused);
        assert_eq!(consumer.kind, MediaKind::Video);
    }

    #[tokio::test]
    async fn test_consume_rejects_producer_of_other_consultation() {
        let (mut tracker, router, engine, _store) = setup().await;
        let worker = engine.spawn_worker().await.unwrap();
        let other = RouterEntry {
            consultation_id: ConsultationId(202),
            router: engine
                .create_router(&worker.info.id, &baseline_codecs())
                .await
                .unwrap(),
            server_id: ServerId::from("mo-a"),
            created_at: Utc::now(),
        };

        let send = tracker
            .create_transport(&router, TransportRole::Producer, None)
            .await
            .unwrap();
        let producer = tracker
            .produce(&send.id, MediaKind::Audio, &json!({}), Value::Null)
            .await
            .unwrap();
        let foreign_recv = tracker
            .create_transport(&other, TransportRole::Consumer, None)
            .await
            .unwrap();

        assert!(matches!(
            tracker.consume(&foreign_recv.id, &producer.id, &caps()).await,
            Err(OrchestratorError::ProducerNotFound(_))
        ));
        assert_eq!(tracker.consumer_count(), 0);
        assert_eq!(engine.live_consumers(), 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_not_fatal() {
        let (mut tracker, router, _engine, store) = setup().await;
        store.fail_writes(true);

        let transport = tracker
            .create_transport(&router, TransportRole::Producer, None)
            .await
            .unwrap();
        let producer = tracker
            .produce(&transport.id, MediaKind::Audio, &json!({}), Value::Null)
            .await
            .unwrap();

        assert!(tracker.transport(&transport.id).is_some());
        assert!(tracker.producer(&producer.id).is_some());
        assert_eq!(store.transport_count(), 0);
        assert_eq!(store.producer_count(), 0);
    }

    #[tokio::test]
    async fn test_close_all_continues_past_failures() {
        let (mut tracker, router, engine, _store) = setup().await;
        let a = tracker
            .create_transport(&router, TransportRole::Producer, None)
            .await
            .unwrap();
        tracker
            .create_transport(&router, TransportRole::Consumer, None)
            .await
            .unwrap();
        engine.fail_close_of(a.id.as_str());

        let outcome = tracker.close_all_transports().await;

        assert_eq!(outcome, CloseOutcome { closed: 1, failed: 1 });
        assert_eq!(tracker.transport_count(), 0);
        let closes = engine
            .journal()
            .into_iter()
            .filter(|c| matches!(c, EngineCall::CloseTransport(_)))
            .count();
        assert_eq!(closes, 2);
    }

    #[tokio::test]
    async fn test_participant_lookups() {
        let (mut tracker, router, _engine, _store) = setup().await;
        let alice = tracker
            .create_transport(&router, TransportRole::Producer, Some(ParticipantId(1)))
            .await
            .unwrap();
        tracker
            .create_transport(&router, TransportRole::Producer, Some(ParticipantId(2)))
            .await
            .unwrap();

        assert_eq!(
            tracker.transports_of(ConsultationId(101), Some(ParticipantId(1))),
            vec![alice.id.clone()]
        );
        assert_eq!(tracker.transports_of(ConsultationId(101), None).len(), 2);
        assert!(tracker.transports_of(ConsultationId(999), None).is_empty());
    }
}
