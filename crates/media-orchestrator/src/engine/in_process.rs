//! In-memory media engine.
//!
//! Tracks engine resources in plain maps and fabricates the signalling
//! payloads (ICE parameters, candidates, DTLS fingerprints, consumer RTP
//! parameters) a native engine would return. No media is forwarded.
//!
//! Besides implementing [`MediaEngine`], the engine exposes controls used by
//! tests and local development:
//!
//! - [`InProcessEngine::kill_worker`] simulates a worker crash
//! - [`InProcessEngine::fail_next_worker_spawns`] makes spawns fail
//! - [`InProcessEngine::fail_close_of`] makes closing a given handle fail
//! - [`InProcessEngine::journal`] returns every call made, in order

use super::{
    ConsumerHandle, ConsumerId, IceCandidate, MediaEngine, MediaKind, ProducerHandle, ProducerId,
    RouterHandle, RouterId, RtpCapabilities, RtpCodecCapability, SpawnedWorker, TransportHandle,
    TransportId, TransportOptions, WorkerExit, WorkerId, WorkerInfo,
};
use crate::errors::OrchestratorError;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::debug;

/// First pid handed out to in-process workers.
const FIRST_WORKER_PID: u32 = 40_000;

/// A call made against the engine, recorded in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    SpawnWorker(WorkerId),
    CloseWorker(WorkerId),
    CreateRouter(RouterId),
    CloseRouter(RouterId),
    CreateTransport(TransportId),
    ConnectTransport(TransportId),
    CloseTransport(TransportId),
    Produce(ProducerId),
    CloseProducer(ProducerId),
    Consume(ConsumerId),
    CloseConsumer(ConsumerId),
}

impl EngineCall {
    /// True for calls that release a resource.
    #[must_use]
    pub fn is_close(&self) -> bool {
        matches!(
            self,
            EngineCall::CloseWorker(_)
                | EngineCall::CloseRouter(_)
                | EngineCall::CloseTransport(_)
                | EngineCall::CloseProducer(_)
                | EngineCall::CloseConsumer(_)
        )
    }
}

struct WorkerSlot {
    pid: u32,
    exit_tx: Option<oneshot::Sender<WorkerExit>>,
}

struct RouterSlot {
    worker_id: WorkerId,
    capabilities: RtpCapabilities,
}

struct ProducerSlot {
    transport_id: TransportId,
    kind: MediaKind,
}

#[derive(Default)]
struct EngineState {
    next_pid: u32,
    next_port_offset: u32,
    workers: HashMap<WorkerId, WorkerSlot>,
    routers: HashMap<RouterId, RouterSlot>,
    transports: HashMap<TransportId, RouterId>,
    producers: HashMap<ProducerId, ProducerSlot>,
    consumers: HashMap<ConsumerId, TransportId>,
    journal: Vec<EngineCall>,
    failing_spawns: usize,
    failing_closes: HashSet<String>,
}

impl EngineState {
    /// Drop a worker and everything hosted on it.
    fn purge_worker(&mut self, worker_id: &WorkerId) -> Option<WorkerSlot> {
        let slot = self.workers.remove(worker_id)?;
        let routers: Vec<RouterId> = self
            .routers
            .iter()
            .filter(|(_, r)| &r.worker_id == worker_id)
            .map(|(id, _)| id.clone())
            .collect();
        for router_id in routers {
            self.purge_router(&router_id);
        }
        Some(slot)
    }

    fn purge_router(&mut self, router_id: &RouterId) {
        self.routers.remove(router_id);
        let transports: Vec<TransportId> = self
            .transports
            .iter()
            .filter(|(_, r)| *r == router_id)
            .map(|(id, _)| id.clone())
            .collect();
        for transport_id in transports {
            self.purge_transport(&transport_id);
        }
    }

    fn purge_transport(&mut self, transport_id: &TransportId) {
        self.transports.remove(transport_id);
        self.producers.retain(|_, p| &p.transport_id != transport_id);
        self.consumers.retain(|_, t| t != transport_id);
    }

    fn check_close(&self, id: &str) -> Result<(), OrchestratorError> {
        if self.failing_closes.contains(id) {
            return Err(OrchestratorError::Engine(format!(
                "injected close failure for {id}"
            )));
        }
        Ok(())
    }
}

/// In-memory [`MediaEngine`].
pub struct InProcessEngine {
    state: Mutex<EngineState>,
}

impl Default for InProcessEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState {
                next_pid: FIRST_WORKER_PID,
                ..EngineState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate a worker crash: the worker and its resources disappear and
    /// the worker's exit signal fires.
    ///
    /// Returns false if the worker is unknown.
    pub fn kill_worker(&self, worker_id: &WorkerId) -> bool {
        let slot = self.state().purge_worker(worker_id);
        match slot {
            Some(mut slot) => {
                if let Some(tx) = slot.exit_tx.take() {
                    let _ = tx.send(WorkerExit {
                        reason: format!("worker process {} exited unexpectedly", slot.pid),
                    });
                }
                true
            }
            None => false,
        }
    }

    /// Make the next `count` worker spawns fail.
    pub fn fail_next_worker_spawns(&self, count: usize) {
        self.state().failing_spawns = count;
    }

    /// Make every close of the handle with this id fail.
    pub fn fail_close_of(&self, id: &str) {
        self.state().failing_closes.insert(id.to_string());
    }

    /// All calls made so far, in order.
    #[must_use]
    pub fn journal(&self) -> Vec<EngineCall> {
        self.state().journal.clone()
    }

    /// Forget recorded calls.
    pub fn clear_journal(&self) {
        self.state().journal.clear();
    }

    /// Ids of live workers.
    #[must_use]
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.state().workers.keys().cloned().collect()
    }

    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.state().workers.len()
    }

    #[must_use]
    pub fn live_routers(&self) -> usize {
        self.state().routers.len()
    }

    #[must_use]
    pub fn live_transports(&self) -> usize {
        self.state().transports.len()
    }

    #[must_use]
    pub fn live_producers(&self) -> usize {
        self.state().producers.len()
    }

    #[must_use]
    pub fn live_consumers(&self) -> usize {
        self.state().consumers.len()
    }
}

fn random_token(len: usize) -> String {
    uuid::Uuid::new_v4().simple().to_string().chars().take(len).collect()
}

fn fake_fingerprint() -> String {
    let bytes = uuid::Uuid::new_v4().as_bytes().to_vec();
    let mut parts: Vec<String> = bytes.iter().map(|b| format!("{b:02X}")).collect();
    parts.extend(
        uuid::Uuid::new_v4()
            .as_bytes()
            .iter()
            .map(|b| format!("{b:02X}")),
    );
    parts.join(":")
}

/// Mime types the client declared in its RTP capabilities, lowercased.
fn client_mime_types(rtp_capabilities: &Value) -> Option<HashSet<String>> {
    let codecs = rtp_capabilities.get("codecs")?.as_array()?;
    Some(
        codecs
            .iter()
            .filter_map(|c| c.get("mimeType").and_then(Value::as_str))
            .map(str::to_ascii_lowercase)
            .collect(),
    )
}

#[async_trait::async_trait]
impl MediaEngine for InProcessEngine {
    async fn spawn_worker(&self) -> Result<SpawnedWorker, OrchestratorError> {
        let mut state = self.state();
        if state.failing_spawns > 0 {
            state.failing_spawns -= 1;
            return Err(OrchestratorError::Engine(
                "injected worker spawn failure".to_string(),
            ));
        }

        let pid = state.next_pid;
        state.next_pid += 1;
        let id = WorkerId::generate();
        let (exit_tx, exit_rx) = oneshot::channel();

        state.workers.insert(
            id.clone(),
            WorkerSlot {
                pid,
                exit_tx: Some(exit_tx),
            },
        );
        state.journal.push(EngineCall::SpawnWorker(id.clone()));

        debug!(target: "mo.engine.in_process", worker_id = %id, pid, "Spawned worker");

        Ok(SpawnedWorker {
            info: WorkerInfo { id, pid },
            exited: exit_rx,
        })
    }

    async fn close_worker(&self, worker_id: &WorkerId) -> Result<(), OrchestratorError> {
        let mut state = self.state();
        state.journal.push(EngineCall::CloseWorker(worker_id.clone()));
        state.check_close(worker_id.as_str())?;
        // Dropping the slot drops the exit sender without a value.
        state
            .purge_worker(worker_id)
            .map(|_| ())
            .ok_or_else(|| OrchestratorError::Engine(format!("unknown worker {worker_id}")))
    }

    async fn create_router(
        &self,
        worker_id: &WorkerId,
        codecs: &[RtpCodecCapability],
    ) -> Result<RouterHandle, OrchestratorError> {
        let mut state = self.state();
        if !state.workers.contains_key(worker_id) {
            return Err(OrchestratorError::Engine(format!(
                "unknown worker {worker_id}"
            )));
        }

        let id = RouterId::generate();
        let capabilities = RtpCapabilities {
            codecs: codecs.to_vec(),
        };
        state.routers.insert(
            id.clone(),
            RouterSlot {
                worker_id: worker_id.clone(),
                capabilities: capabilities.clone(),
            },
        );
        state.journal.push(EngineCall::CreateRouter(id.clone()));

        Ok(RouterHandle {
            id,
            worker_id: worker_id.clone(),
            rtp_capabilities: capabilities,
        })
    }

    async fn close_router(&self, router_id: &RouterId) -> Result<(), OrchestratorError> {
        let mut state = self.state();
        state.journal.push(EngineCall::CloseRouter(router_id.clone()));
        state.check_close(router_id.as_str())?;
        if !state.routers.contains_key(router_id) {
            return Err(OrchestratorError::Engine(format!(
                "unknown router {router_id}"
            )));
        }
        state.purge_router(router_id);
        Ok(())
    }

    async fn create_transport(
        &self,
        router_id: &RouterId,
        options: &TransportOptions,
    ) -> Result<TransportHandle, OrchestratorError> {
        let mut state = self.state();
        if !state.routers.contains_key(router_id) {
            return Err(OrchestratorError::Engine(format!(
                "unknown router {router_id}"
            )));
        }

        let span = u32::from(options.port_max.saturating_sub(options.port_min)) + 1;
        let offset = state.next_port_offset % span;
        state.next_port_offset = state.next_port_offset.wrapping_add(1);
        let port = options
            .port_min
            .saturating_add(u16::try_from(offset).unwrap_or(0));

        let ip = options
            .announced_address
            .clone()
            .unwrap_or_else(|| options.listen_ip.to_string());

        let mut ice_candidates = Vec::new();
        if options.enable_udp {
            ice_candidates.push(IceCandidate {
                foundation: "udpcandidate".to_string(),
                priority: if options.prefer_udp { 1_076_302_079 } else { 1_076_558_079 },
                ip: ip.clone(),
                protocol: "udp".to_string(),
                port,
                candidate_type: "host".to_string(),
            });
        }
        if options.enable_tcp {
            ice_candidates.push(IceCandidate {
                foundation: "tcpcandidate".to_string(),
                priority: if options.prefer_udp { 1_076_276_479 } else { 1_076_302_079 },
                ip,
                protocol: "tcp".to_string(),
                port,
                candidate_type: "host".to_string(),
            });
        }

        let id = TransportId::generate();
        state.transports.insert(id.clone(), router_id.clone());
        state.journal.push(EngineCall::CreateTransport(id.clone()));

        Ok(TransportHandle {
            id,
            router_id: router_id.clone(),
            ice_parameters: json!({
                "usernameFragment": random_token(16),
                "password": random_token(32),
                "iceLite": true,
            }),
            ice_candidates,
            dtls_parameters: json!({
                "role": "auto",
                "fingerprints": [{ "algorithm": "sha-256", "value": fake_fingerprint() }],
            }),
        })
    }

    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: &Value,
    ) -> Result<(), OrchestratorError> {
        let mut state = self.state();
        if !state.transports.contains_key(transport_id) {
            return Err(OrchestratorError::Engine(format!(
                "unknown transport {transport_id}"
            )));
        }
        if dtls_parameters.get("fingerprints").is_none() {
            return Err(OrchestratorError::Engine(
                "dtls parameters missing fingerprints".to_string(),
            ));
        }
        state
            .journal
            .push(EngineCall::ConnectTransport(transport_id.clone()));
        Ok(())
    }

    async fn close_transport(&self, transport_id: &TransportId) -> Result<(), OrchestratorError> {
        let mut state = self.state();
        state
            .journal
            .push(EngineCall::CloseTransport(transport_id.clone()));
        state.check_close(transport_id.as_str())?;
        if !state.transports.contains_key(transport_id) {
            return Err(OrchestratorError::Engine(format!(
                "unknown transport {transport_id}"
            )));
        }
        state.purge_transport(transport_id);
        Ok(())
    }

    async fn produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        _rtp_parameters: &Value,
    ) -> Result<ProducerHandle, OrchestratorError> {
        let mut state = self.state();
        if !state.transports.contains_key(transport_id) {
            return Err(OrchestratorError::Engine(format!(
                "unknown transport {transport_id}"
            )));
        }

        let id = ProducerId::generate();
        state.producers.insert(
            id.clone(),
            ProducerSlot {
                transport_id: transport_id.clone(),
                kind,
            },
        );
        state.journal.push(EngineCall::Produce(id.clone()));

        Ok(ProducerHandle {
            id,
            transport_id: transport_id.clone(),
            kind,
        })
    }

    async fn close_producer(&self, producer_id: &ProducerId) -> Result<(), OrchestratorError> {
        let mut state = self.state();
        state
            .journal
            .push(EngineCall::CloseProducer(producer_id.clone()));
        state.check_close(producer_id.as_str())?;
        state
            .producers
            .remove(producer_id)
            .map(|_| ())
            .ok_or_else(|| OrchestratorError::Engine(format!("unknown producer {producer_id}")))
    }

    async fn consume(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &Value,
        paused: bool,
    ) -> Result<ConsumerHandle, OrchestratorError> {
        let mut state = self.state();
        let router_id = state.transports.get(transport_id).cloned().ok_or_else(|| {
            OrchestratorError::Engine(format!("unknown transport {transport_id}"))
        })?;
        let kind = state
            .producers
            .get(producer_id)
            .map(|p| p.kind)
            .ok_or_else(|| OrchestratorError::Engine(format!("unknown producer {producer_id}")))?;

        let router_codecs: Vec<RtpCodecCapability> = state
            .routers
            .get(&router_id)
            .map(|r| {
                r.capabilities
                    .codecs
                    .iter()
                    .filter(|c| c.kind == kind)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        // A client that declares codecs must share at least one with us.
        let codecs = match client_mime_types(rtp_capabilities) {
            Some(accepted) => router_codecs
                .into_iter()
                .filter(|c| accepted.contains(&c.mime_type.to_ascii_lowercase()))
                .collect(),
            None => router_codecs,
        };
        if codecs.is_empty() {
            return Err(OrchestratorError::Engine(format!(
                "cannot consume producer {producer_id}: no common {kind} codec"
            )));
        }

        let id = ConsumerId::generate();
        let ssrc = 100_000_000 + state.consumers.len() as u64;
        state.consumers.insert(id.clone(), transport_id.clone());
        state.journal.push(EngineCall::Consume(id.clone()));

        Ok(ConsumerHandle {
            id,
            transport_id: transport_id.clone(),
            producer_id: producer_id.clone(),
            kind,
            rtp_parameters: json!({
                "codecs": codecs,
                "encodings": [{ "ssrc": ssrc }],
                "mid": state.consumers.len().to_string(),
            }),
            paused,
        })
    }

    async fn close_consumer(&self, consumer_id: &ConsumerId) -> Result<(), OrchestratorError> {
        let mut state = self.state();
        state
            .journal
            .push(EngineCall::CloseConsumer(consumer_id.clone()));
        state.check_close(consumer_id.as_str())?;
        state
            .consumers
            .remove(consumer_id)
            .map(|_| ())
            .ok_or_else(|| OrchestratorError::Engine(format!("unknown consumer {consumer_id}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::routing::baseline_codecs;
    use std::net::{IpAddr, Ipv4Addr};

    fn options() -> TransportOptions {
        TransportOptions {
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            announced_address: Some("203.0.113.10".to_string()),
            port_min: 40000,
            port_max: 40001,
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
        }
    }

    #[tokio::test]
    async fn test_spawn_assigns_increasing_pids() {
        let engine = InProcessEngine::new();
        let a = engine.spawn_worker().await.unwrap();
        let b = engine.spawn_worker().await.unwrap();
        assert_eq!(b.info.pid, a.info.pid + 1);
        assert_eq!(engine.live_workers(), 2);
    }

    #[tokio::test]
    async fn test_kill_worker_fires_exit_signal() {
        let engine = InProcessEngine::new();
        let spawned = engine.spawn_worker().await.unwrap();
        let router = engine
            .create_router(&spawned.info.id, &baseline_codecs())
            .await
            .unwrap();

        assert!(engine.kill_worker(&spawned.info.id));

        let exit = spawned.exited.await.expect("exit signal should fire");
        assert!(exit.reason.contains("exited unexpectedly"));
        assert_eq!(engine.live_routers(), 0);
        assert!(engine.close_router(&router.id).await.is_err());
    }

    #[tokio::test]
    async fn test_close_worker_drops_exit_sender_without_value() {
        let engine = InProcessEngine::new();
        let spawned = engine.spawn_worker().await.unwrap();

        engine.close_worker(&spawned.info.id).await.unwrap();

        assert!(spawned.exited.await.is_err());
    }

    #[tokio::test]
    async fn test_injected_spawn_failures() {
        let engine = InProcessEngine::new();
        engine.fail_next_worker_spawns(1);

        assert!(engine.spawn_worker().await.is_err());
        assert!(engine.spawn_worker().await.is_ok());
    }

    #[tokio::test]
    async fn test_transport_ports_cycle_through_range() {
        let engine = InProcessEngine::new();
        let worker = engine.spawn_worker().await.unwrap();
        let router = engine
            .create_router(&worker.info.id, &baseline_codecs())
            .await
            .unwrap();

        let mut ports = Vec::new();
        for _ in 0..3 {
            let transport = engine.create_transport(&router.id, &options()).await.unwrap();
            assert_eq!(transport.ice_candidates.len(), 2);
            assert_eq!(transport.ice_candidates[0].ip, "203.0.113.10");
            ports.push(transport.ice_candidates[0].port);
        }
        assert_eq!(ports, vec![40000, 40001, 40000]);
    }

    #[tokio::test]
    async fn test_consume_requires_common_codec() {
        let engine = InProcessEngine::new();
        let worker = engine.spawn_worker().await.unwrap();
        let router = engine
            .create_router(&worker.info.id, &baseline_codecs())
            .await
            .unwrap();
        let send = engine.create_transport(&router.id, &options()).await.unwrap();
        let recv = engine.create_transport(&router.id, &options()).await.unwrap();
        let producer = engine
            .produce(&send.id, MediaKind::Audio, &json!({}))
            .await
            .unwrap();

        let incompatible = json!({ "codecs": [{ "mimeType": "video/VP8" }] });
        assert!(engine
            .consume(&recv.id, &producer.id, &incompatible, false)
            .await
            .is_err());

        let compatible = json!({ "codecs": [{ "mimeType": "audio/opus" }] });
        let consumer = engine
            .consume(&recv.id, &producer.id, &compatible, true)
            .await
            .unwrap();
        assert!(consumer.paused);
        assert_eq!(consumer.kind, MediaKind::Audio);
    }

    #[tokio::test]
    async fn test_journal_records_closes_even_when_failing() {
        let engine = InProcessEngine::new();
        let worker = engine.spawn_worker().await.unwrap();
        engine.fail_close_of(worker.info.id.as_str());

        assert!(engine.close_worker(&worker.info.id).await.is_err());
        assert_eq!(
            engine.journal().last(),
            Some(&EngineCall::CloseWorker(worker.info.id.clone()))
        );
        assert_eq!(engine.live_workers(), 1);
    }
}
