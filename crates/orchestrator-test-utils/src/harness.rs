//! In-process orchestrator harness.

use crate::fixtures::{server, TEST_SERVER_ID};
use common::types::{ConsultationId, ServerId};
use media_orchestrator::actors::{OrchestratorHandle, OrchestratorSettings};
use media_orchestrator::balancer::{LoadChannel, LocalLoadChannel};
use media_orchestrator::config::Environment;
use media_orchestrator::engine::{InProcessEngine, MediaEngine, TransportOptions, WorkerId};
use media_orchestrator::store::{AvailableServer, InMemoryStore};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

/// How long [`TestOrchestrator`] wait helpers poll before panicking.
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A running orchestrator plus direct access to its collaborators.
pub struct TestOrchestrator {
    pub handle: OrchestratorHandle,
    pub engine: Arc<InProcessEngine>,
    pub store: InMemoryStore,
    pub channel: Arc<LocalLoadChannel>,
    pub server_id: ServerId,
}

impl TestOrchestrator {
    #[must_use]
    pub fn builder() -> TestOrchestratorBuilder {
        TestOrchestratorBuilder::default()
    }

    /// Three workers, one active server record, local channel.
    pub async fn start() -> Self {
        Self::builder().start().await
    }

    /// Worker hosting the consultation's router.
    pub async fn worker_of(&self, consultation_id: ConsultationId) -> Option<WorkerId> {
        self.handle
            .worker_snapshots()
            .await
            .unwrap()
            .into_iter()
            .find(|w| w.hosted_consultations.contains(&consultation_id))
            .map(|w| w.worker_id)
    }

    /// Current worker ids in pool order.
    pub async fn worker_ids(&self) -> Vec<WorkerId> {
        self.handle
            .worker_snapshots()
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.worker_id)
            .collect()
    }

    /// Poll until `worker_id` has left the pool.
    pub async fn wait_for_worker_gone(&self, worker_id: &WorkerId) {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        while self.worker_ids().await.contains(worker_id) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "worker {worker_id} still in pool after {WAIT_TIMEOUT:?}"
            );
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Poll until the pool holds `count` workers.
    pub async fn wait_for_pool_size(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        loop {
            let current = self.worker_ids().await.len();
            if current == count {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "pool has {current} workers, expected {count}"
            );
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Builder for [`TestOrchestrator`].
pub struct TestOrchestratorBuilder {
    workers: usize,
    recommended_workers: usize,
    max_avg_routers_per_worker: f64,
    environment: Environment,
    consumers_start_paused: bool,
    server_id: ServerId,
    servers: Option<Vec<AvailableServer>>,
    channel: Option<LocalLoadChannel>,
    engine: Option<Arc<InProcessEngine>>,
    load_broadcast_interval: Duration,
}

impl Default for TestOrchestratorBuilder {
    fn default() -> Self {
        Self {
            workers: 3,
            recommended_workers: 3,
            max_avg_routers_per_worker: 10.0,
            environment: Environment::Development,
            consumers_start_paused: false,
            server_id: ServerId::from(TEST_SERVER_ID),
            servers: None,
            channel: None,
            engine: None,
            load_broadcast_interval: Duration::from_millis(50),
        }
    }
}

impl TestOrchestratorBuilder {
    #[must_use]
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count;
        self
    }

    #[must_use]
    pub fn recommended_workers(mut self, count: usize) -> Self {
        self.recommended_workers = count;
        self
    }

    #[must_use]
    pub fn max_avg_routers_per_worker(mut self, max: f64) -> Self {
        self.max_avg_routers_per_worker = max;
        self
    }

    #[must_use]
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    #[must_use]
    pub fn consumers_start_paused(mut self, paused: bool) -> Self {
        self.consumers_start_paused = paused;
        self
    }

    #[must_use]
    pub fn server_id(mut self, id: &str) -> Self {
        self.server_id = ServerId::from(id);
        self
    }

    /// Replace the default server registry (one active record named after
    /// the instance).
    #[must_use]
    pub fn servers(mut self, servers: Vec<AvailableServer>) -> Self {
        self.servers = Some(servers);
        self
    }

    /// Share a load bus with other orchestrators (see
    /// [`LocalLoadChannel::peer`]).
    #[must_use]
    pub fn channel(mut self, channel: LocalLoadChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Use a pre-configured engine (e.g. with failure injection armed).
    #[must_use]
    pub fn engine(mut self, engine: Arc<InProcessEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    #[must_use]
    pub fn load_broadcast_interval(mut self, interval: Duration) -> Self {
        self.load_broadcast_interval = interval;
        self
    }

    pub async fn start(self) -> TestOrchestrator {
        let engine = self
            .engine
            .unwrap_or_else(|| Arc::new(InProcessEngine::new()));
        let servers = self
            .servers
            .unwrap_or_else(|| vec![server(self.server_id.as_str())]);
        let store = servers
            .into_iter()
            .fold(InMemoryStore::new(), InMemoryStore::with_server);
        let channel = Arc::new(self.channel.unwrap_or_default());

        let settings = OrchestratorSettings {
            server_id: self.server_id.clone(),
            environment: self.environment,
            num_workers: self.workers,
            recommended_workers: self.recommended_workers,
            max_avg_routers_per_worker: self.max_avg_routers_per_worker,
            transport_options: TransportOptions {
                listen_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                announced_address: Some("127.0.0.1".to_string()),
                port_min: 40_000,
                port_max: 40_999,
                enable_udp: true,
                enable_tcp: true,
                prefer_udp: true,
            },
            consumers_start_paused: self.consumers_start_paused,
            load_topic: "media-server-load".to_string(),
            load_broadcast_interval: self.load_broadcast_interval,
        };

        let engine_seam: Arc<dyn MediaEngine> = engine.clone();
        let channel_seam: Arc<dyn LoadChannel> = channel.clone();
        let handle =
            OrchestratorHandle::start(settings, engine_seam, Arc::new(store.clone()), channel_seam)
                .await;

        TestOrchestrator {
            handle,
            engine,
            store,
            channel,
            server_id: self.server_id,
        }
    }
}
