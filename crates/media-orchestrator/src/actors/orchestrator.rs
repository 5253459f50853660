//! `OrchestratorActor` - single owner of all media session state.
//!
//! The actor owns the worker pool, the router allocator, the session
//! tracker and the load balancer. Every mutation arrives as one mailbox
//! message, so create and cleanup for the same consultation never
//! interleave.
//!
//! Worker deaths arrive on a separate channel fed by the per-worker
//! watchers. The crash cascade (clean up hosted sessions, drop the worker,
//! spawn a replacement) runs as one step of the loop.
//!
//! # Shutdown
//!
//! `Shutdown` drains every resource in dependency order and flips the actor
//! into draining mode: it keeps answering queries but refuses new sessions.
//! Cancelling the root token drains (if not done yet) and stops the loop.

use super::messages::{
    CloseReason, ConsultationStatus, MediaJoin, OrchestratorMessage, ParticipantRole,
    SessionEvent, SessionInfo, WorkerSnapshot,
};
use super::metrics::LoadMetrics;
use super::shutdown::{drain_all, ShutdownSummary};
use crate::balancer::{LoadBalancer, LoadChannel};
use crate::config::{Config, Environment};
use crate::engine::{
    ConsumerHandle, ConsumerId, MediaEngine, MediaKind, ProducerHandle, ProducerId, RouterHandle,
    TransportHandle, TransportId, TransportOptions,
};
use crate::errors::OrchestratorError;
use crate::observability::health::{
    BroadcastHealth, HealthMetrics, HealthReport, LoadReport, SessionCounts, WorkerHealth,
    WorkerLoadReport,
};
use crate::observability::metrics as prom;
use crate::routing::RouterAllocator;
use crate::session::{SessionTracker, TransportRole};
use crate::store::SessionStore;
use crate::workers::{WorkerDeath, WorkerPool, DEFAULT_MIN_IDLE_LOAD};
use chrono::{DateTime, Utc};
use common::types::{ConsultationId, ParticipantId, ServerId};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Mailbox capacity.
const ORCHESTRATOR_CHANNEL_BUFFER: usize = 1000;

/// Capacity of the session event channel. Slow subscribers lag.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Static settings of an orchestrator instance.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub server_id: ServerId,
    pub environment: Environment,
    pub num_workers: usize,
    pub recommended_workers: usize,
    pub max_avg_routers_per_worker: f64,
    pub transport_options: TransportOptions,
    pub consumers_start_paused: bool,
    pub load_topic: String,
    pub load_broadcast_interval: Duration,
}

impl OrchestratorSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            server_id: config.server_id.clone(),
            environment: config.environment,
            num_workers: config.num_workers,
            recommended_workers: config.recommended_workers,
            max_avg_routers_per_worker: config.max_avg_routers_per_worker,
            transport_options: TransportOptions {
                listen_ip: config.listen_ip,
                announced_address: config.announced_address.clone(),
                port_min: config.rtc_min_port,
                port_max: config.rtc_max_port,
                enable_udp: true,
                enable_tcp: true,
                prefer_udp: true,
            },
            consumers_start_paused: config.consumers_start_paused,
            load_topic: config.load_topic.clone(),
            load_broadcast_interval: config.load_broadcast_interval,
        }
    }
}

/// Handle to the `OrchestratorActor`.
#[derive(Clone)]
pub struct OrchestratorHandle {
    sender: mpsc::Sender<OrchestratorMessage>,
    events: broadcast::Sender<SessionEvent>,
    cancel_token: CancellationToken,
}

impl OrchestratorHandle {
    /// Spawn the worker pool, start load sharing and spawn the actor.
    ///
    /// Worker spawn failures are logged; the pool may start below its
    /// target size (health reports it).
    pub async fn start(
        settings: OrchestratorSettings,
        engine: Arc<dyn MediaEngine>,
        store: Arc<dyn SessionStore>,
        channel: Arc<dyn LoadChannel>,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        let (sender, receiver) = mpsc::channel(ORCHESTRATOR_CHANNEL_BUFFER);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (death_tx, deaths) = mpsc::unbounded_channel();

        let mut pool = WorkerPool::new(Arc::clone(&engine), death_tx, cancel_token.child_token());
        pool.initialize(settings.num_workers).await;

        let load = LoadMetrics::new();
        load.set_workers(pool.len());

        let mut balancer = LoadBalancer::new(
            settings.server_id.clone(),
            settings.load_topic.clone(),
            settings.load_broadcast_interval,
            channel,
            cancel_token.child_token(),
        );
        balancer.start(Arc::clone(&load)).await;

        let actor = OrchestratorActor {
            allocator: RouterAllocator::new(Arc::clone(&engine), Arc::clone(&store)),
            tracker: SessionTracker::new(
                engine,
                Arc::clone(&store),
                settings.transport_options.clone(),
                settings.consumers_start_paused,
            ),
            settings,
            receiver,
            deaths,
            cancel_token: cancel_token.clone(),
            pool,
            balancer,
            store,
            load,
            events: events.clone(),
            participants: HashMap::new(),
            drained: None,
        };
        actor.refresh_load();
        tokio::spawn(actor.run());

        Self {
            sender,
            events,
            cancel_token,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> OrchestratorMessage,
    ) -> Result<T, OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| OrchestratorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| OrchestratorError::Internal(format!("response receive failed: {e}")))
    }

    /// Ensure the consultation has a media session and announce it.
    pub async fn initialize_session(
        &self,
        consultation_id: ConsultationId,
        initiator_id: ParticipantId,
        initiator_role: ParticipantRole,
    ) -> Result<SessionInfo, OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::InitializeSession {
            consultation_id,
            initiator_id,
            initiator_role,
            respond_to,
        })
        .await?
    }

    /// Hand a participant a send and a receive transport.
    pub async fn participant_join_media(
        &self,
        consultation_id: ConsultationId,
        participant_id: ParticipantId,
        role: ParticipantRole,
    ) -> Result<MediaJoin, OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::ParticipantJoinMedia {
            consultation_id,
            participant_id,
            role,
            respond_to,
        })
        .await?
    }

    /// Release a participant's media. Returns false if they had none.
    pub async fn participant_leave_media(
        &self,
        consultation_id: ConsultationId,
        participant_id: ParticipantId,
    ) -> Result<bool, OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::ParticipantLeaveMedia {
            consultation_id,
            participant_id,
            respond_to,
        })
        .await
    }

    pub async fn transition_state(
        &self,
        consultation_id: ConsultationId,
        status: ConsultationStatus,
        initiator_id: ParticipantId,
    ) -> Result<(), OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::TransitionState {
            consultation_id,
            status,
            initiator_id,
            respond_to,
        })
        .await?
    }

    /// Release every resource of a consultation. Returns false if it had
    /// no session.
    pub async fn cleanup_session(
        &self,
        consultation_id: ConsultationId,
        reason: CloseReason,
    ) -> Result<bool, OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::CleanupSession {
            consultation_id,
            reason,
            respond_to,
        })
        .await
    }

    /// Clean the session up after `after`, unless the returned token is
    /// cancelled first.
    #[must_use]
    pub fn schedule_expiry(
        &self,
        consultation_id: ConsultationId,
        after: Duration,
    ) -> CancellationToken {
        let token = self.cancel_token.child_token();
        let timer = token.clone();
        let handle = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = timer.cancelled() => {
                    debug!(
                        target: "mo.actor.orchestrator",
                        consultation_id = %consultation_id,
                        "Expiry cancelled"
                    );
                }
                () = tokio::time::sleep(after) => {
                    match handle.cleanup_session(consultation_id, CloseReason::Expired).await {
                        Ok(cleaned) => info!(
                            target: "mo.actor.orchestrator",
                            consultation_id = %consultation_id,
                            cleaned,
                            "Consultation expired"
                        ),
                        Err(e) => warn!(
                            target: "mo.actor.orchestrator",
                            consultation_id = %consultation_id,
                            error = %e,
                            "Expiry cleanup failed"
                        ),
                    }
                }
            }
        });

        token
    }

    pub async fn create_router(
        &self,
        consultation_id: ConsultationId,
    ) -> Result<RouterHandle, OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::CreateRouter {
            consultation_id,
            respond_to,
        })
        .await?
    }

    pub async fn get_router(
        &self,
        consultation_id: ConsultationId,
    ) -> Result<Option<RouterHandle>, OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::GetRouter {
            consultation_id,
            respond_to,
        })
        .await
    }

    /// Close only the router of a consultation. Returns false if absent.
    pub async fn cleanup_router(
        &self,
        consultation_id: ConsultationId,
    ) -> Result<bool, OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::CleanupRouter {
            consultation_id,
            respond_to,
        })
        .await
    }

    pub async fn create_transport(
        &self,
        consultation_id: ConsultationId,
        role: TransportRole,
        participant_id: Option<ParticipantId>,
    ) -> Result<TransportHandle, OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::CreateTransport {
            consultation_id,
            role,
            participant_id,
            respond_to,
        })
        .await?
    }

    pub async fn connect_transport(
        &self,
        transport_id: TransportId,
        dtls_parameters: Value,
    ) -> Result<(), OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::ConnectTransport {
            transport_id,
            dtls_parameters,
            respond_to,
        })
        .await?
    }

    pub async fn produce(
        &self,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: Value,
    ) -> Result<ProducerHandle, OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::Produce {
            transport_id,
            kind,
            rtp_parameters,
            app_data,
            respond_to,
        })
        .await?
    }

    pub async fn consume(
        &self,
        transport_id: TransportId,
        producer_id: ProducerId,
        rtp_capabilities: Value,
    ) -> Result<ConsumerHandle, OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::Consume {
            transport_id,
            producer_id,
            rtp_capabilities,
            respond_to,
        })
        .await?
    }

    pub async fn close_transport(&self, transport_id: TransportId) -> Result<(), OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::CloseTransport {
            transport_id,
            respond_to,
        })
        .await?
    }

    pub async fn close_producer(&self, producer_id: ProducerId) -> Result<(), OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::CloseProducer {
            producer_id,
            respond_to,
        })
        .await?
    }

    pub async fn close_consumer(&self, consumer_id: ConsumerId) -> Result<(), OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::CloseConsumer {
            consumer_id,
            respond_to,
        })
        .await?
    }

    /// [`Self::scale_workers`] with [`DEFAULT_MIN_IDLE_LOAD`].
    pub async fn scale_to(&self, target: usize) -> Result<usize, OrchestratorError> {
        self.scale_workers(target, DEFAULT_MIN_IDLE_LOAD).await
    }

    /// Grow or shrink the pool to `target` workers. Shrinking removes
    /// workers whose load is at most `min_idle_load`, one at a time.
    pub async fn scale_workers(
        &self,
        target: usize,
        min_idle_load: u64,
    ) -> Result<usize, OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::ScaleWorkers {
            target,
            min_idle_load,
            respond_to,
        })
        .await?
    }

    /// Close transports older than `threshold`. Returns how many were closed.
    pub async fn reap_hanging_transports(
        &self,
        threshold: Duration,
    ) -> Result<usize, OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::ReapHangingTransports {
            threshold,
            respond_to,
        })
        .await
    }

    pub async fn health_report(&self) -> Result<HealthReport, OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::GetHealthReport { respond_to })
            .await
    }

    pub async fn worker_snapshots(&self) -> Result<Vec<WorkerSnapshot>, OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::GetWorkerSnapshots { respond_to })
            .await
    }

    /// Drain everything. Idempotent: later calls return the first summary.
    pub async fn shutdown(&self) -> Result<ShutdownSummary, OrchestratorError> {
        self.request(|respond_to| OrchestratorMessage::Shutdown { respond_to })
            .await
    }

    /// Receive session lifecycle events.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Stop the actor (draining first if `shutdown` was not called).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Child token for background tasks tied to the orchestrator.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// The `OrchestratorActor` implementation.
pub struct OrchestratorActor {
    settings: OrchestratorSettings,
    receiver: mpsc::Receiver<OrchestratorMessage>,
    deaths: mpsc::UnboundedReceiver<WorkerDeath>,
    cancel_token: CancellationToken,
    pool: WorkerPool,
    allocator: RouterAllocator,
    tracker: SessionTracker,
    balancer: LoadBalancer,
    store: Arc<dyn SessionStore>,
    load: Arc<LoadMetrics>,
    events: broadcast::Sender<SessionEvent>,
    /// Participants with media, per consultation.
    participants: HashMap<ConsultationId, HashMap<ParticipantId, ParticipantRole>>,
    /// Set once drained; the actor is draining from then on.
    drained: Option<ShutdownSummary>,
}

impl OrchestratorActor {
    #[instrument(skip_all, name = "mo.actor.orchestrator", fields(server_id = %self.settings.server_id))]
    async fn run(mut self) {
        info!(
            target: "mo.actor.orchestrator",
            workers = self.pool.len(),
            "OrchestratorActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "mo.actor.orchestrator", "OrchestratorActor received cancellation signal");
                    self.shutdown().await;
                    break;
                }

                Some(death) = self.deaths.recv() => {
                    self.handle_worker_death(death).await;
                    self.refresh_load();
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.refresh_load();
                        }
                        None => {
                            info!(target: "mo.actor.orchestrator", "OrchestratorActor channel closed, exiting");
                            self.shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "mo.actor.orchestrator",
            routers_remaining = self.allocator.len(),
            "OrchestratorActor stopped"
        );
    }

    async fn handle_message(&mut self, message: OrchestratorMessage) {
        match message {
            OrchestratorMessage::InitializeSession {
                consultation_id,
                initiator_id,
                initiator_role,
                respond_to,
            } => {
                debug!(
                    target: "mo.actor.orchestrator",
                    consultation_id = %consultation_id,
                    initiator_id = %initiator_id,
                    initiator_role = ?initiator_role,
                    "Initializing session"
                );
                let result = self.ensure_session(consultation_id).await;
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::ParticipantJoinMedia {
                consultation_id,
                participant_id,
                role,
                respond_to,
            } => {
                let result = self
                    .participant_join_media(consultation_id, participant_id, role)
                    .await;
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::ParticipantLeaveMedia {
                consultation_id,
                participant_id,
                respond_to,
            } => {
                let left = self
                    .participant_leave_media(consultation_id, participant_id)
                    .await;
                let _ = respond_to.send(left);
            }

            OrchestratorMessage::TransitionState {
                consultation_id,
                status,
                initiator_id,
                respond_to,
            } => {
                let result = self
                    .transition_state(consultation_id, status, initiator_id)
                    .await;
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::CleanupSession {
                consultation_id,
                reason,
                respond_to,
            } => {
                let cleaned = self.cleanup_session(consultation_id, reason).await;
                let _ = respond_to.send(cleaned);
            }

            OrchestratorMessage::CreateRouter {
                consultation_id,
                respond_to,
            } => {
                let result = self.create_router(consultation_id).await;
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::GetRouter {
                consultation_id,
                respond_to,
            } => {
                let router = self.allocator.get_router(consultation_id).cloned();
                let _ = respond_to.send(router);
            }

            OrchestratorMessage::CleanupRouter {
                consultation_id,
                respond_to,
            } => {
                let cleaned = self
                    .allocator
                    .cleanup_router_for_consultation(consultation_id, &mut self.pool)
                    .await;
                let _ = respond_to.send(cleaned);
            }

            OrchestratorMessage::CreateTransport {
                consultation_id,
                role,
                participant_id,
                respond_to,
            } => {
                let result = self
                    .create_transport(consultation_id, role, participant_id)
                    .await;
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::ConnectTransport {
                transport_id,
                dtls_parameters,
                respond_to,
            } => {
                let result = self
                    .tracker
                    .connect_transport(&transport_id, &dtls_parameters)
                    .await;
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::Produce {
                transport_id,
                kind,
                rtp_parameters,
                app_data,
                respond_to,
            } => {
                let result = self
                    .tracker
                    .produce(&transport_id, kind, &rtp_parameters, app_data)
                    .await;
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::Consume {
                transport_id,
                producer_id,
                rtp_capabilities,
                respond_to,
            } => {
                let result = self
                    .tracker
                    .consume(&transport_id, &producer_id, &rtp_capabilities)
                    .await;
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::CloseTransport {
                transport_id,
                respond_to,
            } => {
                let result = self.tracker.close_transport(&transport_id).await.map(|_| ());
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::CloseProducer {
                producer_id,
                respond_to,
            } => {
                let result = self.tracker.close_producer(&producer_id).await;
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::CloseConsumer {
                consumer_id,
                respond_to,
            } => {
                let result = self.tracker.close_consumer(&consumer_id).await;
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::ScaleWorkers {
                target,
                min_idle_load,
                respond_to,
            } => {
                let result = self.scale_to(target, min_idle_load).await;
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::ReapHangingTransports {
                threshold,
                respond_to,
            } => {
                let reaped = self.reap_hanging_transports(threshold).await;
                let _ = respond_to.send(reaped);
            }

            OrchestratorMessage::GetHealthReport { respond_to } => {
                let report = HealthReport::from_metrics(self.health_metrics());
                let _ = respond_to.send(report);
            }

            OrchestratorMessage::GetWorkerSnapshots { respond_to } => {
                let _ = respond_to.send(self.worker_snapshots());
            }

            OrchestratorMessage::Shutdown { respond_to } => {
                let summary = self.shutdown().await;
                let _ = respond_to.send(summary);
            }
        }
    }

    fn is_draining(&self) -> bool {
        self.drained.is_some()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Publish counters to the load publisher and the gauges.
    fn refresh_load(&self) {
        self.load.set_total_routers(self.pool.total_load());
        self.load.set_workers(self.pool.len());
        prom::set_session_resources(
            self.allocator.len(),
            self.tracker.transport_count(),
            self.tracker.producer_count(),
            self.tracker.consumer_count(),
        );
    }

    async fn create_router(
        &mut self,
        consultation_id: ConsultationId,
    ) -> Result<RouterHandle, OrchestratorError> {
        if self.is_draining() {
            return Err(OrchestratorError::Draining);
        }
        let preferred = self.balancer.least_loaded_server().await;
        self.allocator
            .create_router_for_consultation(consultation_id, &mut self.pool, &preferred)
            .await
    }

    /// Reuse the consultation's router or create one, then announce it.
    async fn ensure_session(
        &mut self,
        consultation_id: ConsultationId,
    ) -> Result<SessionInfo, OrchestratorError> {
        let (router, created) = match self.allocator.get_router(consultation_id) {
            Some(router) => (router.clone(), false),
            None => (self.create_router(consultation_id).await?, true),
        };

        let info = SessionInfo {
            consultation_id,
            router_id: router.id,
            rtp_capabilities: router.rtp_capabilities,
            created,
        };
        self.emit(SessionEvent::SessionReady {
            consultation_id,
            rtp_capabilities: info.rtp_capabilities.clone(),
        });

        info!(
            target: "mo.actor.orchestrator",
            consultation_id = %consultation_id,
            router_id = %info.router_id,
            created,
            "Session ready"
        );
        Ok(info)
    }

    async fn create_transport(
        &mut self,
        consultation_id: ConsultationId,
        role: TransportRole,
        participant_id: Option<ParticipantId>,
    ) -> Result<TransportHandle, OrchestratorError> {
        if self.is_draining() {
            return Err(OrchestratorError::Draining);
        }
        let entry = self
            .allocator
            .entry(consultation_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::RouterNotFound(consultation_id.to_string()))?;
        self.tracker
            .create_transport(&entry, role, participant_id)
            .await
    }

    async fn participant_join_media(
        &mut self,
        consultation_id: ConsultationId,
        participant_id: ParticipantId,
        role: ParticipantRole,
    ) -> Result<MediaJoin, OrchestratorError> {
        if self.is_draining() {
            return Err(OrchestratorError::Draining);
        }
        let entry = self
            .allocator
            .entry(consultation_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::RouterNotFound(consultation_id.to_string()))?;

        if self.release_participant(consultation_id, participant_id).await {
            debug!(
                target: "mo.actor.orchestrator",
                consultation_id = %consultation_id,
                participant_id = %participant_id,
                "Released previous media of rejoining participant"
            );
        }

        let send_transport = self
            .tracker
            .create_transport(&entry, TransportRole::Producer, Some(participant_id))
            .await?;
        let recv_transport = match self
            .tracker
            .create_transport(&entry, TransportRole::Consumer, Some(participant_id))
            .await
        {
            Ok(transport) => transport,
            Err(e) => {
                let _ = self.tracker.close_transport(&send_transport.id).await;
                return Err(e);
            }
        };

        self.participants
            .entry(consultation_id)
            .or_default()
            .insert(participant_id, role);
        self.emit(SessionEvent::ParticipantJoinedMedia {
            consultation_id,
            participant_id,
        });

        info!(
            target: "mo.actor.orchestrator",
            consultation_id = %consultation_id,
            participant_id = %participant_id,
            role = ?role,
            "Participant joined media"
        );

        Ok(MediaJoin {
            consultation_id,
            participant_id,
            rtp_capabilities: entry.router.rtp_capabilities,
            send_transport,
            recv_transport,
        })
    }

    async fn participant_leave_media(
        &mut self,
        consultation_id: ConsultationId,
        participant_id: ParticipantId,
    ) -> bool {
        let known = self
            .participants
            .get_mut(&consultation_id)
            .and_then(|p| p.remove(&participant_id))
            .is_some();
        let released = self.release_participant(consultation_id, participant_id).await;

        if !known && !released {
            warn!(
                target: "mo.actor.orchestrator",
                consultation_id = %consultation_id,
                participant_id = %participant_id,
                "Participant has no media to release"
            );
            return false;
        }

        self.emit(SessionEvent::ParticipantLeftMedia {
            consultation_id,
            participant_id,
        });
        info!(
            target: "mo.actor.orchestrator",
            consultation_id = %consultation_id,
            participant_id = %participant_id,
            "Participant left media"
        );
        true
    }

    /// Close a participant's consumers (including those consuming its
    /// producers), then its producers, then its transports. Returns true if
    /// the participant had transports.
    async fn release_participant(
        &mut self,
        consultation_id: ConsultationId,
        participant_id: ParticipantId,
    ) -> bool {
        let transports = self
            .tracker
            .transports_of(consultation_id, Some(participant_id));
        if transports.is_empty() {
            return false;
        }
        let transport_set: HashSet<TransportId> = transports.iter().cloned().collect();
        let producers = self.tracker.producers_on(&transport_set);
        let producer_set: HashSet<ProducerId> = producers.iter().cloned().collect();

        for consumer_id in self.tracker.consumers_touching(&transport_set, &producer_set) {
            let _ = self.tracker.close_consumer(&consumer_id).await;
        }
        for producer_id in producers {
            let _ = self.tracker.close_producer(&producer_id).await;
        }
        for transport_id in transports {
            let _ = self.tracker.close_transport(&transport_id).await;
        }
        true
    }

    async fn transition_state(
        &mut self,
        consultation_id: ConsultationId,
        status: ConsultationStatus,
        initiator_id: ParticipantId,
    ) -> Result<(), OrchestratorError> {
        debug!(
            target: "mo.actor.orchestrator",
            consultation_id = %consultation_id,
            status = ?status,
            initiator_id = %initiator_id,
            "Consultation state transition"
        );

        match status {
            ConsultationStatus::Active => {
                self.ensure_session(consultation_id).await?;
            }
            ConsultationStatus::Completed | ConsultationStatus::Cancelled => {
                self.cleanup_session(consultation_id, CloseReason::Ended)
                    .await;
            }
            ConsultationStatus::Expired => {
                self.cleanup_session(consultation_id, CloseReason::Expired)
                    .await;
            }
            ConsultationStatus::Scheduled | ConsultationStatus::Waiting => {}
        }
        Ok(())
    }

    /// Close all resources of a consultation, router last.
    async fn cleanup_session(&mut self, consultation_id: ConsultationId, reason: CloseReason) -> bool {
        self.participants.remove(&consultation_id);
        if self.allocator.entry(consultation_id).is_none() {
            debug!(
                target: "mo.actor.orchestrator",
                consultation_id = %consultation_id,
                "No session to clean up"
            );
            return false;
        }

        for consumer_id in self.tracker.consumers_of_consultation(consultation_id) {
            let _ = self.tracker.close_consumer(&consumer_id).await;
        }
        for producer_id in self.tracker.producers_of_consultation(consultation_id) {
            let _ = self.tracker.close_producer(&producer_id).await;
        }
        for transport_id in self.tracker.transports_of(consultation_id, None) {
            let _ = self.tracker.close_transport(&transport_id).await;
        }
        self.allocator
            .cleanup_router_for_consultation(consultation_id, &mut self.pool)
            .await;

        self.emit(SessionEvent::MediaSessionClosed {
            consultation_id,
            reason,
        });
        info!(
            target: "mo.actor.orchestrator",
            consultation_id = %consultation_id,
            reason = reason.as_str(),
            "Media session closed"
        );
        true
    }

    /// Crash cascade: clean up hosted sessions, drop the worker, replace it.
    async fn handle_worker_death(&mut self, death: WorkerDeath) {
        prom::record_worker_death();
        error!(
            target: "mo.actor.orchestrator",
            worker_id = %death.worker_id,
            pid = death.pid,
            reason = %death.reason,
            "Worker died"
        );

        if !self.pool.contains(&death.worker_id) {
            return;
        }

        let hosted = self.allocator.consultations_on(&death.worker_id);
        for consultation_id in &hosted {
            self.cleanup_session(*consultation_id, CloseReason::WorkerDied)
                .await;
        }
        self.pool.forget(&death.worker_id);

        if self.is_draining() {
            return;
        }
        match self.pool.spawn_worker().await {
            Ok(replacement) => info!(
                target: "mo.actor.orchestrator",
                dead_worker_id = %death.worker_id,
                worker_id = %replacement,
                sessions_closed = hosted.len(),
                "Replacement worker spawned"
            ),
            Err(e) => warn!(
                target: "mo.actor.orchestrator",
                dead_worker_id = %death.worker_id,
                error = %e,
                "Failed to replace dead worker, pool is below target"
            ),
        }
    }

    async fn scale_to(&mut self, target: usize, min_idle_load: u64) -> Result<usize, OrchestratorError> {
        if self.is_draining() {
            return Err(OrchestratorError::Draining);
        }

        while self.pool.len() < target {
            self.pool.spawn_worker().await?;
        }

        while self.pool.len() > target {
            let Some(worker_id) = self.pool.find_idle(min_idle_load) else {
                warn!(
                    target: "mo.actor.orchestrator",
                    workers = self.pool.len(),
                    target,
                    min_idle_load,
                    "No idle worker to remove"
                );
                break;
            };
            for consultation_id in self.allocator.consultations_on(&worker_id) {
                self.cleanup_session(consultation_id, CloseReason::WorkerRemoved)
                    .await;
            }
            self.pool.remove(&worker_id).await;
        }

        info!(
            target: "mo.actor.orchestrator",
            workers = self.pool.len(),
            target,
            "Worker pool scaled"
        );
        Ok(self.pool.len())
    }

    /// Close tracked transports and durable transport records older than
    /// `threshold`.
    async fn reap_hanging_transports(&mut self, threshold: Duration) -> usize {
        let now = Utc::now();
        let cutoff = chrono::Duration::from_std(threshold)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut hanging: BTreeSet<TransportId> = self
            .tracker
            .transports_created_before(cutoff)
            .into_iter()
            .collect();
        match self.store.transports_created_before(cutoff).await {
            Ok(records) => hanging.extend(records.into_iter().map(|r| r.transport_id)),
            Err(e) => warn!(
                target: "mo.actor.orchestrator",
                error = %e,
                "Failed to read transport records, reaping tracked transports only"
            ),
        }

        let mut reaped = 0;
        for transport_id in &hanging {
            let tracked = self.tracker.reap_transport(transport_id).await;
            debug!(
                target: "mo.actor.orchestrator",
                transport_id = %transport_id,
                tracked,
                "Hanging transport closed"
            );
            reaped += 1;
        }

        prom::record_hanging_transports_reaped(reaped);
        if reaped > 0 {
            info!(target: "mo.actor.orchestrator", reaped, "Hanging transports reaped");
        }
        reaped
    }

    fn health_metrics(&self) -> HealthMetrics {
        let per_worker = self
            .pool
            .loads()
            .into_iter()
            .map(|w| WorkerLoadReport {
                pid: w.pid,
                routers: w.routers,
            })
            .collect();

        HealthMetrics {
            workers: WorkerHealth {
                count: self.pool.len(),
                recommended: self.settings.recommended_workers,
                pids: self.pool.pids(),
            },
            sessions: SessionCounts {
                active_routers: self.allocator.len(),
                active_transports: self.tracker.transport_count(),
                active_producers: self.tracker.producer_count(),
                active_consumers: self.tracker.consumer_count(),
            },
            load: LoadReport {
                total_active_routers: self.pool.total_load(),
                per_worker,
            },
            broadcast: BroadcastHealth {
                configured: self.balancer.is_configured(),
                connected: self.balancer.is_connected(),
            },
            environment: self.settings.environment,
            max_avg_routers_per_worker: self.settings.max_avg_routers_per_worker,
        }
    }

    fn worker_snapshots(&self) -> Vec<WorkerSnapshot> {
        self.pool
            .loads()
            .into_iter()
            .map(|w| WorkerSnapshot {
                hosted_consultations: self.allocator.consultations_on(&w.worker_id),
                worker_id: w.worker_id,
                pid: w.pid,
                load: w.routers,
            })
            .collect()
    }

    async fn shutdown(&mut self) -> ShutdownSummary {
        if let Some(summary) = self.drained {
            return summary;
        }
        info!(target: "mo.actor.orchestrator", "Draining media resources");

        let summary = drain_all(
            &mut self.tracker,
            &mut self.allocator,
            &mut self.pool,
            &mut self.balancer,
        )
        .await;
        self.participants.clear();
        self.drained = Some(summary);
        self.refresh_load();
        summary
    }
}
