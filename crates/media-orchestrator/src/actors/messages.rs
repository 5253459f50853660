//! Message and event types of the orchestrator actor.
//!
//! Requests travel over `tokio::sync::mpsc` with a `oneshot` reply channel.
//! Events for the consultation lifecycle go out on a `broadcast` channel.

use super::shutdown::ShutdownSummary;
use crate::engine::{
    ConsumerHandle, ConsumerId, MediaKind, ProducerHandle, ProducerId, RouterHandle, RouterId,
    RtpCapabilities, TransportHandle, TransportId, WorkerId,
};
use crate::errors::OrchestratorError;
use crate::observability::health::HealthReport;
use crate::session::TransportRole;
use common::types::{ConsultationId, ParticipantId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::oneshot;

/// Role of a consultation participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Patient,
    Practitioner,
    Observer,
}

/// Consultation status as driven by the lifecycle service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsultationStatus {
    Scheduled,
    Waiting,
    Active,
    Completed,
    Cancelled,
    Expired,
}

impl ConsultationStatus {
    /// Statuses after which the media session is released.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConsultationStatus::Completed | ConsultationStatus::Cancelled | ConsultationStatus::Expired
        )
    }
}

/// Why a media session closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The consultation ended normally.
    Ended,
    /// A scheduled expiry fired or the consultation expired.
    Expired,
    /// The hosting worker crashed; participants must rejoin.
    WorkerDied,
    /// The hosting worker was removed during scale-down.
    WorkerRemoved,
    /// The process is shutting down.
    Shutdown,
}

impl CloseReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Ended => "ended",
            CloseReason::Expired => "expired",
            CloseReason::WorkerDied => "worker_died",
            CloseReason::WorkerRemoved => "worker_removed",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Event delivered to the consultation lifecycle service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SessionEvent {
    SessionReady {
        consultation_id: ConsultationId,
        rtp_capabilities: RtpCapabilities,
    },
    ParticipantJoinedMedia {
        consultation_id: ConsultationId,
        participant_id: ParticipantId,
    },
    ParticipantLeftMedia {
        consultation_id: ConsultationId,
        participant_id: ParticipantId,
    },
    MediaSessionClosed {
        consultation_id: ConsultationId,
        reason: CloseReason,
    },
}

impl SessionEvent {
    #[must_use]
    pub fn consultation_id(&self) -> ConsultationId {
        match self {
            SessionEvent::SessionReady {
                consultation_id, ..
            }
            | SessionEvent::ParticipantJoinedMedia {
                consultation_id, ..
            }
            | SessionEvent::ParticipantLeftMedia {
                consultation_id, ..
            }
            | SessionEvent::MediaSessionClosed {
                consultation_id, ..
            } => *consultation_id,
        }
    }
}

/// Result of `initialize_session`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub consultation_id: ConsultationId,
    pub router_id: RouterId,
    pub rtp_capabilities: RtpCapabilities,
    /// False when an existing router was reused.
    pub created: bool,
}

/// Transports handed to a participant joining the media session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaJoin {
    pub consultation_id: ConsultationId,
    pub participant_id: ParticipantId,
    pub rtp_capabilities: RtpCapabilities,
    pub send_transport: TransportHandle,
    pub recv_transport: TransportHandle,
}

/// Per-worker load with the routers actually registered on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub worker_id: WorkerId,
    pub pid: u32,
    pub load: u64,
    pub hosted_consultations: Vec<ConsultationId>,
}

/// Messages sent to the orchestrator actor.
#[derive(Debug)]
pub enum OrchestratorMessage {
    InitializeSession {
        consultation_id: ConsultationId,
        initiator_id: ParticipantId,
        initiator_role: ParticipantRole,
        respond_to: oneshot::Sender<Result<SessionInfo, OrchestratorError>>,
    },

    ParticipantJoinMedia {
        consultation_id: ConsultationId,
        participant_id: ParticipantId,
        role: ParticipantRole,
        respond_to: oneshot::Sender<Result<MediaJoin, OrchestratorError>>,
    },

    /// Replies false when the participant had no media resources.
    ParticipantLeaveMedia {
        consultation_id: ConsultationId,
        participant_id: ParticipantId,
        respond_to: oneshot::Sender<bool>,
    },

    TransitionState {
        consultation_id: ConsultationId,
        status: ConsultationStatus,
        initiator_id: ParticipantId,
        respond_to: oneshot::Sender<Result<(), OrchestratorError>>,
    },

    /// Replies false when the consultation had no session.
    CleanupSession {
        consultation_id: ConsultationId,
        reason: CloseReason,
        respond_to: oneshot::Sender<bool>,
    },

    CreateRouter {
        consultation_id: ConsultationId,
        respond_to: oneshot::Sender<Result<RouterHandle, OrchestratorError>>,
    },

    GetRouter {
        consultation_id: ConsultationId,
        respond_to: oneshot::Sender<Option<RouterHandle>>,
    },

    CleanupRouter {
        consultation_id: ConsultationId,
        respond_to: oneshot::Sender<bool>,
    },

    CreateTransport {
        consultation_id: ConsultationId,
        role: TransportRole,
        participant_id: Option<ParticipantId>,
        respond_to: oneshot::Sender<Result<TransportHandle, OrchestratorError>>,
    },

    ConnectTransport {
        transport_id: TransportId,
        dtls_parameters: Value,
        respond_to: oneshot::Sender<Result<(), OrchestratorError>>,
    },

    Produce {
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: Value,
        respond_to: oneshot::Sender<Result<ProducerHandle, OrchestratorError>>,
    },

    Consume {
        transport_id: TransportId,
        producer_id: ProducerId,
        rtp_capabilities: Value,
        respond_to: oneshot::Sender<Result<ConsumerHandle, OrchestratorError>>,
    },

    CloseTransport {
        transport_id: TransportId,
        respond_to: oneshot::Sender<Result<(), OrchestratorError>>,
    },

    CloseProducer {
        producer_id: ProducerId,
        respond_to: oneshot::Sender<Result<(), OrchestratorError>>,
    },

    CloseConsumer {
        consumer_id: ConsumerId,
        respond_to: oneshot::Sender<Result<(), OrchestratorError>>,
    },

    /// Grow or shrink the pool. Replies with the resulting pool size.
    ScaleWorkers {
        target: usize,
        min_idle_load: u64,
        respond_to: oneshot::Sender<Result<usize, OrchestratorError>>,
    },

    /// Close transports older than `threshold`. Replies with the count.
    ReapHangingTransports {
        threshold: Duration,
        respond_to: oneshot::Sender<usize>,
    },

    GetHealthReport {
        respond_to: oneshot::Sender<HealthReport>,
    },

    GetWorkerSnapshots {
        respond_to: oneshot::Sender<Vec<WorkerSnapshot>>,
    },

    Shutdown {
        respond_to: oneshot::Sender<ShutdownSummary>,
    },
}
