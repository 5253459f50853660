//! Media engine seam.
//!
//! The orchestrator never forwards RTP itself. It creates and destroys
//! resource handles (workers, routers, transports, producers, consumers)
//! on a media engine through the [`MediaEngine`] trait and keeps its own
//! bookkeeping on top.
//!
//! Signalling payloads produced or consumed by clients (DTLS parameters,
//! RTP parameters, RTP capabilities) pass through as opaque JSON.
//!
//! # Implementations
//!
//! - [`InProcessEngine`] - in-memory engine for development and tests. It
//!   allocates ids and ports, records every call in a journal and supports
//!   worker kills and failure injection.

pub mod in_process;

pub use in_process::{EngineCall, InProcessEngine};

use crate::errors::OrchestratorError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use tokio::sync::oneshot;

macro_rules! engine_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a fresh random id.
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Borrow the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

engine_id!(
    /// Identifier of a media worker.
    WorkerId
);
engine_id!(
    /// Identifier of a routing context.
    RouterId
);
engine_id!(
    /// Identifier of a transport.
    TransportId
);
engine_id!(
    /// Identifier of a producer.
    ProducerId
);
engine_id!(
    /// Identifier of a consumer.
    ConsumerId
);

/// Media kind of a producer or consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RTCP feedback mechanism supported by a codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcpFeedback {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub parameter: String,
}

impl RtcpFeedback {
    #[must_use]
    pub fn new(kind: &str, parameter: &str) -> Self {
        Self {
            kind: kind.to_string(),
            parameter: parameter.to_string(),
        }
    }
}

/// Codec a router is able to route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    pub preferred_payload_type: u8,
    pub clock_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

/// RTP capabilities of a router, handed to clients for device loading.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    pub codecs: Vec<RtpCodecCapability>,
}

impl RtpCapabilities {
    /// True when at least one codec of the given kind is present.
    #[must_use]
    pub fn supports(&self, kind: MediaKind) -> bool {
        self.codecs.iter().any(|c| c.kind == kind)
    }
}

/// Identity of a running worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: WorkerId,
    /// OS process id of the worker.
    pub pid: u32,
}

/// Exit notification delivered when a worker dies unexpectedly.
#[derive(Debug, Clone)]
pub struct WorkerExit {
    pub reason: String,
}

/// A freshly spawned worker and its exit signal.
///
/// The sender side of `exited` is dropped without a value when the worker
/// is closed on purpose, so watchers can tell a crash from a close.
#[derive(Debug)]
pub struct SpawnedWorker {
    pub info: WorkerInfo,
    pub exited: oneshot::Receiver<WorkerExit>,
}

/// A routing context created on a worker.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    pub id: RouterId,
    pub worker_id: WorkerId,
    pub rtp_capabilities: RtpCapabilities,
}

/// Network options for transport creation.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub listen_ip: IpAddr,
    pub announced_address: Option<String>,
    pub port_min: u16,
    pub port_max: u16,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
}

/// ICE candidate advertised for a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    pub ip: String,
    pub protocol: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub candidate_type: String,
}

/// A transport created on a router.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportHandle {
    pub id: TransportId,
    #[serde(skip)]
    pub router_id: RouterId,
    pub ice_parameters: Value,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: Value,
}

/// A producer created on a transport.
#[derive(Debug, Clone)]
pub struct ProducerHandle {
    pub id: ProducerId,
    pub transport_id: TransportId,
    pub kind: MediaKind,
}

/// A consumer created on a transport.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerHandle {
    pub id: ConsumerId,
    #[serde(skip)]
    pub transport_id: TransportId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    pub paused: bool,
}

/// Native media engine operations used by the orchestrator.
///
/// Every method may suspend. Close methods return an error for unknown or
/// already-closed handles; callers on cleanup paths log and continue.
#[async_trait::async_trait]
pub trait MediaEngine: Send + Sync {
    /// Spawn a new worker.
    async fn spawn_worker(&self) -> Result<SpawnedWorker, OrchestratorError>;

    /// Close a worker (and everything still hosted on it).
    async fn close_worker(&self, worker_id: &WorkerId) -> Result<(), OrchestratorError>;

    /// Create a routing context on a worker.
    async fn create_router(
        &self,
        worker_id: &WorkerId,
        codecs: &[RtpCodecCapability],
    ) -> Result<RouterHandle, OrchestratorError>;

    /// Close a routing context.
    async fn close_router(&self, router_id: &RouterId) -> Result<(), OrchestratorError>;

    /// Create a transport on a router.
    async fn create_transport(
        &self,
        router_id: &RouterId,
        options: &TransportOptions,
    ) -> Result<TransportHandle, OrchestratorError>;

    /// Complete the DTLS handshake parameters of a transport.
    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: &Value,
    ) -> Result<(), OrchestratorError>;

    /// Close a transport.
    async fn close_transport(&self, transport_id: &TransportId) -> Result<(), OrchestratorError>;

    /// Start receiving a media stream on a transport.
    async fn produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: &Value,
    ) -> Result<ProducerHandle, OrchestratorError>;

    /// Close a producer.
    async fn close_producer(&self, producer_id: &ProducerId) -> Result<(), OrchestratorError>;

    /// Start sending a producer's stream over a transport.
    async fn consume(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &Value,
        paused: bool,
    ) -> Result<ConsumerHandle, OrchestratorError>;

    /// Close a consumer.
    async fn close_consumer(&self, consumer_id: &ConsumerId) -> Result<(), OrchestratorError>;
}
