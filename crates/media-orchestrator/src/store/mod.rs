//! Durable side records.
//!
//! The in-memory registries inside the orchestrator are authoritative for the
//! process lifetime. The records written here exist for auditing, recovery
//! across restarts and the hanging-transport backstop.
//!
//! # Key Patterns (Redis)
//!
//! - `consultation:{id}:router` - router mapping (JSON)
//! - `transport:{id}` - transport record (JSON)
//! - `transports:created` - ZSET of transport ids scored by creation time
//! - `producer:{id}` - producer record (JSON)
//! - `media-servers` - HASH of server id to `AvailableServer` (JSON)

pub mod memory;
pub mod redis;

pub use self::memory::InMemoryStore;
pub use self::redis::RedisSessionStore;

use crate::engine::{MediaKind, ProducerId, RouterId, TransportId, WorkerId};
use crate::errors::OrchestratorError;
use crate::session::TransportRole;
use chrono::{DateTime, Utc};
use common::types::{ConsultationId, ParticipantId, ServerId};
use serde::{Deserialize, Serialize};

/// Consultation to router mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterMapping {
    pub consultation_id: ConsultationId,
    pub router_id: RouterId,
    pub worker_id: WorkerId,
    pub server_id: ServerId,
    pub created_at: DateTime<Utc>,
}

/// Durable record of a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportRecord {
    pub transport_id: TransportId,
    pub consultation_id: ConsultationId,
    pub router_id: RouterId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<ParticipantId>,
    pub role: TransportRole,
    pub server_id: ServerId,
    pub created_at: DateTime<Utc>,
}

/// Durable record of a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerRecord {
    pub producer_id: ProducerId,
    pub transport_id: TransportId,
    pub consultation_id: ConsultationId,
    pub kind: MediaKind,
    pub created_at: DateTime<Utc>,
}

/// Registry entry of a deployable media server instance.
///
/// Maintained by the administrative surface; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableServer {
    pub server_id: ServerId,
    pub address: String,
    pub max_routers: u32,
    pub is_active: bool,
}

/// Durable storage used by the orchestrator.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_router_mapping(&self, mapping: &RouterMapping) -> Result<(), OrchestratorError>;

    async fn delete_router_mapping(
        &self,
        consultation_id: ConsultationId,
    ) -> Result<(), OrchestratorError>;

    async fn save_transport(&self, record: &TransportRecord) -> Result<(), OrchestratorError>;

    async fn delete_transport(&self, transport_id: &TransportId) -> Result<(), OrchestratorError>;

    /// Transport records created strictly before `cutoff`, oldest first.
    async fn transports_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TransportRecord>, OrchestratorError>;

    async fn save_producer(&self, record: &ProducerRecord) -> Result<(), OrchestratorError>;

    async fn delete_producer(&self, producer_id: &ProducerId) -> Result<(), OrchestratorError>;

    /// Active server records, in registry order.
    async fn find_active_servers(&self) -> Result<Vec<AvailableServer>, OrchestratorError>;
}
