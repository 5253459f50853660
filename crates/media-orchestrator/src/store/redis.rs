//! Redis-backed session store.
//!
//! # Connection Pattern
//!
//! `MultiplexedConnection` is cheap to clone and safe to use concurrently,
//! so every operation clones it instead of locking.

use super::{AvailableServer, ProducerRecord, RouterMapping, SessionStore, TransportRecord};
use crate::engine::{ProducerId, TransportId};
use crate::errors::OrchestratorError;
use chrono::{DateTime, Utc};
use common::types::ConsultationId;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use tracing::{debug, error, instrument, warn};

/// Sorted set indexing transport ids by creation time (unix millis).
pub const TRANSPORTS_CREATED_KEY: &str = "transports:created";

/// Hash holding the media server registry.
pub const MEDIA_SERVERS_KEY: &str = "media-servers";

fn router_key(consultation_id: ConsultationId) -> String {
    format!("consultation:{consultation_id}:router")
}

fn transport_key(transport_id: &TransportId) -> String {
    format!("transport:{transport_id}")
}

fn producer_key(producer_id: &ProducerId) -> String {
    format!("producer:{producer_id}")
}

fn redis_error(operation: &str, e: &redis::RedisError) -> OrchestratorError {
    warn!(
        target: "mo.store.redis",
        error = %e,
        operation,
        "Redis operation failed"
    );
    OrchestratorError::Persistence(format!("{operation}: {e}"))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, OrchestratorError> {
    serde_json::to_string(value)
        .map_err(|e| OrchestratorError::Internal(format!("Failed to serialize record: {e}")))
}

/// Redis implementation of [`SessionStore`].
#[derive(Clone)]
pub struct RedisSessionStore {
    connection: MultiplexedConnection,
}

impl RedisSessionStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::Persistence` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, OrchestratorError> {
        let client = Client::open(redis_url).map_err(|e| {
            // The URL may carry credentials; never log it.
            error!(target: "mo.store.redis", error = %e, "Failed to open Redis client");
            OrchestratorError::Persistence(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "mo.store.redis", error = %e, "Failed to connect to Redis");
                OrchestratorError::Persistence(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self { connection })
    }
}

#[async_trait::async_trait]
impl SessionStore for RedisSessionStore {
    #[instrument(skip_all, fields(consultation_id = %mapping.consultation_id))]
    async fn save_router_mapping(&self, mapping: &RouterMapping) -> Result<(), OrchestratorError> {
        let mut conn = self.connection.clone();
        let payload = encode(mapping)?;
        conn.set::<_, _, ()>(router_key(mapping.consultation_id), payload)
            .await
            .map_err(|e| redis_error("save_router_mapping", &e))?;

        debug!(
            target: "mo.store.redis",
            consultation_id = %mapping.consultation_id,
            router_id = %mapping.router_id,
            "Stored router mapping"
        );
        Ok(())
    }

    #[instrument(skip_all, fields(consultation_id = %consultation_id))]
    async fn delete_router_mapping(
        &self,
        consultation_id: ConsultationId,
    ) -> Result<(), OrchestratorError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(router_key(consultation_id))
            .await
            .map_err(|e| redis_error("delete_router_mapping", &e))
    }

    #[instrument(skip_all, fields(transport_id = %record.transport_id))]
    async fn save_transport(&self, record: &TransportRecord) -> Result<(), OrchestratorError> {
        let mut conn = self.connection.clone();
        let payload = encode(record)?;
        let score = record.created_at.timestamp_millis();

        redis::pipe()
            .atomic()
            .set(transport_key(&record.transport_id), payload)
            .ignore()
            .zadd(TRANSPORTS_CREATED_KEY, record.transport_id.as_str(), score)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| redis_error("save_transport", &e))
    }

    #[instrument(skip_all, fields(transport_id = %transport_id))]
    async fn delete_transport(&self, transport_id: &TransportId) -> Result<(), OrchestratorError> {
        let mut conn = self.connection.clone();
        redis::pipe()
            .atomic()
            .del(transport_key(transport_id))
            .ignore()
            .zrem(TRANSPORTS_CREATED_KEY, transport_id.as_str())
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| redis_error("delete_transport", &e))
    }

    #[instrument(skip_all)]
    async fn transports_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TransportRecord>, OrchestratorError> {
        let mut conn = self.connection.clone();
        // Exclusive upper bound.
        let max = format!("({}", cutoff.timestamp_millis());
        let ids: Vec<String> = conn
            .zrangebyscore(TRANSPORTS_CREATED_KEY, "-inf", max)
            .await
            .map_err(|e| redis_error("transports_created_before", &e))?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids
            .iter()
            .map(|id| transport_key(&TransportId::from(id.as_str())))
            .collect();
        let payloads: Vec<Option<String>> = conn
            .mget(&keys)
            .await
            .map_err(|e| redis_error("transports_created_before", &e))?;

        let mut records = Vec::with_capacity(payloads.len());
        let mut orphaned = Vec::new();
        for (id, payload) in ids.iter().zip(payloads) {
            match payload.map(|p| serde_json::from_str::<TransportRecord>(&p)) {
                Some(Ok(record)) => records.push(record),
                Some(Err(e)) => warn!(
                    target: "mo.store.redis",
                    transport_id = %id,
                    error = %e,
                    "Skipping malformed transport record"
                ),
                None => orphaned.push(id.clone()),
            }
        }

        if !orphaned.is_empty() {
            debug!(
                target: "mo.store.redis",
                count = orphaned.len(),
                "Dropping transport index entries without records"
            );
            conn.zrem::<_, _, ()>(TRANSPORTS_CREATED_KEY, orphaned)
                .await
                .map_err(|e| redis_error("transports_created_before", &e))?;
        }
        Ok(records)
    }

    #[instrument(skip_all, fields(producer_id = %record.producer_id))]
    async fn save_producer(&self, record: &ProducerRecord) -> Result<(), OrchestratorError> {
        let mut conn = self.connection.clone();
        let payload = encode(record)?;
        conn.set::<_, _, ()>(producer_key(&record.producer_id), payload)
            .await
            .map_err(|e| redis_error("save_producer", &e))
    }

    #[instrument(skip_all, fields(producer_id = %producer_id))]
    async fn delete_producer(&self, producer_id: &ProducerId) -> Result<(), OrchestratorError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(producer_key(producer_id))
            .await
            .map_err(|e| redis_error("delete_producer", &e))
    }

    #[instrument(skip_all)]
    async fn find_active_servers(&self) -> Result<Vec<AvailableServer>, OrchestratorError> {
        let mut conn = self.connection.clone();
        let entries: HashMap<String, String> = conn
            .hgetall(MEDIA_SERVERS_KEY)
            .await
            .map_err(|e| redis_error("find_active_servers", &e))?;

        let mut servers: Vec<AvailableServer> = entries
            .into_iter()
            .filter_map(|(field, payload)| {
                match serde_json::from_str::<AvailableServer>(&payload) {
                    Ok(server) => Some(server),
                    Err(e) => {
                        warn!(
                            target: "mo.store.redis",
                            server_id = %field,
                            error = %e,
                            "Skipping malformed media server record"
                        );
                        None
                    }
                }
            })
            .filter(|server| server.is_active)
            .collect();

        // HGETALL order is unspecified; sort for a stable registry order.
        servers.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        Ok(servers)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_key_patterns() {
        assert_eq!(router_key(ConsultationId(101)), "consultation:101:router");
        assert_eq!(transport_key(&TransportId::from("t-1")), "transport:t-1");
        assert_eq!(producer_key(&ProducerId::from("p-1")), "producer:p-1");
    }
}
