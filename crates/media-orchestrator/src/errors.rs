//! Media orchestrator error types.
//!
//! Variants are grouped by failure class so callers can decide what to
//! surface. Not-found and exhausted errors propagate to the immediate
//! caller; persistence and broadcast failures are contained inside the
//! orchestrator and only reach logs and health metrics.

use thiserror::Error;

/// Failure class of an [`OrchestratorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A router, transport, producer or consumer id is unknown.
    ResourceNotFound,
    /// No worker or no active media server is available.
    ResourceExhausted,
    /// A durable write/delete failed after in-memory state changed.
    PersistenceFailure,
    /// The broadcast channel is unreachable.
    TransientInfrastructureFailure,
    /// The request conflicts with existing state.
    Conflict,
    /// The orchestrator is draining and refuses new work.
    Unavailable,
    /// Engine, configuration or internal plumbing failure.
    Internal,
}

/// Media orchestrator error type.
///
/// Error codes:
/// - not found: 4
/// - conflict: 5
/// - internal, engine, persistence, broadcast, config: 6
/// - no worker / no media server / draining: 7
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No router is registered for the consultation.
    #[error("Router not found for consultation: {0}")]
    RouterNotFound(String),

    /// Transport id is unknown.
    #[error("Transport not found: {0}")]
    TransportNotFound(String),

    /// Producer id is unknown.
    #[error("Producer not found: {0}")]
    ProducerNotFound(String),

    /// Consumer id is unknown.
    #[error("Consumer not found: {0}")]
    ConsumerNotFound(String),

    /// The worker pool is empty.
    #[error("No worker available")]
    NoWorkerAvailable,

    /// No active media server record exists.
    #[error("No available media server")]
    NoMediaServerAvailable,

    /// A router already exists for the consultation.
    #[error("Router already exists for consultation: {0}")]
    RouterExists(String),

    /// Durable storage operation failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Broadcast channel operation failed.
    #[error("Broadcast channel error: {0}")]
    Broadcast(String),

    /// Media engine operation failed.
    #[error("Media engine error: {0}")]
    Engine(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The orchestrator is shutting down.
    #[error("Orchestrator is draining")]
    Draining,

    /// Internal error (actor channel closed, serialization, ...).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Returns the failure class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::RouterNotFound(_)
            | OrchestratorError::TransportNotFound(_)
            | OrchestratorError::ProducerNotFound(_)
            | OrchestratorError::ConsumerNotFound(_) => ErrorKind::ResourceNotFound,
            OrchestratorError::NoWorkerAvailable | OrchestratorError::NoMediaServerAvailable => {
                ErrorKind::ResourceExhausted
            }
            OrchestratorError::RouterExists(_) => ErrorKind::Conflict,
            OrchestratorError::Persistence(_) => ErrorKind::PersistenceFailure,
            OrchestratorError::Broadcast(_) => ErrorKind::TransientInfrastructureFailure,
            OrchestratorError::Draining => ErrorKind::Unavailable,
            OrchestratorError::Engine(_)
            | OrchestratorError::Config(_)
            | OrchestratorError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns the numeric error code relayed to the lifecycle caller.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::ResourceNotFound => 4,
            ErrorKind::Conflict => 5,
            ErrorKind::PersistenceFailure
            | ErrorKind::TransientInfrastructureFailure
            | ErrorKind::Internal => 6,
            ErrorKind::ResourceExhausted | ErrorKind::Unavailable => 7,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            OrchestratorError::RouterNotFound(_) => "Media session not found".to_string(),
            OrchestratorError::TransportNotFound(_) => "Transport not found".to_string(),
            OrchestratorError::ProducerNotFound(_) => "Producer not found".to_string(),
            OrchestratorError::ConsumerNotFound(_) => "Consumer not found".to_string(),
            OrchestratorError::NoWorkerAvailable | OrchestratorError::NoMediaServerAvailable => {
                "No media capacity available, please try again".to_string()
            }
            OrchestratorError::RouterExists(_) => "Media session already exists".to_string(),
            OrchestratorError::Draining => {
                "Media server is shutting down, please reconnect".to_string()
            }
            OrchestratorError::Persistence(_)
            | OrchestratorError::Broadcast(_)
            | OrchestratorError::Engine(_)
            | OrchestratorError::Config(_)
            | OrchestratorError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            OrchestratorError::RouterNotFound("101".to_string()).kind(),
            ErrorKind::ResourceNotFound
        );
        assert_eq!(
            OrchestratorError::ConsumerNotFound("c1".to_string()).kind(),
            ErrorKind::ResourceNotFound
        );
        assert_eq!(
            OrchestratorError::NoWorkerAvailable.kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(
            OrchestratorError::NoMediaServerAvailable.kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(
            OrchestratorError::Persistence("timeout".to_string()).kind(),
            ErrorKind::PersistenceFailure
        );
        assert_eq!(
            OrchestratorError::Broadcast("closed".to_string()).kind(),
            ErrorKind::TransientInfrastructureFailure
        );
        assert_eq!(
            OrchestratorError::RouterExists("101".to_string()).kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            OrchestratorError::TransportNotFound("t".to_string()).error_code(),
            4
        );
        assert_eq!(
            OrchestratorError::RouterExists("101".to_string()).error_code(),
            5
        );
        assert_eq!(OrchestratorError::Engine("x".to_string()).error_code(), 6);
        assert_eq!(OrchestratorError::Internal("x".to_string()).error_code(), 6);
        assert_eq!(OrchestratorError::NoWorkerAvailable.error_code(), 7);
        assert_eq!(OrchestratorError::Draining.error_code(), 7);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = OrchestratorError::Persistence("connection refused at 10.0.0.5:6379".to_string());
        assert!(!err.client_message().contains("10.0.0.5"));
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = OrchestratorError::RouterNotFound("101".to_string());
        assert!(!err.client_message().contains("101"));
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            OrchestratorError::RouterNotFound("101".to_string()).to_string(),
            "Router not found for consultation: 101"
        );
        assert_eq!(
            OrchestratorError::NoMediaServerAvailable.to_string(),
            "No available media server"
        );
    }
}
