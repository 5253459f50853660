//! Orchestrator actor.
//!
//! ```text
//! OrchestratorActor (singleton per process)
//! ├── WorkerPool       (workers, load counters, death watchers)
//! ├── RouterAllocator  (consultation -> router)
//! ├── SessionTracker   (transports, producers, consumers)
//! └── LoadBalancer     (publisher + subscriber tasks)
//! ```
//!
//! Callers talk to it through [`OrchestratorHandle`]; lifecycle events go
//! out on a broadcast channel ([`OrchestratorHandle::subscribe_events`]).

pub mod messages;
pub mod metrics;
pub mod orchestrator;
pub mod shutdown;

pub use messages::{
    CloseReason, ConsultationStatus, MediaJoin, OrchestratorMessage, ParticipantRole,
    SessionEvent, SessionInfo, WorkerSnapshot,
};
pub use metrics::{LoadMetrics, LoadMetricsSnapshot};
pub use orchestrator::{OrchestratorActor, OrchestratorHandle, OrchestratorSettings};
pub use shutdown::{ShutdownSummary, StageOutcome};
