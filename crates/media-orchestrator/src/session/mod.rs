//! Per-participant session resources.

pub mod tracker;

pub use tracker::{
    CloseOutcome, SessionTracker, TrackedConsumer, TrackedProducer, TrackedTransport,
    TransportRole, TransportState,
};
