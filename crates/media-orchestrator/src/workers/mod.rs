//! Media worker management.

pub mod pool;

pub use pool::{WorkerDeath, DEFAULT_MIN_IDLE_LOAD, WorkerEntry, WorkerLoad, WorkerPool};
