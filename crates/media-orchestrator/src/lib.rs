//! Media Orchestrator Library
//!
//! Real-time media session orchestration for telehealth consultations:
//!
//! - A pool of media workers with per-worker load counters and crash
//!   replacement
//! - One router per consultation, placed on the least-loaded worker
//! - Cross-instance load sharing over a pub/sub channel
//! - Transport, producer and consumer bookkeeping with durable side records
//! - Health diagnostics and ordered shutdown
//!
//! # Architecture
//!
//! ```text
//! lifecycle caller ──► OrchestratorHandle ──mpsc──► OrchestratorActor
//!                          ▲                          ├── WorkerPool ◄── worker watchers
//!                          │ broadcast                ├── RouterAllocator
//!                          └── SessionEvent           ├── SessionTracker
//!                                                     └── LoadBalancer ◄─► LoadChannel
//! ```
//!
//! The media engine ([`engine::MediaEngine`]), the durable store
//! ([`store::SessionStore`]) and the load channel
//! ([`balancer::LoadChannel`]) are trait seams; Redis and in-memory
//! implementations ship with the crate.
//!
//! # Modules
//!
//! - [`actors`] - orchestrator actor, messages, events, shutdown
//! - [`balancer`] - cross-instance load sharing
//! - [`config`] - configuration from environment
//! - [`engine`] - media engine seam and in-process engine
//! - [`errors`] - error taxonomy
//! - [`observability`] - health, diagnostics and metrics
//! - [`routing`] - router allocation
//! - [`session`] - transport, producer and consumer tracking
//! - [`store`] - durable records
//! - [`tasks`] - background jobs
//! - [`workers`] - worker pool

pub mod actors;
pub mod balancer;
pub mod config;
pub mod engine;
pub mod errors;
pub mod observability;
pub mod routing;
pub mod session;
pub mod store;
pub mod tasks;
pub mod workers;
