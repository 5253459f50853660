//! # Orchestrator Test Utilities
//!
//! Shared harness and fixtures for media orchestrator integration tests.
//! Everything runs in process: [`InProcessEngine`] stands in for the native
//! media engine, [`InMemoryStore`] for Redis and [`LocalLoadChannel`] for
//! pub/sub.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use orchestrator_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let t = TestOrchestrator::builder().workers(3).start().await;
//!     let router = t.handle.create_router(consultation(101)).await.unwrap();
//!     assert!(!router.rtp_capabilities.codecs.is_empty());
//! }
//! ```
//!
//! [`InProcessEngine`]: media_orchestrator::engine::InProcessEngine
//! [`InMemoryStore`]: media_orchestrator::store::InMemoryStore
//! [`LocalLoadChannel`]: media_orchestrator::balancer::LocalLoadChannel

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::*;
