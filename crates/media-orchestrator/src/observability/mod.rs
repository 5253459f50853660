//! Observability for the media orchestrator.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `mo_workers_active` | Gauge | none | Pool size |
//! | `mo_routers_active` | Gauge | none | Live routers |
//! | `mo_transports_active` | Gauge | none | Live transports |
//! | `mo_producers_active` | Gauge | none | Live producers |
//! | `mo_consumers_active` | Gauge | none | Live consumers |
//! | `mo_worker_deaths_total` | Counter | none | Worker crashes |
//! | `mo_persistence_failures_total` | Counter | `operation` | Failed durable writes/deletes |
//! | `mo_load_broadcasts_total` | Counter | `status` | Load publications |
//! | `mo_hanging_transports_reaped_total` | Counter | none | Backstop closures |
//! | `mo_router_create_duration_seconds` | Histogram | none | Router creation latency |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthReport, HealthState, HealthStatus};
pub use metrics::init_metrics_recorder;
