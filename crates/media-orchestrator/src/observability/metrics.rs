//! Metrics definitions for the media orchestrator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `mo_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! - `operation`: bounded by the store operations (~7 values)
//! - `status`: success, error

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Router creation: engine call plus a store write
        .set_buckets_for_metric(
            Matcher::Prefix("mo_router_create".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set router create buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Resource Gauges
// ============================================================================

/// Metric: `mo_workers_active`
pub fn set_workers_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("mo_workers_active").set(count as f64);
}

/// Set the live session resource gauges.
///
/// Metrics: `mo_routers_active`, `mo_transports_active`,
/// `mo_producers_active`, `mo_consumers_active`
pub fn set_session_resources(routers: usize, transports: usize, producers: usize, consumers: usize) {
    #[allow(clippy::cast_precision_loss)]
    {
        gauge!("mo_routers_active").set(routers as f64);
        gauge!("mo_transports_active").set(transports as f64);
        gauge!("mo_producers_active").set(producers as f64);
        gauge!("mo_consumers_active").set(consumers as f64);
    }
}

// ============================================================================
// Counters
// ============================================================================

/// Metric: `mo_worker_deaths_total`
pub fn record_worker_death() {
    counter!("mo_worker_deaths_total").increment(1);
}

/// Record a durable write/delete that failed after in-memory state changed.
///
/// Metric: `mo_persistence_failures_total`
/// Labels: `operation`
pub fn record_persistence_failure(operation: &'static str) {
    counter!("mo_persistence_failures_total", "operation" => operation).increment(1);
}

/// Metric: `mo_load_broadcasts_total`
/// Labels: `status` (success, error)
pub fn record_load_broadcast(status: &'static str) {
    counter!("mo_load_broadcasts_total", "status" => status).increment(1);
}

/// Metric: `mo_hanging_transports_reaped_total`
pub fn record_hanging_transports_reaped(count: usize) {
    counter!("mo_hanging_transports_reaped_total").increment(count as u64);
}

// ============================================================================
// Latency
// ============================================================================

/// Metric: `mo_router_create_duration_seconds`
pub fn record_router_create_duration(duration: Duration) {
    histogram!("mo_router_create_duration_seconds").record(duration.as_secs_f64());
}
