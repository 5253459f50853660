//! Health and diagnostics.
//!
//! Endpoints:
//! - `GET /health` - liveness probe
//! - `GET /ready` - readiness probe (ready once the worker pool is up,
//!   not ready during shutdown)
//! - `GET /diagnostics` - [`HealthReport`] JSON; 503 when unhealthy
//!
//! `/metrics` is merged in by the binary from the Prometheus handle.
//!
//! [`status`] and [`recommendations`] are pure functions of
//! [`HealthMetrics`], so the same input always yields the same output.

use crate::actors::OrchestratorHandle;
use crate::config::Environment;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Load spread between the busiest and idlest worker above which load is
/// reported as skewed.
pub const LOAD_SKEW_TOLERANCE: u64 = 5;

/// Overall health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerHealth {
    pub count: usize,
    pub recommended: usize,
    pub pids: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCounts {
    pub active_routers: usize,
    pub active_transports: usize,
    pub active_producers: usize,
    pub active_consumers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerLoadReport {
    pub pid: u32,
    pub routers: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub total_active_routers: u64,
    pub per_worker: Vec<WorkerLoadReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BroadcastHealth {
    pub configured: bool,
    pub connected: bool,
}

/// Point-in-time inputs of the health computation.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthMetrics {
    pub workers: WorkerHealth,
    pub sessions: SessionCounts,
    pub load: LoadReport,
    pub broadcast: BroadcastHealth,
    pub environment: Environment,
    pub max_avg_routers_per_worker: f64,
}

impl HealthMetrics {
    /// Average routers per worker (0 with no workers).
    #[must_use]
    pub fn average_load(&self) -> f64 {
        if self.workers.count == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let avg = self.load.total_active_routers as f64 / self.workers.count as f64;
        avg
    }

    fn load_spread(&self) -> Option<(u64, u64)> {
        let min = self.load.per_worker.iter().map(|w| w.routers).min()?;
        let max = self.load.per_worker.iter().map(|w| w.routers).max()?;
        Some((min, max))
    }
}

/// Derive the overall status.
#[must_use]
pub fn status(metrics: &HealthMetrics) -> HealthStatus {
    if metrics.workers.count == 0 {
        return HealthStatus::Unhealthy;
    }
    let below_recommended = metrics.workers.count < metrics.workers.recommended;
    let overloaded = metrics.average_load() > metrics.max_avg_routers_per_worker;
    let unshared_production =
        metrics.environment == Environment::Production && !metrics.broadcast.configured;

    if below_recommended || overloaded || unshared_production {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Operator recommendations, in a fixed order.
#[must_use]
pub fn recommendations(metrics: &HealthMetrics) -> Vec<String> {
    let mut out = Vec::new();

    if metrics.workers.count == 0 {
        out.push("No media workers are running: restart the media orchestrator".to_string());
    } else if metrics.workers.count < metrics.workers.recommended {
        out.push(format!(
            "Increase worker count to at least {} (currently {})",
            metrics.workers.recommended, metrics.workers.count
        ));
    }

    let avg = metrics.average_load();
    if avg > metrics.max_avg_routers_per_worker {
        out.push(format!(
            "Average load of {avg:.1} routers per worker exceeds {:.1}: add workers or media server instances",
            metrics.max_avg_routers_per_worker
        ));
    }

    if let Some((min, max)) = metrics.load_spread() {
        if max - min > LOAD_SKEW_TOLERANCE {
            out.push(format!(
                "Router load is unevenly distributed across workers (min {min}, max {max})"
            ));
        }
    }

    if !metrics.broadcast.configured {
        out.push(
            "Configure a broadcast channel (REDIS_URL) for multi-instance deployment".to_string(),
        );
    } else if !metrics.broadcast.connected {
        out.push(
            "Broadcast channel is disconnected: placement has fallen back to single-instance mode"
                .to_string(),
        );
    }

    out
}

/// Diagnostics report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub workers: WorkerHealth,
    pub sessions: SessionCounts,
    pub load: LoadReport,
    pub broadcast: BroadcastHealth,
    pub environment: &'static str,
    pub recommendations: Vec<String>,
}

impl HealthReport {
    #[must_use]
    pub fn from_metrics(metrics: HealthMetrics) -> Self {
        Self {
            status: status(&metrics),
            recommendations: recommendations(&metrics),
            environment: metrics.environment.as_str(),
            workers: metrics.workers,
            sessions: metrics.sessions,
            load: metrics.load,
            broadcast: metrics.broadcast,
        }
    }
}

/// Liveness and readiness flags.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Live, not ready.
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct AppState {
    health: Arc<HealthState>,
    orchestrator: OrchestratorHandle,
}

/// Router with `/health`, `/ready` and `/diagnostics`.
pub fn health_router(health: Arc<HealthState>, orchestrator: OrchestratorHandle) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .route("/diagnostics", get(diagnostics_handler))
        .with_state(AppState {
            health,
            orchestrator,
        })
}

async fn liveness_handler(State(state): State<AppState>) -> StatusCode {
    if state.health.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.health.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn diagnostics_handler(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<HealthReport>), StatusCode> {
    let report = state.orchestrator.health_report().await.map_err(|e| {
        warn!(target: "mo.health", error = %e, "Diagnostics unavailable");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    let code = if report.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    Ok((code, Json(report)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn metrics(count: usize, loads: &[u64]) -> HealthMetrics {
        HealthMetrics {
            workers: WorkerHealth {
                count,
                recommended: 3,
                pids: (0..count as u32).map(|i| 40_000 + i).collect(),
            },
            sessions: SessionCounts {
                active_routers: loads.iter().sum::<u64>() as usize,
                active_transports: 0,
                active_producers: 0,
                active_consumers: 0,
            },
            load: LoadReport {
                total_active_routers: loads.iter().sum(),
                per_worker: loads
                    .iter()
                    .enumerate()
                    .map(|(i, &routers)| WorkerLoadReport {
                        pid: 40_000 + i as u32,
                        routers,
                    })
                    .collect(),
            },
            broadcast: BroadcastHealth {
                configured: true,
                connected: true,
            },
            environment: Environment::Development,
            max_avg_routers_per_worker: 10.0,
        }
    }

    #[test]
    fn test_no_workers_is_unhealthy() {
        let m = metrics(0, &[]);
        assert_eq!(status(&m), HealthStatus::Unhealthy);
        assert!(recommendations(&m)[0].contains("No media workers"));
    }

    #[test]
    fn test_below_recommended_with_load_is_degraded() {
        let m = metrics(2, &[1, 2]);
        assert_eq!(status(&m), HealthStatus::Degraded);
        assert_eq!(
            recommendations(&m),
            vec!["Increase worker count to at least 3 (currently 2)".to_string()]
        );
    }

    #[test]
    fn test_recommended_with_low_load_is_healthy() {
        let m = metrics(3, &[1, 0, 2]);
        assert_eq!(status(&m), HealthStatus::Healthy);
        assert!(recommendations(&m).is_empty());
    }

    #[test]
    fn test_high_average_load_is_degraded() {
        let m = metrics(3, &[11, 12, 11]);
        assert_eq!(status(&m), HealthStatus::Degraded);
        assert!(recommendations(&m)[0].starts_with("Average load of 11.3"));
    }

    #[test]
    fn test_production_without_broadcast_is_degraded() {
        let mut m = metrics(3, &[0, 0, 0]);
        m.environment = Environment::Production;
        m.broadcast.configured = false;
        m.broadcast.connected = false;
        assert_eq!(status(&m), HealthStatus::Degraded);

        m.environment = Environment::Staging;
        assert_eq!(status(&m), HealthStatus::Healthy);
        assert_eq!(recommendations(&m).len(), 1);
    }

    #[test]
    fn test_recommendations_order_is_stable() {
        let mut m = metrics(2, &[0, 30]);
        m.broadcast.connected = false;

        let first = recommendations(&m);
        assert_eq!(first.len(), 4);
        assert!(first[0].starts_with("Increase worker count"));
        assert!(first[1].starts_with("Average load"));
        assert!(first[2].starts_with("Router load is unevenly"));
        assert!(first[3].starts_with("Broadcast channel is disconnected"));
        assert_eq!(recommendations(&m), first);
    }

    #[test]
    fn test_report_json_shape() {
        let report = HealthReport::from_metrics(metrics(3, &[1, 0, 0]));
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["workers"]["count"], 3);
        assert_eq!(json["workers"]["recommended"], 3);
        assert_eq!(json["workers"]["pids"].as_array().unwrap().len(), 3);
        assert_eq!(json["sessions"]["activeRouters"], 1);
        assert_eq!(json["load"]["totalActiveRouters"], 1);
        assert_eq!(json["load"]["perWorker"][0]["routers"], 1);
        assert_eq!(json["broadcast"]["connected"], true);
        assert_eq!(json["environment"], "development");
    }

    #[test]
    fn test_health_state_flags() {
        let state = HealthState::new();
        assert!(state.is_live());
        assert!(!state.is_ready());

        state.set_ready();
        assert!(state.is_ready());
        state.set_not_ready();
        assert!(!state.is_ready());
    }
}
