//! Ordered release of every media resource.
//!
//! Order: consumers, producers, transports, routers, workers, then the
//! load channel. A failure at one step is logged and counted; later steps
//! still run.

use crate::balancer::LoadBalancer;
use crate::routing::RouterAllocator;
use crate::session::{CloseOutcome, SessionTracker};
use crate::workers::WorkerPool;
use serde::Serialize;
use tracing::info;

/// Per-stage counts of a completed drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageOutcome {
    pub closed: usize,
    pub failed: usize,
}

impl From<CloseOutcome> for StageOutcome {
    fn from(outcome: CloseOutcome) -> Self {
        Self {
            closed: outcome.closed,
            failed: outcome.failed,
        }
    }
}

impl From<(usize, usize)> for StageOutcome {
    fn from((closed, failed): (usize, usize)) -> Self {
        Self { closed, failed }
    }
}

/// Result of a shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownSummary {
    pub consumers: StageOutcome,
    pub producers: StageOutcome,
    pub transports: StageOutcome,
    pub routers: StageOutcome,
    pub workers: StageOutcome,
    pub balancer_disconnected: bool,
}

impl ShutdownSummary {
    /// Total close failures across all stages.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.consumers.failed
            + self.producers.failed
            + self.transports.failed
            + self.routers.failed
            + self.workers.failed
    }
}

/// Release everything in dependency order.
pub(crate) async fn drain_all(
    tracker: &mut SessionTracker,
    allocator: &mut RouterAllocator,
    pool: &mut WorkerPool,
    balancer: &mut LoadBalancer,
) -> ShutdownSummary {
    info!(target: "mo.shutdown", "Closing consumers");
    let consumers = tracker.close_all_consumers().await.into();

    info!(target: "mo.shutdown", "Closing producers");
    let producers = tracker.close_all_producers().await.into();

    info!(target: "mo.shutdown", "Closing transports");
    let transports = tracker.close_all_transports().await.into();

    info!(target: "mo.shutdown", "Closing routers");
    let routers = allocator.close_all(pool).await.into();

    info!(target: "mo.shutdown", "Closing workers");
    let workers = pool.close_all().await.into();

    info!(target: "mo.shutdown", "Disconnecting load channel");
    balancer.shutdown().await;

    let summary = ShutdownSummary {
        consumers,
        producers,
        transports,
        routers,
        workers,
        balancer_disconnected: !balancer.is_connected(),
    };

    info!(
        target: "mo.shutdown",
        routers = summary.routers.closed,
        workers = summary.workers.closed,
        failures = summary.failures(),
        "Shutdown complete"
    );
    summary
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_sum_all_stages() {
        let summary = ShutdownSummary {
            consumers: StageOutcome { closed: 2, failed: 1 },
            producers: StageOutcome { closed: 1, failed: 0 },
            transports: StageOutcome { closed: 4, failed: 2 },
            routers: (1, 0).into(),
            workers: (3, 1).into(),
            balancer_disconnected: true,
        };
        assert_eq!(summary.failures(), 4);
    }

    #[test]
    fn test_summary_json_shape() {
        let json = serde_json::to_value(ShutdownSummary::default()).unwrap();
        assert_eq!(json["balancerDisconnected"], false);
        assert_eq!(json["routers"]["closed"], 0);
    }
}
