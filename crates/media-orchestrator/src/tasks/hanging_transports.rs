//! Hanging-transport backstop.
//!
//! Every `check_interval` the task asks the orchestrator to close transports
//! older than `threshold`, whether or not they are still tracked in memory.
//! Catches transports leaked by clients that vanished mid-session.
//!
//! The first pass runs one full interval after start. The task exits when
//! its cancellation token fires.

use crate::actors::OrchestratorHandle;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Run the backstop loop until cancelled.
pub async fn start_hanging_transport_reaper(
    orchestrator: OrchestratorHandle,
    check_interval: Duration,
    threshold: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "mo.task.hanging_transports",
        check_interval_secs = check_interval.as_secs(),
        threshold_secs = threshold.as_secs(),
        "Starting hanging transport reaper"
    );

    let mut ticker = interval_at(Instant::now() + check_interval, check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match orchestrator.reap_hanging_transports(threshold).await {
                    Ok(0) => {
                        debug!(target: "mo.task.hanging_transports", "No hanging transports");
                    }
                    Ok(reaped) => {
                        warn!(
                            target: "mo.task.hanging_transports",
                            reaped,
                            "Closed hanging transports"
                        );
                    }
                    Err(e) => {
                        warn!(
                            target: "mo.task.hanging_transports",
                            error = %e,
                            "Hanging transport pass failed"
                        );
                    }
                }
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "mo.task.hanging_transports",
                    "Hanging transport reaper received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}
