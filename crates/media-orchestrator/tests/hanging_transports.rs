//! Hanging-transport backstop.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use chrono::Utc;
use media_orchestrator::engine::TransportId;
use media_orchestrator::session::TransportRole;
use media_orchestrator::tasks::start_hanging_transport_reaper;
use orchestrator_test_utils::*;
use std::time::Duration;

#[tokio::test]
async fn test_reaps_orphaned_durable_records() {
    let t = TestOrchestrator::start().await;
    let old = Utc::now() - chrono::Duration::minutes(10);
    t.store.insert_transport(orphan_transport_record("orphan-1", old));
    t.store
        .insert_transport(orphan_transport_record("orphan-fresh", Utc::now()));

    let reaped = t
        .handle
        .reap_hanging_transports(Duration::from_secs(300))
        .await
        .unwrap();

    assert_eq!(reaped, 1);
    assert!(t.store.transport(&TransportId::from("orphan-1")).is_none());
    assert!(t
        .store
        .transport(&TransportId::from("orphan-fresh"))
        .is_some());
}

#[tokio::test]
async fn test_reaps_tracked_transports_past_threshold() {
    let t = TestOrchestrator::start().await;
    let id = consultation(1);
    t.handle.create_router(id).await.unwrap();
    let transport = t
        .handle
        .create_transport(id, TransportRole::Consumer, Some(participant(3)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let reaped = t
        .handle
        .reap_hanging_transports(Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(reaped, 1);
    assert_eq!(t.engine.live_transports(), 0);
    assert!(t.store.transport(&transport.id).is_none());
    let report = t.handle.health_report().await.unwrap();
    assert_eq!(report.sessions.active_transports, 0);
    // The router is not part of the backstop.
    assert_eq!(report.sessions.active_routers, 1);
}

#[tokio::test]
async fn test_young_transports_survive() {
    let t = TestOrchestrator::start().await;
    let id = consultation(2);
    t.handle.create_router(id).await.unwrap();
    t.handle
        .create_transport(id, TransportRole::Producer, None)
        .await
        .unwrap();

    let reaped = t
        .handle
        .reap_hanging_transports(Duration::from_secs(3600))
        .await
        .unwrap();

    assert_eq!(reaped, 0);
    assert_eq!(t.engine.live_transports(), 1);
}

#[tokio::test]
async fn test_reaper_task_runs_until_cancelled() {
    let t = TestOrchestrator::start().await;
    let id = consultation(3);
    t.handle.create_router(id).await.unwrap();
    t.handle
        .create_transport(id, TransportRole::Producer, None)
        .await
        .unwrap();

    let cancel = t.handle.child_token();
    let task = tokio::spawn(start_hanging_transport_reaper(
        t.handle.clone(),
        Duration::from_millis(20),
        Duration::ZERO,
        cancel.clone(),
    ));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while t.engine.live_transports() > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "reaper never closed the transport"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("reaper should exit on cancellation")
        .unwrap();
}
