//! Router allocation through the orchestrator handle.
//!
//! Covers the consultation-to-router lifecycle, load conservation across
//! workers and the failure modes of router creation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use media_orchestrator::actors::WorkerSnapshot;
use media_orchestrator::engine::MediaKind;
use media_orchestrator::errors::{ErrorKind, OrchestratorError};
use orchestrator_test_utils::*;

fn assert_load_conserved(snapshots: &[WorkerSnapshot]) {
    for worker in snapshots {
        assert_eq!(
            worker.load,
            worker.hosted_consultations.len() as u64,
            "worker {} load does not match its routers",
            worker.worker_id
        );
    }
}

#[tokio::test]
async fn test_create_get_cleanup_round_trip() {
    let t = TestOrchestrator::start().await;
    let id = consultation(101);

    let router = t.handle.create_router(id).await.unwrap();
    assert!(router.rtp_capabilities.supports(MediaKind::Audio));
    assert!(router.rtp_capabilities.supports(MediaKind::Video));

    let found = t.handle.get_router(id).await.unwrap().unwrap();
    assert_eq!(found.id, router.id);
    assert_eq!(t.store.router_mapping(id).unwrap().router_id, router.id);

    assert!(t.handle.cleanup_router(id).await.unwrap());
    assert!(t.handle.get_router(id).await.unwrap().is_none());
    assert!(t.store.router_mapping(id).is_none());
    assert_eq!(t.engine.live_routers(), 0);
}

#[tokio::test]
async fn test_at_most_one_router_per_consultation() {
    let t = TestOrchestrator::start().await;
    let id = consultation(7);

    t.handle.create_router(id).await.unwrap();
    let err = t.handle.create_router(id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let report = t.handle.health_report().await.unwrap();
    assert_eq!(report.sessions.active_routers, 1);
    assert_eq!(t.engine.live_routers(), 1);
}

#[tokio::test]
async fn test_routers_spread_to_least_loaded_worker() {
    let t = TestOrchestrator::start().await;
    for id in 1..=5 {
        t.handle.create_router(consultation(id)).await.unwrap();
    }

    let snapshots = t.handle.worker_snapshots().await.unwrap();
    let loads: Vec<u64> = snapshots.iter().map(|w| w.load).collect();
    assert_eq!(loads, vec![2, 2, 1]);
    assert_eq!(
        snapshots[0].hosted_consultations,
        vec![consultation(1), consultation(4)]
    );
    assert_load_conserved(&snapshots);
}

#[tokio::test]
async fn test_load_conserved_across_create_and_cleanup() {
    let t = TestOrchestrator::start().await;
    for id in 1..=6 {
        t.handle.create_router(consultation(id)).await.unwrap();
        assert_load_conserved(&t.handle.worker_snapshots().await.unwrap());
    }
    for id in [2, 5, 3] {
        assert!(t.handle.cleanup_router(consultation(id)).await.unwrap());
        assert_load_conserved(&t.handle.worker_snapshots().await.unwrap());
    }

    let report = t.handle.health_report().await.unwrap();
    assert_eq!(report.load.total_active_routers, 3);
}

#[tokio::test]
async fn test_second_cleanup_is_noop() {
    let t = TestOrchestrator::start().await;
    let id = consultation(42);
    t.handle.create_router(id).await.unwrap();

    assert!(t.handle.cleanup_router(id).await.unwrap());
    let after_first = t.handle.worker_snapshots().await.unwrap();

    assert!(!t.handle.cleanup_router(id).await.unwrap());
    assert_eq!(t.handle.worker_snapshots().await.unwrap(), after_first);
}

#[tokio::test]
async fn test_no_worker_available() {
    let t = TestOrchestrator::builder().workers(0).start().await;

    let err = t.handle.create_router(consultation(1)).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NoWorkerAvailable));
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
}

#[tokio::test]
async fn test_no_active_media_server() {
    let t = TestOrchestrator::builder()
        .servers(vec![inactive_server("mo-test-a")])
        .start()
        .await;

    let err = t.handle.create_router(consultation(1)).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NoMediaServerAvailable));

    // Nothing half-created.
    assert!(t.handle.get_router(consultation(1)).await.unwrap().is_none());
    assert_eq!(t.engine.live_routers(), 0);
    let snapshots = t.handle.worker_snapshots().await.unwrap();
    assert!(snapshots.iter().all(|w| w.load == 0));
}

#[tokio::test]
async fn test_falls_back_to_first_active_server() {
    let t = TestOrchestrator::builder()
        .servers(vec![server("mo-other-1"), server("mo-other-2")])
        .start()
        .await;

    t.handle.create_router(consultation(3)).await.unwrap();

    let mapping = t.store.router_mapping(consultation(3)).unwrap();
    assert_eq!(mapping.server_id.as_str(), "mo-other-1");
}

#[tokio::test]
async fn test_persistence_failure_keeps_router() {
    let t = TestOrchestrator::start().await;
    t.store.fail_writes(true);

    let router = t.handle.create_router(consultation(8)).await.unwrap();

    assert_eq!(
        t.handle.get_router(consultation(8)).await.unwrap().unwrap().id,
        router.id
    );
    assert!(t.store.router_mapping(consultation(8)).is_none());
}

#[tokio::test]
async fn test_cleanup_completes_when_durable_delete_fails() {
    let t = TestOrchestrator::start().await;
    t.handle.create_router(consultation(9)).await.unwrap();
    t.store.fail_deletes(true);

    assert!(t.handle.cleanup_router(consultation(9)).await.unwrap());

    assert!(t.handle.get_router(consultation(9)).await.unwrap().is_none());
    let snapshots = t.handle.worker_snapshots().await.unwrap();
    assert!(snapshots.iter().all(|w| w.load == 0));
}
