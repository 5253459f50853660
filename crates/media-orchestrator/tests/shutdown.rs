//! Graceful shutdown: drain order, summary and draining mode.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use media_orchestrator::actors::{ParticipantRole, ShutdownSummary, StageOutcome};
use media_orchestrator::engine::{EngineCall, MediaKind};
use media_orchestrator::errors::{ErrorKind, OrchestratorError};
use media_orchestrator::session::TransportRole;
use orchestrator_test_utils::*;
use serde_json::json;

/// One router, one transport carrying one producer and one consumer.
async fn single_session(t: &TestOrchestrator) {
    let id = consultation(1);
    t.handle.create_router(id).await.unwrap();
    let transport = t
        .handle
        .create_transport(id, TransportRole::Producer, Some(participant(1)))
        .await
        .unwrap();
    let producer = t
        .handle
        .produce(
            transport.id.clone(),
            MediaKind::Audio,
            audio_rtp_parameters(),
            json!({}),
        )
        .await
        .unwrap();
    t.handle
        .consume(transport.id, producer.id, client_rtp_capabilities())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_in_dependency_order() {
    let t = TestOrchestrator::builder().workers(1).start().await;
    single_session(&t).await;
    t.engine.clear_journal();

    let summary = t.handle.shutdown().await.unwrap();

    let closes: Vec<EngineCall> = t
        .engine
        .journal()
        .into_iter()
        .filter(EngineCall::is_close)
        .collect();
    assert_eq!(closes.len(), 5);
    assert!(matches!(closes[0], EngineCall::CloseConsumer(_)));
    assert!(matches!(closes[1], EngineCall::CloseProducer(_)));
    assert!(matches!(closes[2], EngineCall::CloseTransport(_)));
    assert!(matches!(closes[3], EngineCall::CloseRouter(_)));
    assert!(matches!(closes[4], EngineCall::CloseWorker(_)));

    let one = StageOutcome { closed: 1, failed: 0 };
    assert_eq!(
        summary,
        ShutdownSummary {
            consumers: one,
            producers: one,
            transports: one,
            routers: one,
            workers: one,
            balancer_disconnected: true,
        }
    );

    assert_eq!(t.engine.live_workers(), 0);
    assert_eq!(t.engine.live_routers(), 0);
    let report = t.handle.health_report().await.unwrap();
    assert_eq!(report.sessions.active_routers, 0);
    assert_eq!(report.sessions.active_transports, 0);
    assert_eq!(report.sessions.active_producers, 0);
    assert_eq!(report.sessions.active_consumers, 0);
    assert_eq!(report.workers.count, 0);
    assert!(!report.broadcast.connected);
}

#[tokio::test]
async fn test_shutdown_continues_past_close_failures() {
    let t = TestOrchestrator::builder().workers(2).start().await;
    let failing = t.handle.create_router(consultation(1)).await.unwrap();
    t.handle.create_router(consultation(2)).await.unwrap();
    t.engine.fail_close_of(failing.id.as_str());
    let failing_worker = t.worker_ids().await[1].clone();
    t.engine.fail_close_of(failing_worker.as_str());

    let summary = t.handle.shutdown().await.unwrap();

    assert_eq!(summary.routers, StageOutcome { closed: 1, failed: 1 });
    assert_eq!(summary.workers, StageOutcome { closed: 1, failed: 1 });
    assert_eq!(summary.failures(), 2);
    assert!(t.handle.get_router(consultation(1)).await.unwrap().is_none());
    assert_eq!(t.handle.worker_snapshots().await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_draining_refuses_new_work() {
    let t = TestOrchestrator::start().await;
    t.handle.shutdown().await.unwrap();

    let err = t.handle.create_router(consultation(5)).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Draining));
    assert_eq!(err.kind(), ErrorKind::Unavailable);

    let err = t
        .handle
        .initialize_session(consultation(5), participant(1), ParticipantRole::Patient)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Draining));

    let err = t.handle.scale_workers(3, 0).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Draining));
}

#[tokio::test]
async fn test_second_shutdown_returns_first_summary() {
    let t = TestOrchestrator::builder().workers(1).start().await;
    single_session(&t).await;

    let first = t.handle.shutdown().await.unwrap();
    t.engine.clear_journal();
    let second = t.handle.shutdown().await.unwrap();

    assert_eq!(first, second);
    assert!(t.engine.journal().is_empty());
}

#[tokio::test]
async fn test_cancel_drains_and_stops_actor() {
    let t = TestOrchestrator::builder().workers(2).start().await;
    t.handle.create_router(consultation(1)).await.unwrap();

    t.handle.cancel();
    assert!(t.handle.is_cancelled());

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while t.engine.live_workers() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "workers not drained");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(t.engine.live_routers(), 0);

    // Requests fail once the actor has stopped.
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while t.handle.health_report().await.is_ok() {
        assert!(tokio::time::Instant::now() < deadline, "actor still running");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
