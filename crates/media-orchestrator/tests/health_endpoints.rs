//! Health, readiness and diagnostics endpoints against a live orchestrator.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use media_orchestrator::config::Environment;
use media_orchestrator::observability::{health_router, HealthState, HealthStatus};
use orchestrator_test_utils::*;
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Option<Value>) {
    let request = Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("Failed to build request");
    let response = app
        .oneshot(request)
        .await
        .expect("Failed to execute request");

    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    (status, serde_json::from_slice(&bytes).ok())
}

#[tokio::test]
async fn test_liveness_and_readiness() {
    let t = TestOrchestrator::start().await;
    let state = Arc::new(HealthState::new());
    let app = health_router(Arc::clone(&state), t.handle.clone());

    let (status, _) = get(app.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = get(app.clone(), "/ready").await;
    assert_eq!(
        status,
        StatusCode::SERVICE_UNAVAILABLE,
        "/ready should return 503 before the pool is up"
    );

    state.set_ready();
    let (status, _) = get(app.clone(), "/ready").await;
    assert_eq!(status, StatusCode::OK);

    state.set_not_ready();
    let (status, _) = get(app, "/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_diagnostics_reports_healthy_pool() {
    let t = TestOrchestrator::start().await;
    t.handle.create_router(consultation(1)).await.unwrap();
    t.handle.create_router(consultation(2)).await.unwrap();
    let app = health_router(Arc::new(HealthState::new()), t.handle.clone());

    let (status, body) = get(app, "/diagnostics").await;
    assert_eq!(status, StatusCode::OK);

    let body = body.expect("diagnostics should be JSON");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["environment"], "development");
    assert_eq!(body["workers"]["count"], 3);
    assert_eq!(body["workers"]["recommended"], 3);
    assert_eq!(body["workers"]["pids"].as_array().unwrap().len(), 3);
    assert_eq!(body["sessions"]["activeRouters"], 2);
    assert_eq!(body["load"]["totalActiveRouters"], 2);
    assert_eq!(body["load"]["perWorker"].as_array().unwrap().len(), 3);
    assert_eq!(body["broadcast"]["configured"], false);

    let recommendations = body["recommendations"].as_array().unwrap();
    assert_eq!(recommendations.len(), 1);
    assert!(recommendations[0]
        .as_str()
        .unwrap()
        .starts_with("Configure a broadcast channel"));
}

#[tokio::test]
async fn test_diagnostics_unhealthy_without_workers() {
    let t = TestOrchestrator::builder().workers(0).start().await;
    let app = health_router(Arc::new(HealthState::new()), t.handle.clone());

    let (status, body) = get(app, "/diagnostics").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let body = body.expect("unhealthy diagnostics still carry the report");
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(
        body["recommendations"][0],
        "No media workers are running: restart the media orchestrator"
    );
}

#[tokio::test]
async fn test_production_without_broadcast_is_degraded() {
    let t = TestOrchestrator::builder()
        .environment(Environment::Production)
        .start()
        .await;

    let report = t.handle.health_report().await.unwrap();
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.environment, "production");
}

#[tokio::test]
async fn test_overload_is_degraded() {
    let t = TestOrchestrator::builder()
        .workers(1)
        .recommended_workers(1)
        .max_avg_routers_per_worker(2.0)
        .start()
        .await;
    for id in 1..=3 {
        t.handle.create_router(consultation(id)).await.unwrap();
    }

    let report = t.handle.health_report().await.unwrap();
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(
        report.recommendations[0],
        "Average load of 3.0 routers per worker exceeds 2.0: add workers or media server instances"
    );
}

#[tokio::test]
async fn test_diagnostics_after_shutdown() {
    let t = TestOrchestrator::start().await;
    let app = health_router(Arc::new(HealthState::new()), t.handle.clone());
    t.handle.shutdown().await.unwrap();

    let (status, body) = get(app, "/diagnostics").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body.unwrap()["workers"]["count"], 0);
}
