//! Media Orchestrator
//!
//! Allocates and tears down media routing resources for telehealth
//! consultations.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect the durable store and load channel (Redis, or in-memory when
//!    `REDIS_URL` is unset)
//! 4. Start the orchestrator (worker pool, load sharing, actor)
//! 5. Start the health HTTP server (liveness, readiness, diagnostics, metrics)
//! 6. Start the hanging-transport reaper
//! 7. Wait for shutdown signal, then drain

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use common::secret::ExposeSecret;
use media_orchestrator::actors::{OrchestratorHandle, OrchestratorSettings};
use media_orchestrator::balancer::{LoadChannel, LocalLoadChannel, RedisLoadChannel};
use media_orchestrator::config::Config;
use media_orchestrator::engine::{InProcessEngine, MediaEngine};
use media_orchestrator::observability::{health_router, init_metrics_recorder, HealthState};
use media_orchestrator::store::{AvailableServer, InMemoryStore, RedisSessionStore, SessionStore};
use media_orchestrator::tasks::start_hanging_transport_reaper;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Router capacity advertised by the self-registered in-memory server record.
const LOCAL_SERVER_MAX_ROUTERS: u32 = 1000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting Media Orchestrator");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        server_id = %config.server_id,
        environment = config.environment.as_str(),
        num_workers = config.num_workers,
        redis_configured = config.redis_url.is_some(),
        health_bind_address = %config.health_bind_address,
        rtc_min_port = config.rtc_min_port,
        rtc_max_port = config.rtc_max_port,
        "Configuration loaded successfully"
    );

    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        anyhow::anyhow!(e)
    })?;

    let health_state = Arc::new(HealthState::new());

    let (store, channel) = connect_backends(&config).await?;
    match store.find_active_servers().await {
        Ok(servers) if servers.is_empty() => {
            warn!("No active media server records, session initialization will fail");
        }
        Ok(servers) => info!(active_servers = servers.len(), "Media server registry loaded"),
        Err(e) => warn!(error = %e, "Failed to read media server registry"),
    }

    // The in-process engine is the configured media backend.
    let engine: Arc<dyn MediaEngine> = Arc::new(InProcessEngine::new());

    info!("Starting orchestrator...");
    let orchestrator = OrchestratorHandle::start(
        OrchestratorSettings::from_config(&config),
        engine,
        store,
        channel,
    )
    .await;
    health_state.set_ready();
    info!("Orchestrator started");

    let shutdown_token = orchestrator.child_token();

    let health_addr: SocketAddr = config
        .health_bind_address
        .parse()
        .with_context(|| format!("Invalid health bind address: {}", config.health_bind_address))?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let app = health_router(Arc::clone(&health_state), orchestrator.clone())
        .merge(metrics_router)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .with_context(|| format!("Failed to bind health server to {health_addr}"))?;
    info!(addr = %health_addr, "Health server bound successfully");

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    tokio::spawn(start_hanging_transport_reaper(
        orchestrator.clone(),
        config.hanging_check_interval,
        config.hanging_transport_threshold,
        shutdown_token.child_token(),
    ));

    info!("Media Orchestrator running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    health_state.set_not_ready();

    match orchestrator.shutdown().await {
        Ok(summary) => info!(
            routers = summary.routers.closed,
            workers = summary.workers.closed,
            failures = summary.failures(),
            "Media resources drained"
        ),
        Err(e) => warn!(error = %e, "Orchestrator shutdown error"),
    }

    shutdown_token.cancel();
    orchestrator.cancel();

    info!("Media Orchestrator shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "media_orchestrator=debug,tower_http=debug".into());

    let json = std::env::var("MO_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Redis store and channel when `REDIS_URL` is set; otherwise an in-memory
/// store holding this instance's own server record and a local channel.
async fn connect_backends(
    config: &Config,
) -> anyhow::Result<(Arc<dyn SessionStore>, Arc<dyn LoadChannel>)> {
    if let Some(url) = &config.redis_url {
        info!("Connecting to Redis...");
        let store = RedisSessionStore::connect(url.expose_secret())
            .await
            .context("Failed to connect session store to Redis")?;
        let channel = RedisLoadChannel::connect(url.expose_secret())
            .await
            .context("Failed to connect load channel to Redis")?;
        info!("Redis connection established");
        return Ok((Arc::new(store), Arc::new(channel)));
    }

    warn!("REDIS_URL not set, running single-instance with in-memory storage");
    let address = config
        .announced_address
        .clone()
        .unwrap_or_else(|| config.listen_ip.to_string());
    let store = InMemoryStore::new().with_server(AvailableServer {
        server_id: config.server_id.clone(),
        address,
        max_routers: LOCAL_SERVER_MAX_ROUTERS,
        is_active: true,
    });
    Ok((Arc::new(store), Arc::new(LocalLoadChannel::new())))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
