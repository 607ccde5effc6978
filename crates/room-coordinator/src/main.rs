//! Room Coordinator
//!
//! Stateful WebSocket signaling server for peer-to-peer A/V sessions.
//!
//! # Servers
//!
//! A single HTTP server carries all endpoints (default: 0.0.0.0:3000):
//! - `GET /ws` - WebSocket signaling upgrade
//! - `GET /health`, `GET /ready` - liveness/readiness probes
//! - `GET /metrics` - Prometheus metrics
//!
//! # Architecture
//!
//! Uses an actor model hierarchy:
//! - `RoomRegistryActor` (singleton): supervises rooms
//! - `RoomActor` (per room): owns room state
//! - `ConnectionActor` (per connection): writes to one WebSocket peer
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Initialize actor system (`RoomRegistryHandle`)
//! 4. Start the HTTP server (signaling + health + metrics)
//! 5. Wait for shutdown signal, then drain the actor system

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use room_coordinator::actors::{ActorMetrics, RoomRegistryHandle};
use room_coordinator::config::Config;
use room_coordinator::observability::{health_router, HealthState};
use room_coordinator::transport::{signaling_router, TransportState};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Room Coordinator");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        coordinator_id = %config.coordinator_id,
        bind_address = %config.bind_address,
        ready_announce_interval = ?config.ready_announce_interval,
        shutdown_grace_seconds = config.shutdown_grace.as_secs(),
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        format!("Failed to install Prometheus metrics recorder: {e}")
    })?;
    info!("Prometheus metrics recorder initialized");

    // Initialize health state
    let health_state = Arc::new(HealthState::new());

    // Initialize actor system
    info!("Initializing actor system...");
    let actor_metrics = ActorMetrics::new();
    let registry = RoomRegistryHandle::new(
        config.coordinator_id.clone(),
        config.ready_announce_interval,
        config.shutdown_grace,
        Arc::clone(&actor_metrics),
    );
    info!("Actor system initialized");

    // Create shutdown token as child of the registry's token so all
    // tasks are cancelled when the registry shuts down
    let shutdown_token = registry.child_token();

    // Assemble the application router: signaling + health + metrics
    let transport_state = TransportState {
        registry: registry.clone(),
        metrics: Arc::clone(&actor_metrics),
        cancel_token: shutdown_token.child_token(),
    };

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let app = signaling_router(transport_state)
        .merge(health_router(Arc::clone(&health_state)))
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http());

    let bind_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(bind_addr).await.map_err(|e| {
        error!(error = %e, addr = %bind_addr, "Failed to bind server");
        format!("Failed to bind server to {bind_addr}: {e}")
    })?;
    info!(addr = %bind_addr, "Server bound successfully");

    // Spawn the server task
    let server_shutdown_token = shutdown_token.child_token();
    let server_task = tokio::spawn(async move {
        info!(addr = %bind_addr, "Server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_shutdown_token.cancelled().await;
            info!("Server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Server failed");
        }
    });

    // Ready to accept connections
    health_state.set_ready();
    info!(addr = %bind_addr, "Room Coordinator running - press Ctrl+C to shutdown");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so load balancers stop sending traffic
    health_state.set_not_ready();

    // Initiate registry shutdown: stops accepting connections and
    // cancels the token hierarchy (rooms, announcement tasks, writers,
    // and the HTTP server)
    if let Err(e) = registry.shutdown().await {
        warn!(error = %e, "Actor system shutdown error");
    }

    // Give the server and room actors time to drain
    let _ = tokio::time::timeout(
        config.shutdown_grace + Duration::from_secs(1),
        server_task,
    )
    .await;

    info!("Room Coordinator shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable
/// because without signal handlers, we cannot gracefully shut down the
/// service.
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
