//! Health endpoints for the Room Coordinator.
//!
//! Provides Kubernetes-compatible health endpoints:
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (can we accept connections?)
//!
//! Note: The `/metrics` endpoint is served separately via
//! `metrics-exporter-prometheus`.
//!
//! # Health State
//!
//! The `HealthState` tracks:
//! - `live`: Always true after startup (process is running)
//! - `ready`: True once the actor system is up and the coordinator is
//!   accepting connections; cleared during shutdown

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health state for the Room Coordinator.
///
/// Tracks liveness and readiness for Kubernetes probes.
#[derive(Debug)]
pub struct HealthState {
    /// Whether the service is live (process running).
    /// Always true after startup initialization.
    live: AtomicBool,
    /// Whether the service is ready to accept connections.
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    /// Mark the service as ready to accept connections.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Check if the service is live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Create the health router with liveness and readiness endpoints.
///
/// # Endpoints
///
/// - `GET /health` - Returns 200 with `{"status":"ok"}` when live
/// - `GET /ready` - Returns 200 if accepting connections, 503 otherwise
///
/// # Arguments
///
/// * `health_state` - Shared health state for checking readiness
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

/// Liveness probe handler.
///
/// Reports process status as a small JSON body so that plain HTTP
/// monitors can read it too.
async fn liveness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.is_live() {
        (StatusCode::OK, Json(json!({ "status": "ok" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable" })),
        )
    }
}

/// Readiness probe handler.
///
/// Returns 200 OK if the coordinator is accepting connections.
/// Returns 503 Service Unavailable otherwise (e.g., during shutdown).
async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_health_state_default() {
        let state = HealthState::new();
        assert!(state.is_live(), "Should be live by default");
        assert!(!state.is_ready(), "Should not be ready by default");
    }

    #[test]
    fn test_health_state_set_ready() {
        let state = HealthState::new();

        state.set_ready();
        assert!(state.is_ready(), "Should be ready after set_ready()");

        state.set_not_ready();
        assert!(
            !state.is_ready(),
            "Should not be ready after set_not_ready()"
        );
    }

    // ========================================================================
    // Integration tests for health_router
    // ========================================================================

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn test_health_router_liveness_reports_status_ok() {
        let state = Arc::new(HealthState::new());
        let app = health_router(state);

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("Failed to build request");

        let response = app
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        assert_eq!(response.status(), StatusCode::OK);

        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        let value: serde_json::Value =
            serde_json::from_slice(&body).expect("Body should be JSON");
        assert_eq!(value["status"], "ok");
    }

    #[tokio::test]
    async fn test_health_router_readiness_endpoint_not_ready() {
        let state = Arc::new(HealthState::new());
        let app = health_router(state);

        let request = Request::builder()
            .uri("/ready")
            .body(Body::empty())
            .expect("Failed to build request");

        let response = app
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        assert_eq!(
            response.status(),
            StatusCode::SERVICE_UNAVAILABLE,
            "/ready should return 503 when not ready"
        );
    }

    #[tokio::test]
    async fn test_health_router_readiness_endpoint_ready() {
        let state = Arc::new(HealthState::new());
        state.set_ready();
        let app = health_router(state);

        let request = Request::builder()
            .uri("/ready")
            .body(Body::empty())
            .expect("Failed to build request");

        let response = app
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        assert_eq!(
            response.status(),
            StatusCode::OK,
            "/ready should return 200 when ready"
        );
    }

    #[tokio::test]
    async fn test_health_router_unknown_path_returns_404() {
        let state = Arc::new(HealthState::new());
        let app = health_router(state);

        let request = Request::builder()
            .uri("/unknown")
            .body(Body::empty())
            .expect("Failed to build request");

        let response = app
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        assert_eq!(
            response.status(),
            StatusCode::NOT_FOUND,
            "Unknown paths should return 404"
        );
    }
}
