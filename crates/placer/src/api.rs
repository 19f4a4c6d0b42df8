//! HTTP API for health checks, Prometheus metrics and controller state

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use placer_lib::{
    health::{ComponentStatus, HealthRegistry},
    migration::LastStableStore,
    orchestrator::Orchestrator,
    telemetry::SnapshotStore,
    ControllerMetrics, NodeTelemetry, UtilizationSnapshot,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: ControllerMetrics,
    pub snapshots: SnapshotStore,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub last_stable: LastStableStore,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: ControllerMetrics,
        snapshots: SnapshotStore,
        orchestrator: Arc<dyn Orchestrator>,
        last_stable: LastStableStore,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            snapshots,
            orchestrator,
            last_stable,
        }
    }
}

/// Body of `GET /api/v1/snapshot`
#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    pub pass: u64,
    pub snapshot: UtilizationSnapshot,
    pub readings: Vec<NodeTelemetry>,
    pub last_stable: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Latest published utilization snapshot
async fn snapshot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let view = state.snapshots.current().await;
    Json(SnapshotResponse {
        pass: view.pass,
        snapshot: view.snapshot.clone(),
        readings: view.readings.clone(),
        last_stable: state.last_stable.get(),
    })
}

/// Live placement as reported by the orchestrator
async fn placement(State(state): State<Arc<AppState>>) -> Response {
    match state.orchestrator.list_instances().await {
        Ok(placement) => Json(placement).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to read placement");
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorBody {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/snapshot", get(snapshot))
        .route("/api/v1/placement", get(placement))
        .with_state(state)
}

/// Start the API server; returns once `shutdown` fires
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
