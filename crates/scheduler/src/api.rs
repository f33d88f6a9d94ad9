//! HTTP API for engine control, health checks and Prometheus metrics

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use scheduler_lib::{
    health::{ComponentStatus, HealthRegistry},
    NodeLabels, NodeState, PendingTask, TaremaError, Tarema, TaskLabels, TaskTermination,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Tarema>,
    pub health_registry: HealthRegistry,
}

impl AppState {
    pub fn new(engine: Arc<Tarema>, health_registry: HealthRegistry) -> Self {
        Self {
            engine,
            health_registry,
        }
    }

    /// Push the engine's component health into the registry
    pub async fn refresh_health(&self) {
        self.health_registry
            .update_all(self.engine.component_health())
            .await;
    }
}

/// Body of `POST /v1/schedule`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub nodes: Vec<NodeState>,
    pub pending: Vec<PendingTask>,
}

/// Body of `GET /v1/labels`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelsResponse {
    pub node_labels: Option<NodeLabels>,
    pub task_labels: Option<TaskLabels>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Cold placement still works
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
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Record a task termination
///
/// The estimator may talk to a subprocess, so the engine runs on the
/// blocking pool.
async fn terminations(
    State(state): State<Arc<AppState>>,
    Json(termination): Json<TaskTermination>,
) -> Response {
    let engine = Arc::clone(&state.engine);
    let result = tokio::task::spawn_blocking(move || engine.on_task_terminated(&termination)).await;
    state.refresh_health().await;

    match result {
        Ok(Ok(outcome)) => (StatusCode::OK, Json(outcome)).into_response(),
        Ok(Err(e @ TaremaError::Trace(_))) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Ok(Err(e)) => {
            error!(error = %e, "Failed to handle termination");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            error!(error = %e, "Termination handler panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "termination handler failed")
        }
    }
}

/// Plan placements for the given cluster state without binding
async fn schedule(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScheduleRequest>,
) -> impl IntoResponse {
    let plan = state.engine.plan(&request.nodes, &request.pending);
    (StatusCode::OK, Json(plan))
}

async fn labels(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(LabelsResponse {
        node_labels: state.engine.node_labels().map(|l| (*l).clone()),
        task_labels: state.engine.task_labels().map(|l| (*l).clone()),
    })
}

/// Node rankings, 503 until the estimator is ready
async fn estimations(State(state): State<Arc<AppState>>) -> Response {
    let engine = Arc::clone(&state.engine);
    match tokio::task::spawn_blocking(move || engine.estimations()).await {
        Ok(Some(estimations)) => (StatusCode::OK, Json(estimations)).into_response(),
        Ok(None) => error_response(StatusCode::SERVICE_UNAVAILABLE, "estimations not available"),
        Err(e) => {
            error!(error = %e, "Estimation handler panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "estimation handler failed")
        }
    }
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.status())
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/terminations", post(terminations))
        .route("/v1/schedule", post(schedule))
        .route("/v1/labels", get(labels))
        .route("/v1/estimations", get(estimations))
        .route("/v1/status", get(status))
        .with_state(state)
}

/// Start the API server, returning once `shutdown` resolves
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
