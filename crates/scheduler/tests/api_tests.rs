//! Integration tests for the scheduler API endpoints

#[allow(dead_code)]
#[path = "../src/api.rs"]
mod api;

use api::{AppState, ScheduleRequest};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use scheduler_lib::{
    config::{EstimatorKind, TaremaConfig},
    health::{components, HealthRegistry},
    NodeState, PendingTask, Resources, Tarema,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower::ServiceExt;

fn constant_config() -> TaremaConfig {
    TaremaConfig {
        expected_nodes: 2,
        estimator: EstimatorKind::Constant,
        constant_estimations: BTreeMap::from([
            ("node-a".to_string(), 1.0),
            ("node-b".to_string(), 3.0),
        ]),
        ..Default::default()
    }
}

async fn setup_test_app(config: TaremaConfig) -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    for name in components::ALL {
        health_registry.register(name).await;
    }

    let engine = Arc::new(Tarema::new("test", config).unwrap());
    let state = Arc::new(AppState::new(engine, health_registry));
    state.refresh_health().await;
    let router = api::create_router(state.clone());

    (router, state)
}

fn termination(id: &str, node: &str) -> Value {
    json!({
        "task_instance_id": id,
        "node": node,
        "task": "align",
        "trace": {
            "%cpu": 95.0,
            "rss": 1048576,
            "read_bytes": 4096,
            "write_bytes": 2048,
            "rchar": 8192,
            "realtime": 1500
        }
    })
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_healthz_degraded_before_first_labelling() {
    let (app, _state) = setup_test_app(constant_config()).await;

    let (status, health) = send(app, get("/healthz")).await;

    // Degraded still answers 200: placement falls back to cold mode
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"]["placement"]["status"], "healthy");
}

#[tokio::test]
async fn test_readyz_returns_unavailable_when_not_ready() {
    let (app, _state) = setup_test_app(constant_config()).await;

    let (status, readiness) = send(app, get("/readyz")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app(constant_config()).await;
    state.health_registry.set_ready(true).await;

    let (status, readiness) = send(app, get("/readyz")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_termination_publishes_labels() {
    let (app, state) = setup_test_app(constant_config()).await;

    let (status, outcome) = send(
        app.clone(),
        post_json("/v1/terminations", &termination("t-1", "node-a")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["accepted"], true);
    assert_eq!(outcome["node_labels_revision"], 1);
    assert_eq!(outcome["task_labels_revision"], 1);

    let (status, labels) = send(app.clone(), get("/v1/labels")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(labels["node_labels"]["labels"]["node-b"].is_object());
    assert!(labels["task_labels"]["labels"]["align"].is_object());

    let (_, health) = send(app, get("/healthz")).await;
    assert_eq!(health["status"], "healthy");
    assert!(state.engine.node_labels().is_some());
}

#[tokio::test]
async fn test_duplicate_termination_is_accepted_once() {
    let (app, _state) = setup_test_app(constant_config()).await;
    let body = termination("t-1", "node-a");

    let (_, first) = send(app.clone(), post_json("/v1/terminations", &body)).await;
    let (status, second) = send(app, post_json("/v1/terminations", &body)).await;

    assert_eq!(first["accepted"], true);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["accepted"], false);
}

#[tokio::test]
async fn test_incomplete_trace_is_bad_request() {
    let (app, state) = setup_test_app(constant_config()).await;
    let body = json!({
        "task_instance_id": "t-1",
        "node": "node-a",
        "task": "align",
        "trace": { "%cpu": 95.0 }
    });

    let (status, error) = send(app, post_json("/v1/terminations", &body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error["error"].as_str().unwrap().contains("rss"));
    assert!(state.engine.store().is_empty());
}

#[tokio::test]
async fn test_malformed_trace_value_is_rejected() {
    let (app, _state) = setup_test_app(constant_config()).await;
    let mut body = termination("t-1", "node-a");
    body["trace"]["rss"] = json!(-5);

    let (status, _) = send(app, post_json("/v1/terminations", &body)).await;

    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_schedule_returns_plan() {
    let (app, _state) = setup_test_app(constant_config()).await;
    let request = ScheduleRequest {
        nodes: vec![
            NodeState::new("node-a", Resources::new(4000, 8192), Resources::new(4000, 8192)),
            NodeState::new("node-b", Resources::new(4000, 8192), Resources::new(4000, 8192)),
        ],
        pending: vec![
            PendingTask::new("p-1", "align", Resources::new(1000, 1024)),
            PendingTask::new("p-2", "align", Resources::new(9000, 1024)),
        ],
    };

    let (status, plan) = send(
        app,
        post_json("/v1/schedule", &serde_json::to_value(&request).unwrap()),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(plan["mode"], "cold");
    assert_eq!(plan["assignments"].as_array().unwrap().len(), 1);
    assert_eq!(plan["assignments"][0]["task_id"], "p-1");
    assert_eq!(plan["unscheduled"], json!(["p-2"]));
}

#[tokio::test]
async fn test_estimations_unavailable_until_ready() {
    let config = TaremaConfig {
        expected_nodes: 2,
        ..Default::default()
    };
    let (app, _state) = setup_test_app(config).await;

    let (status, error) = send(app, get("/v1/estimations")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(error["error"].is_string());
}

#[tokio::test]
async fn test_estimations_from_constant_estimator() {
    let (app, _state) = setup_test_app(constant_config()).await;

    let (status, estimations) = send(app, get("/v1/estimations")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(estimations["general"]["node-b"], 3.0);
}

#[tokio::test]
async fn test_status_reports_engine_mode() {
    let (app, _state) = setup_test_app(constant_config()).await;

    let (status, body) = send(app, get("/v1/status")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["execution"], "test");
    assert_eq!(body["labelling_mode"], "online");
    assert_eq!(body["estimator"], "constant");
    assert_eq!(body["placement_mode"], "cold");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _state) = setup_test_app(constant_config()).await;
    send(
        app.clone(),
        post_json("/v1/terminations", &termination("t-1", "node-a")),
    )
    .await;

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("tarema_observations_total"));
}
