// Integration tests for the local HTTP control API
//
// A real session runner sits behind the router; it has no server connection,
// so commands that need one report 503.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use common::MemoryDevice;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;
use voxlink::audio::OpusCodec;
use voxlink::config::NetworkConfig;
use voxlink::mqtt::PortProtocolCache;
use voxlink::protocol::AudioParams;
use voxlink::{
    create_router, AppState, ConversationMachine, DeviceIdentity, SessionController,
    SessionOrchestrator, SessionRunner,
};

fn app() -> (Router, SessionController) {
    let orchestrator = SessionOrchestrator::new(
        DeviceIdentity::generate(),
        NetworkConfig::default(),
        Arc::new(PortProtocolCache::in_memory()),
    );
    let (device, _probe) = MemoryDevice::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let codec = OpusCodec::new(&AudioParams::server_default()).unwrap();
    let machine = ConversationMachine::new(codec, Box::new(device), tx);

    let (runner, controller) = SessionRunner::new(orchestrator, machine, rx);
    let snapshots = runner.snapshots();
    tokio::spawn(runner.run());

    (create_router(AppState::new(controller.clone(), snapshots)), controller)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = app();

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_status_reports_idle_without_session() {
    let (app, _) = app();

    let response = app
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let status = body_json(response).await;
    assert_eq!(status["state"], "idle");
    assert_eq!(status["mode"], "manual");
    assert_eq!(status["session_id"], Value::Null);
    assert_eq!(status["device"], "memory");
}

#[tokio::test]
async fn test_start_without_session_is_unavailable() {
    let (app, _) = app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/conversation/start")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Session not established yet");
}

#[tokio::test]
async fn test_abort_while_idle_conflicts() {
    let (app, _) = app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/conversation/abort")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_stop_while_idle_is_ok() {
    let (app, _) = app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/conversation/stop")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_set_mode_updates_snapshot() {
    let (app, _) = app();

    let response = app
        .clone()
        .oneshot(json_request("PUT", "/conversation/mode", json!({"mode": "auto"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The runner publishes after replying; give it a moment
    let mut mode = Value::Null;
    for _ in 0..50 {
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        mode = body_json(response).await["mode"].clone();
        if mode == "auto" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(mode, "auto");
}

#[tokio::test]
async fn test_unknown_mode_is_rejected() {
    let (app, _) = app();

    let response = app
        .oneshot(json_request("PUT", "/conversation/mode", json!({"mode": "shouting"})))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_text_without_session_is_unavailable() {
    let (app, _) = app();

    let response = app
        .oneshot(json_request("POST", "/conversation/text", json!({"text": "hello"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_commands_after_shutdown_fail() {
    let (app, controller) = app();
    controller.shutdown().await.unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/conversation/start")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}
