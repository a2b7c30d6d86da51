//! HTTP API tests: routes exercised in-process and over a real socket.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

use llm_gate::config::{Config, EngineConfig, GateConfig};
use llm_gate::inference::simulated::SimulatedBackend;
use llm_gate::models::store::StaticModelStore;
use llm_gate::server::api::{build_router, AppState};

fn app_state(backend: SimulatedBackend) -> Arc<AppState> {
    let config = Arc::new(Config {
        gate: GateConfig {
            poll_timeout_ms: 5,
            backoff_ms: 5,
        },
        ..Config::default()
    });
    let store = Arc::new(StaticModelStore::new(
        ["llama-7b", "llama-13b", "broken-30b"],
        ["alpaca-lora-7b", "baize-lora-13B"],
    ));
    Arc::new(AppState::new(config, store, Arc::new(backend)).unwrap())
}

fn backend() -> SimulatedBackend {
    SimulatedBackend::new(&EngineConfig {
        step_delay_ms: 1,
        load_delay_ms: 0,
    })
}

async fn loaded_router(backend: SimulatedBackend) -> Router {
    let state = app_state(backend);
    state.service.set_model("llama-7b").await.unwrap();
    build_router(state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, body).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_banner_echoes_query() {
    let app = loaded_router(backend()).await;
    let (status, body) = send_json(&app, "GET", "/?q=ping", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "wintermute": "ai", "q": "ping" }));
}

#[tokio::test]
async fn test_check_reports_model_or_none() {
    let app = build_router(app_state(backend()));
    let (_, body) = send_json(&app, "GET", "/check", None).await;
    assert_eq!(body, json!("None"));

    let app = loaded_router(backend()).await;
    let (_, body) = send_json(&app, "GET", "/check", None).await;
    assert_eq!(body, json!("llama-7b"));
}

#[tokio::test]
async fn test_generate_streams_plain_text() {
    let app = loaded_router(backend()).await;
    let (status, body) = send(
        &app,
        "POST",
        "/generate",
        Some(json!({ "prompt": "Q: ", "max_new_tokens": 3, "streaming": true })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap(), "the gate admits");
}

#[tokio::test]
async fn test_generate_failure_appends_error_payload() {
    let app = loaded_router(backend().with_failure_after(1)).await;
    let (status, body) = send(
        &app,
        "POST",
        "/generate",
        Some(json!({ "prompt": "", "max_new_tokens": 5, "streaming": true })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    let payload = text.strip_prefix("the").unwrap();
    let json: Value = serde_json::from_str(payload).unwrap();
    assert!(json["response"]
        .as_str()
        .unwrap()
        .contains("simulated failure after 1 snapshots"));
}

#[tokio::test]
async fn test_generate_requires_prompt() {
    let app = loaded_router(backend()).await;
    let (status, _) = send(&app, "POST", "/generate", Some(json!({ "temperature": 0.5 }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_models_listing_and_swap() {
    let app = loaded_router(backend()).await;

    let (_, body) = send_json(&app, "GET", "/models", None).await;
    assert_eq!(body["current"], "llama-7b");
    assert_eq!(body["models"], json!(["broken-30b", "llama-13b", "llama-7b"]));

    let (status, body) =
        send_json(&app, "POST", "/models", Some(json!({ "model": "llama-13b" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "model": "llama-13b" }));

    let (status, body) =
        send_json(&app, "POST", "/models", Some(json!({ "model": "gpt-j" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body["err"],
        "model not in list: [broken-30b, llama-13b, llama-7b] gpt-j"
    );
}

#[tokio::test]
async fn test_failed_load_reports_degraded_health() {
    let app = loaded_router(backend().with_broken_model("broken-30b")).await;

    let (status, body) =
        send_json(&app, "POST", "/models", Some(json!({ "model": "broken-30b" }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["err"].as_str().unwrap().contains("broken-30b"));

    let (_, health) = send_json(&app, "GET", "/health", None).await;
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["model"], "None");
    assert_eq!(health["gate_held"], false);
}

#[tokio::test]
async fn test_loras_listing_swap_and_mismatch() {
    let app = loaded_router(backend()).await;

    let (_, body) = send_json(&app, "GET", "/loras", None).await;
    assert_eq!(body, json!({ "current": [], "loras": ["alpaca-lora-7b", "baize-lora-13B"] }));

    let (status, body) = send_json(
        &app,
        "POST",
        "/loras",
        Some(json!({ "lora_names": ["alpaca-lora-7b"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "lora": ["alpaca-lora-7b"] }));

    let (status, body) = send_json(
        &app,
        "POST",
        "/loras",
        Some(json!({ "lora_names": ["baize-lora-13B"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["err"], "Parameter mis-match between lora and model.");

    let (_, body) = send_json(&app, "GET", "/loras", None).await;
    assert_eq!(body["current"], json!([]));
}

#[tokio::test]
async fn test_metrics_exposed() {
    let app = loaded_router(backend()).await;
    send(&app, "POST", "/generate", Some(json!({ "prompt": "x", "max_new_tokens": 2 }))).await;

    let (status, body) = send(&app, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("llm_gate_generations_started_total 1"));
    assert!(text.contains(r#"llm_gate_swaps_total{kind="model",outcome="ok"} 1"#));
}

#[tokio::test]
async fn test_generate_over_tcp() {
    let app = loaded_router(backend()).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();
    let url = format!("http://{addr}/generate");

    let (a, b) = tokio::join!(
        client
            .post(&url)
            .json(&json!({ "prompt": "A: ", "max_new_tokens": 5, "streaming": true }))
            .send(),
        client
            .post(&url)
            .json(&json!({ "prompt": "B: ", "max_new_tokens": 5 }))
            .send(),
    );

    let a = a.unwrap().text().await.unwrap();
    let b = b.unwrap().text().await.unwrap();
    assert_eq!(a, "the gate admits one request");
    assert_eq!(b, "the gate admits one request");

    let check: String = client
        .get(format!("http://{addr}/check"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(check, "llama-7b");
}
