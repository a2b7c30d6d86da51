//! HTTP API.
//!
//! - GET  /           banner
//! - GET  /check      name of the loaded model
//! - GET  /health     liveness plus gate and registry status
//! - GET  /metrics    prometheus exposition
//! - POST /generate   streamed generation
//! - GET  /models     current and available models
//! - POST /models     swap model
//! - GET  /loras      current and available loras
//! - POST /loras      swap loras

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::error::GatewayError;
use crate::gate::AdmissionGate;
use crate::inference::engine::GenerationEngine;
use crate::inference::params::GenerationRequest;
use crate::metrics::Metrics;
use crate::models::loader::{AdapterLoader, ModelLoader};
use crate::models::registry::{ModelRegistry, RegistryStatus};
use crate::models::store::ModelStore;
use crate::server::streaming::generation_to_response;
use crate::service::{AdapterListing, GatewayService, ModelListing};

/// Application state shared across handlers.
pub struct AppState {
    pub service: GatewayService,
    pub metrics: Arc<Metrics>,
    pub config: Arc<Config>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire a gate, registry and service around one backend that both
    /// generates and loads.
    pub fn new<B>(
        config: Arc<Config>,
        store: Arc<dyn ModelStore>,
        backend: Arc<B>,
    ) -> prometheus::Result<Self>
    where
        B: GenerationEngine + ModelLoader + AdapterLoader + 'static,
    {
        let metrics = Arc::new(Metrics::new()?);
        let gate = AdmissionGate::new(&config.gate, metrics.clone());
        let registry = Arc::new(ModelRegistry::new(
            gate.id(),
            store,
            backend.clone(),
            backend.clone(),
        ));
        let service = GatewayService::new(gate, registry, backend, metrics.clone());

        Ok(Self {
            service,
            metrics,
            config,
            start_time: Instant::now(),
        })
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = if state.config.server.permissive_cors {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/", get(banner))
        .route("/check", get(check))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/generate", post(generate))
        .route("/models", get(list_models).post(set_model))
        .route("/loras", get(list_loras).post(set_loras))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BannerQuery {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModelRequest {
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct ModelResponse {
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct LoraRequest {
    pub lora_names: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LoraResponse {
    pub lora: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub gate_held: bool,
    pub model: String,
    pub loras: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn banner(Query(query): Query<BannerQuery>) -> Json<Value> {
    Json(json!({ "wintermute": "ai", "q": query.q }))
}

async fn check(State(state): State<Arc<AppState>>) -> Json<String> {
    Json(state.service.current_model().await)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let registry = state.service.registry().state().await;
    let model = registry.model_name().to_string();
    let (status, degraded_reason) = match registry.status {
        RegistryStatus::Ready => ("ok".to_string(), None),
        RegistryStatus::Degraded { reason } => ("degraded".to_string(), Some(reason)),
    };

    Json(HealthResponse {
        status,
        uptime_secs: state.start_time.elapsed().as_secs(),
        gate_held: state.service.gate().is_held(),
        model,
        loras: registry.adapters,
        degraded_reason,
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(text) => text.into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn generate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerationRequest>,
) -> Response {
    let stream = state.service.generate(req).await;
    info!(request_id = stream.request_id(), "Streaming generation");
    generation_to_response(stream)
}

async fn list_models(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ModelListing>, GatewayError> {
    Ok(Json(state.service.list_models().await?))
}

async fn set_model(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ModelRequest>,
) -> Result<Json<ModelResponse>, GatewayError> {
    info!(model = %req.model, "Model swap requested");
    let next = state.service.set_model(&req.model).await?;
    Ok(Json(ModelResponse {
        model: next.model_name().to_string(),
    }))
}

async fn list_loras(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AdapterListing>, GatewayError> {
    Ok(Json(state.service.list_adapters().await?))
}

async fn set_loras(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoraRequest>,
) -> Result<Json<LoraResponse>, GatewayError> {
    info!(loras = ?req.lora_names, "Lora swap requested");
    let next = state.service.set_adapters(&req.lora_names).await?;
    Ok(Json(LoraResponse {
        lora: next.adapters,
    }))
}
