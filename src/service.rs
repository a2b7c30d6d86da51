//! Gateway orchestration.
//!
//! [`GatewayService::generate`] waits for the admission gate, starts the
//! engine and hands back a [`GenerationStream`] that owns the gate token.
//! The token is released when the stream ends, fails, or is dropped by a
//! disconnecting client, but never before the engine reports that it has
//! stopped: a new generation or swap cannot reach the backend while the
//! previous producer is still mid-step.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::Stream;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::gate::{AdmissionGate, AdmissionToken};
use crate::inference::engine::{EngineError, EngineRun, GenerationEngine};
use crate::inference::params::GenerationRequest;
use crate::inference::streamer::diff_stream;
use crate::metrics::Metrics;
use crate::models::registry::{ModelRegistry, RegistryState};

type ChunkStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, EngineError>> + Send>>;

/// One item of a generation response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// Newly generated text.
    Chunk(Bytes),
    /// Generation failed; always the last frame.
    Failed(String),
}

impl StreamFrame {
    /// Wire encoding: raw text for chunks, a JSON error payload for failures.
    pub fn into_bytes(self) -> Bytes {
        match self {
            StreamFrame::Chunk(bytes) => bytes,
            StreamFrame::Failed(msg) => Bytes::from(
                json!({ "response": format!("Exception while processing request: {msg}") })
                    .to_string(),
            ),
        }
    }
}

/// Response stream of a single generation.
pub struct GenerationStream {
    request_id: String,
    chunks: Option<ChunkStream>,
    engine_stopped: Option<BoxFuture<'static, ()>>,
    pending_failure: Option<String>,
    token: Option<AdmissionToken>,
    metrics: Arc<Metrics>,
    frames: usize,
}

impl GenerationStream {
    fn running(
        request_id: String,
        token: AdmissionToken,
        run: EngineRun,
        prompt: String,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            request_id,
            chunks: Some(Box::pin(diff_stream(run.snapshots, prompt))),
            engine_stopped: Some(run.stopped),
            pending_failure: None,
            token: Some(token),
            metrics,
            frames: 0,
        }
    }

    fn failed(request_id: String, err: EngineError, metrics: Arc<Metrics>) -> Self {
        metrics.generations_failed.inc();
        Self {
            request_id,
            chunks: None,
            engine_stopped: None,
            pending_failure: Some(err.to_string()),
            token: None,
            metrics,
            frames: 0,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Whether this stream still holds the gate.
    pub fn holds_gate(&self) -> bool {
        self.token.is_some()
    }
}

impl Stream for GenerationStream {
    type Item = StreamFrame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(chunks) = this.chunks.as_mut() {
            match chunks.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.frames += 1;
                    return Poll::Ready(Some(StreamFrame::Chunk(chunk)));
                }
                Poll::Ready(Some(Err(e))) => {
                    this.metrics.generations_failed.inc();
                    warn!(request_id = %this.request_id, frames = this.frames, error = %e, "Generation failed");
                    this.pending_failure = Some(e.to_string());
                }
                Poll::Ready(None) => {
                    info!(request_id = %this.request_id, frames = this.frames, "Generation complete");
                }
                Poll::Pending => return Poll::Pending,
            }
            // Closing the snapshot stream tells the engine to stop.
            this.chunks = None;
        }

        if let Some(stopped) = this.engine_stopped.as_mut() {
            if stopped.as_mut().poll(cx).is_pending() {
                return Poll::Pending;
            }
            this.engine_stopped = None;
        }

        this.token = None;
        Poll::Ready(this.pending_failure.take().map(StreamFrame::Failed))
    }
}

impl Drop for GenerationStream {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        info!(request_id = %self.request_id, frames = self.frames, "Client went away, stopping generation");
        self.chunks = None;

        let Some(stopped) = self.engine_stopped.take() else {
            return;
        };
        let request_id = std::mem::take(&mut self.request_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    stopped.await;
                    debug!(request_id = %request_id, "Engine stopped, releasing gate");
                    drop(token);
                });
            }
            Err(_) => {
                warn!(request_id = %request_id, "No runtime to await the engine, releasing gate now");
                drop(token);
            }
        }
    }
}

/// Current model plus everything that could be swapped in.
#[derive(Debug, Clone, Serialize)]
pub struct ModelListing {
    pub current: String,
    pub models: Vec<String>,
}

/// Current loras plus everything that could be applied.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterListing {
    pub current: Vec<String>,
    pub loras: Vec<String>,
}

pub struct GatewayService {
    gate: AdmissionGate,
    registry: Arc<ModelRegistry>,
    engine: Arc<dyn GenerationEngine>,
    metrics: Arc<Metrics>,
}

impl GatewayService {
    pub fn new(
        gate: AdmissionGate,
        registry: Arc<ModelRegistry>,
        engine: Arc<dyn GenerationEngine>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            gate,
            registry,
            engine,
            metrics,
        }
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Wait for the gate and start a generation.
    ///
    /// Engine errors, whether raised at start or mid-stream, arrive as a
    /// single trailing [`StreamFrame::Failed`].
    pub async fn generate(&self, request: GenerationRequest) -> GenerationStream {
        let request_id = Uuid::new_v4().to_string();
        let token = self.gate.acquire().await;
        self.metrics.generations_started.inc();

        let stop_sequences = request.params.stop_sequences();
        info!(
            request_id = %request_id,
            prompt_len = request.prompt.len(),
            max_new_tokens = request.params.max_new_tokens,
            streaming = request.params.streaming,
            stop_sequences = stop_sequences.len(),
            "Generation admitted"
        );
        debug!(request_id = %request_id, prompt = %request.prompt, "Prompt");

        match self
            .engine
            .generate(&request.prompt, &request.params, &stop_sequences)
            .await
        {
            Ok(run) => GenerationStream::running(
                request_id,
                token,
                run,
                request.prompt,
                self.metrics.clone(),
            ),
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Engine refused generation");
                drop(token);
                GenerationStream::failed(request_id, e, self.metrics.clone())
            }
        }
    }

    /// Swap the loaded model once no generation is running.
    pub async fn set_model(&self, model: &str) -> Result<RegistryState> {
        let token = self.gate.acquire().await;
        let result = self.registry.swap_model(&token, model).await;
        self.metrics.record_swap("model", result.is_ok());
        result
    }

    /// Swap the applied loras once no generation is running.
    pub async fn set_adapters(&self, names: &[String]) -> Result<RegistryState> {
        let token = self.gate.acquire().await;
        let result = self.registry.swap_adapters(&token, names).await;
        self.metrics.record_swap("loras", result.is_ok());
        result
    }

    /// Load the startup model and lora.
    pub async fn bootstrap(&self, model: Option<&str>, lora: Option<&str>) -> Result<RegistryState> {
        let token = self.gate.acquire().await;
        self.registry.bootstrap(&token, model, lora).await
    }

    pub async fn list_models(&self) -> Result<ModelListing> {
        let models = self.registry.available_models().await?;
        let state = self.registry.state().await;
        Ok(ModelListing {
            current: state.model_name().to_string(),
            models,
        })
    }

    pub async fn list_adapters(&self) -> Result<AdapterListing> {
        let loras = self.registry.available_adapters().await?;
        let state = self.registry.state().await;
        Ok(AdapterListing {
            current: state.adapters,
            loras,
        })
    }

    /// Name of the loaded model, `"None"` when nothing is loaded.
    pub async fn current_model(&self) -> String {
        self.registry.state().await.model_name().to_string()
    }
}
