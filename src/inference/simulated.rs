//! In-process simulated backend.
//!
//! Stands in for a real model runtime: it "loads" models and loras by name
//! and generates deterministic text one word per step, reporting cumulative
//! snapshots with the prompt echoed in front like a real text-generation
//! backend does. Failure injection hooks let tests drive the error paths.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::inference::engine::{EngineError, EngineRun, GenerationEngine};
use crate::inference::params::GenerationParameters;
use crate::models::loader::{
    size_tag, AdapterError, AdapterLoader, LoadHints, LoaderError, ModelFamily, ModelLoader,
};

const VOCABULARY: &[&str] = &[
    "the", "gate", "admits", "one", "request", "at", "a", "time", "and", "streams", "each",
    "word", "as", "it", "arrives.",
];

#[derive(Debug, Default)]
struct Loaded {
    model: Option<String>,
    adapters: Vec<String>,
}

/// Counts producers currently running; decrements on drop.
struct InFlight {
    current: Arc<AtomicUsize>,
}

impl InFlight {
    fn enter(current: &Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self {
            current: current.clone(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SimulatedBackend {
    loaded: RwLock<Loaded>,
    step_delay: Duration,
    load_delay: Duration,
    fail_after: Option<usize>,
    broken_models: Vec<String>,
    fail_unload: bool,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    overlapping_swaps: AtomicUsize,
}

impl SimulatedBackend {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            loaded: RwLock::new(Loaded::default()),
            step_delay: Duration::from_millis(config.step_delay_ms),
            load_delay: Duration::from_millis(config.load_delay_ms),
            fail_after: None,
            broken_models: Vec::new(),
            fail_unload: false,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
            overlapping_swaps: AtomicUsize::new(0),
        }
    }

    /// Emit `snapshots` snapshots, then fail the generation.
    pub fn with_failure_after(mut self, snapshots: usize) -> Self {
        self.fail_after = Some(snapshots);
        self
    }

    /// Make loading `model` fail.
    pub fn with_broken_model(mut self, model: impl Into<String>) -> Self {
        self.broken_models.push(model.into());
        self
    }

    /// Make every unload fail.
    pub fn with_failing_unload(mut self) -> Self {
        self.fail_unload = true;
        self
    }

    /// Generations currently producing snapshots.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous generations observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Unloads, loads and lora applications that ran while a generation
    /// was still producing.
    pub fn swaps_during_generation(&self) -> usize {
        self.overlapping_swaps.load(Ordering::SeqCst)
    }

    fn note_swap(&self) {
        if self.in_flight() > 0 {
            self.overlapping_swaps.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub async fn loaded_model(&self) -> Option<String> {
        self.loaded.read().await.model.clone()
    }

    pub async fn applied_adapters(&self) -> Vec<String> {
        self.loaded.read().await.adapters.clone()
    }

    async fn produce(
        tx: &mpsc::Sender<Result<String, EngineError>>,
        prompt: &str,
        max_words: usize,
        streaming: bool,
        stop_sequences: &[String],
        step_delay: Duration,
        fail_after: Option<usize>,
    ) -> usize {
        let mut text = String::new();
        let mut emitted = 0;

        if max_words == 0 {
            let _ = tx.send(Ok(prompt.to_string())).await;
            return 1;
        }

        for i in 0..max_words {
            tokio::select! {
                _ = tx.closed() => {
                    debug!(step = i, "Consumer dropped, stopping generation");
                    return emitted;
                }
                _ = tokio::time::sleep(step_delay) => {}
            }

            if fail_after == Some(emitted) {
                let _ = tx
                    .send(Err(EngineError::Failed(format!(
                        "simulated failure after {emitted} snapshots"
                    ))))
                    .await;
                return emitted;
            }

            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(VOCABULARY[i % VOCABULARY.len()]);

            let stopped = match stop_sequences
                .iter()
                .filter_map(|s| text.find(s.as_str()))
                .min()
            {
                Some(pos) => {
                    text.truncate(pos);
                    true
                }
                None => false,
            };

            let last = stopped || i + 1 == max_words;
            if streaming || last {
                if tx.send(Ok(format!("{prompt}{text}"))).await.is_err() {
                    return emitted;
                }
                emitted += 1;
            }

            if stopped {
                break;
            }
        }

        emitted
    }
}

#[async_trait]
impl GenerationEngine for SimulatedBackend {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParameters,
        stop_sequences: &[String],
    ) -> Result<EngineRun, EngineError> {
        let model = self.loaded.read().await.model.clone().ok_or(EngineError::NoModel)?;

        let (tx, rx) = mpsc::channel(32);
        let prompt = prompt.to_string();
        let stop_sequences = stop_sequences.to_vec();
        let max_words = usize::try_from(params.max_new_tokens).unwrap_or(0);
        let streaming = params.streaming;
        let step_delay = self.step_delay;
        let fail_after = self.fail_after;
        let in_flight = self.in_flight.clone();
        let peak = self.peak_in_flight.clone();

        let producer = tokio::spawn(async move {
            let guard = InFlight::enter(&in_flight, &peak);
            debug!(model = %model, max_words, streaming, "Simulated generation started");

            let emitted = Self::produce(
                &tx,
                &prompt,
                max_words,
                streaming,
                &stop_sequences,
                step_delay,
                fail_after,
            )
            .await;

            debug!(model = %model, emitted, "Simulated generation finished");
            // Leave the in-flight count before the consumer can observe end of stream.
            drop(guard);
            drop(tx);
        });

        Ok(EngineRun {
            snapshots: Box::pin(ReceiverStream::new(rx)),
            stopped: producer.map(|_| ()).boxed(),
        })
    }
}

#[async_trait]
impl ModelLoader for SimulatedBackend {
    async fn unload(&self) -> Result<(), LoaderError> {
        self.note_swap();
        let mut loaded = self.loaded.write().await;
        if self.fail_unload {
            return Err(LoaderError::Failed("simulated unload failure".to_string()));
        }
        if let Some(model) = loaded.model.take() {
            info!(model = %model, "Model unloaded");
        }
        loaded.adapters.clear();
        Ok(())
    }

    async fn load(
        &self,
        model: &str,
        family: ModelFamily,
        hints: &LoadHints,
    ) -> Result<(), LoaderError> {
        self.note_swap();
        tokio::time::sleep(self.load_delay).await;

        let mut loaded = self.loaded.write().await;
        loaded.model = None;
        loaded.adapters.clear();

        if self.broken_models.iter().any(|m| m == model) {
            return Err(LoaderError::Failed(format!(
                "simulated load failure for {model}"
            )));
        }

        loaded.model = Some(model.to_string());
        info!(model, ?family, wbits = hints.wbits, "Model loaded");
        Ok(())
    }
}

#[async_trait]
impl AdapterLoader for SimulatedBackend {
    async fn apply(&self, names: &[String]) -> Result<(), AdapterError> {
        self.note_swap();
        let mut loaded = self.loaded.write().await;
        let Some(model) = loaded.model.as_deref() else {
            return Err(AdapterError::Failed("no model loaded".to_string()));
        };

        if let Some(model_size) = size_tag(model) {
            for name in names {
                if let Some(lora_size) = size_tag(name) {
                    if lora_size != model_size {
                        return Err(AdapterError::Mismatch(format!(
                            "{name} targets {lora_size}, {model} is {model_size}"
                        )));
                    }
                }
            }
        }

        loaded.adapters = names.to_vec();
        info!(loras = ?names, "Loras applied");
        Ok(())
    }
}
