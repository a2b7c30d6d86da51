//! Process-wide record of the loaded model and loras.
//!
//! Swaps take an [`AdmissionToken`] by reference: holding one is the proof
//! that no generation is streaming and no other swap is running. The
//! registry is bound to one gate and rejects tokens issued by any other.
//! Readers
//! never take the gate; they see the last committed state, never a
//! half-applied swap.
//!
//! Failed swaps leave the backend in a condition the registry cannot fully
//! observe. The registry resolves this the same way every time:
//! - a failed model load commits "no model loaded" and marks the registry
//!   degraded;
//! - a failed lora application asks the backend to drop all loras, commits
//!   an empty lora list and marks the registry degraded.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::error::{GatewayError, Result};
use crate::gate::{AdmissionToken, GateId};
use crate::models::loader::{classify, AdapterLoader, LoadHints, ModelFamily, ModelLoader};
use crate::models::store::ModelStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryStatus {
    Ready,
    Degraded { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryState {
    pub model: Option<String>,
    pub adapters: Vec<String>,
    pub family: ModelFamily,
    pub hints: LoadHints,
    pub status: RegistryStatus,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            model: None,
            adapters: Vec::new(),
            family: ModelFamily::HfGeneric,
            hints: LoadHints::default(),
            status: RegistryStatus::Ready,
        }
    }
}

impl RegistryState {
    /// Model name for display; `"None"` when nothing is loaded.
    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or("None")
    }
}

pub struct ModelRegistry {
    gate: GateId,
    state: RwLock<RegistryState>,
    store: Arc<dyn ModelStore>,
    loader: Arc<dyn ModelLoader>,
    adapter_loader: Arc<dyn AdapterLoader>,
}

impl ModelRegistry {
    pub fn new(
        gate: GateId,
        store: Arc<dyn ModelStore>,
        loader: Arc<dyn ModelLoader>,
        adapter_loader: Arc<dyn AdapterLoader>,
    ) -> Self {
        Self {
            gate,
            state: RwLock::new(RegistryState::default()),
            store,
            loader,
            adapter_loader,
        }
    }

    /// Snapshot of the committed state.
    pub async fn state(&self) -> RegistryState {
        self.state.read().await.clone()
    }

    pub async fn available_models(&self) -> Result<Vec<String>> {
        Ok(self.store.discover_models().await?)
    }

    pub async fn available_adapters(&self) -> Result<Vec<String>> {
        Ok(self.store.discover_adapters().await?)
    }

    /// Replace the loaded model with `model`.
    ///
    /// Loras are dropped by a model swap.
    pub async fn swap_model(&self, token: &AdmissionToken, model: &str) -> Result<RegistryState> {
        self.check_token(token)?;
        let available = self.available_models().await?;
        if !available.iter().any(|m| m == model) {
            return Err(GatewayError::NotFound {
                requested: model.to_string(),
                available,
            });
        }

        let previous = self.state().await;
        info!(from = previous.model_name(), to = model, "Swapping model");

        if let Err(e) = self.loader.unload().await {
            warn!(model = previous.model_name(), error = %e, "Unload failed, loading anyway");
        }

        let (family, hints) = classify(model);
        info!(
            model,
            ?family,
            wbits = hints.wbits,
            groupsize = hints.groupsize,
            load_in_8bit = hints.load_in_8bit,
            "Loading model"
        );

        match self.loader.load(model, family, &hints).await {
            Ok(()) => {
                let next = RegistryState {
                    model: Some(model.to_string()),
                    adapters: Vec::new(),
                    family,
                    hints,
                    status: RegistryStatus::Ready,
                };
                Ok(self.commit(next).await)
            }
            Err(source) => {
                error!(model, error = %source, "Model load failed, registry degraded");
                self.commit(RegistryState {
                    model: None,
                    adapters: Vec::new(),
                    family,
                    hints,
                    status: RegistryStatus::Degraded {
                        reason: format!("load of {model} failed: {source}"),
                    },
                })
                .await;
                Err(GatewayError::LoadFailure {
                    model: model.to_string(),
                    source,
                })
            }
        }
    }

    /// Replace the applied loras with `names`. An empty list removes all.
    pub async fn swap_adapters(
        &self,
        token: &AdmissionToken,
        names: &[String],
    ) -> Result<RegistryState> {
        self.check_token(token)?;
        let current = self.state().await;
        if current.model.is_none() {
            return Err(GatewayError::NoModelLoaded);
        }

        info!(from = ?current.adapters, to = ?names, "Applying loras");

        match self.adapter_loader.apply(names).await {
            Ok(()) => {
                let next = RegistryState {
                    adapters: names.to_vec(),
                    status: RegistryStatus::Ready,
                    ..current
                };
                Ok(self.commit(next).await)
            }
            Err(e) => {
                error!(loras = ?names, error = %e, "Lora application failed, clearing loras");
                if let Err(clear_err) = self.adapter_loader.apply(&[]).await {
                    warn!(error = %clear_err, "Clearing loras after failure also failed");
                }
                self.commit(RegistryState {
                    adapters: Vec::new(),
                    status: RegistryStatus::Degraded {
                        reason: format!("lora application failed: {e}"),
                    },
                    ..current
                })
                .await;
                Err(e.into())
            }
        }
    }

    /// Pick and load the startup model.
    ///
    /// An explicit `model` wins; otherwise a lone discoverable model is
    /// loaded; otherwise the gateway starts with nothing loaded.
    pub async fn bootstrap(
        &self,
        token: &AdmissionToken,
        model: Option<&str>,
        lora: Option<&str>,
    ) -> Result<RegistryState> {
        self.check_token(token)?;
        let chosen = match model {
            Some(m) => Some(m.to_string()),
            None => {
                let mut available = self.available_models().await?;
                if available.len() == 1 {
                    available.pop()
                } else {
                    info!(count = available.len(), "No startup model selected");
                    None
                }
            }
        };

        let Some(chosen) = chosen else {
            return Ok(self.state().await);
        };

        let state = self.swap_model(token, &chosen).await?;
        match lora {
            Some(lora) => self.swap_adapters(token, &[lora.to_string()]).await,
            None => Ok(state),
        }
    }

    fn check_token(&self, token: &AdmissionToken) -> Result<()> {
        if token.gate_id() == self.gate {
            Ok(())
        } else {
            Err(GatewayError::ForeignToken)
        }
    }

    async fn commit(&self, next: RegistryState) -> RegistryState {
        let mut state = self.state.write().await;
        *state = next;
        state.clone()
    }
}
