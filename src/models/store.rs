//! Discovery of available models and loras.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ModelsConfig;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// File names in the models directory that are never models.
const MODEL_SKIP_SUFFIXES: &[&str] = &[".txt", "-np", ".pt", ".json"];
const MODEL_CONFIG_FILE: &str = "config.yaml";
const LORA_PLACEHOLDER: &str = "place-your-loras-here.txt";

#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Identifiers accepted by model swaps, sorted case-insensitively.
    async fn discover_models(&self) -> Result<Vec<String>, StoreError>;

    /// Lora identifiers, sorted.
    async fn discover_adapters(&self) -> Result<Vec<String>, StoreError>;
}

/// Scans the configured model and lora directories on every call.
pub struct FsModelStore {
    config: ModelsConfig,
}

impl FsModelStore {
    pub fn new(config: ModelsConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ModelStore for FsModelStore {
    async fn discover_models(&self) -> Result<Vec<String>, StoreError> {
        let entries = list_dir(&self.config.model_dir).await?;
        let flexgen = self.config.flexgen;

        let mut models: Vec<String> = entries
            .into_iter()
            .filter_map(|name| {
                if flexgen {
                    name.strip_suffix("-np").map(str::to_string)
                } else if MODEL_SKIP_SUFFIXES.iter().any(|s| name.ends_with(s))
                    || name == MODEL_CONFIG_FILE
                {
                    None
                } else {
                    Some(name.strip_suffix(".pth").unwrap_or(&name).to_string())
                }
            })
            .collect();
        models.sort_by_key(|m| m.to_lowercase());

        debug!(count = models.len(), flexgen, "Discovered models");
        Ok(models)
    }

    async fn discover_adapters(&self) -> Result<Vec<String>, StoreError> {
        let mut loras: Vec<String> = list_dir(&self.config.lora_dir)
            .await?
            .into_iter()
            .filter(|name| name != LORA_PLACEHOLDER)
            .collect();
        loras.sort();

        debug!(count = loras.len(), "Discovered loras");
        Ok(loras)
    }
}

/// Visible entry names in `dir`. A missing directory is treated as empty.
async fn list_dir(dir: &Path) -> Result<Vec<String>, StoreError> {
    let io_err = |source| StoreError::Io {
        path: dir.display().to_string(),
        source,
    };

    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(dir = %dir.display(), "Directory not found, nothing to discover");
            return Ok(Vec::new());
        }
        Err(e) => return Err(io_err(e)),
    };

    let mut names = Vec::new();
    while let Some(entry) = read_dir.next_entry().await.map_err(io_err)? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') {
            names.push(name);
        }
    }
    Ok(names)
}

/// Fixed lists, for embedding the gateway without a models directory.
pub struct StaticModelStore {
    models: Vec<String>,
    adapters: Vec<String>,
}

impl StaticModelStore {
    pub fn new<M, A>(models: M, adapters: A) -> Self
    where
        M: IntoIterator,
        M::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        let mut models: Vec<String> = models.into_iter().map(Into::into).collect();
        let mut adapters: Vec<String> = adapters.into_iter().map(Into::into).collect();
        models.sort_by_key(|m| m.to_lowercase());
        adapters.sort();
        Self { models, adapters }
    }
}

#[async_trait]
impl ModelStore for StaticModelStore {
    async fn discover_models(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.models.clone())
    }

    async fn discover_adapters(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.adapters.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn store_for(models: &Path, loras: &Path, flexgen: bool) -> FsModelStore {
        FsModelStore::new(ModelsConfig {
            model_dir: models.to_path_buf(),
            lora_dir: loras.to_path_buf(),
            flexgen,
        })
    }

    #[tokio::test]
    async fn test_model_discovery_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "llama-7b",
            "Alpaca-13b",
            "gpt4-x.pth",
            "notes.txt",
            "opt-1.3b-np",
            "weights.pt",
            "meta.json",
            "config.yaml",
            ".hidden",
        ] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let store = store_for(dir.path(), &PathBuf::from("/nonexistent"), false);
        let models = store.discover_models().await.unwrap();
        assert_eq!(models, vec!["Alpaca-13b", "gpt4-x", "llama-7b"]);
    }

    #[tokio::test]
    async fn test_flexgen_only_lists_np_entries() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["opt-30b-np", "llama-7b", "opt-1.3b-np"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }

        let store = store_for(dir.path(), &PathBuf::from("/nonexistent"), true);
        let models = store.discover_models().await.unwrap();
        assert_eq!(models, vec!["opt-1.3b", "opt-30b"]);
    }

    #[tokio::test]
    async fn test_lora_discovery_skips_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["place-your-loras-here.txt", "baize-lora-13B", "alpaca-lora-7b"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let store = store_for(&PathBuf::from("/nonexistent"), dir.path(), false);
        let loras = store.discover_adapters().await.unwrap();
        assert_eq!(loras, vec!["alpaca-lora-7b", "baize-lora-13B"]);
    }

    #[tokio::test]
    async fn test_missing_directories_are_empty() {
        let missing = PathBuf::from("/nonexistent/llm-gate");
        let store = store_for(&missing, &missing, false);
        assert!(store.discover_models().await.unwrap().is_empty());
        assert!(store.discover_adapters().await.unwrap().is_empty());
    }
}
