//! Runtime configuration for llm-gate.
//!
//! Configuration is loaded from a JSON file or constructed programmatically.
//! Command-line flags cover the knobs that change per launch (listen address,
//! startup model, logging); everything else lives in the file.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "llm-gate", about = "Single-slot LLM inference gateway")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address. Overrides `server.listen` from the config file.
    #[arg(long)]
    pub listen: Option<String>,

    /// Model to load at startup.
    #[arg(long)]
    pub model: Option<String>,

    /// Lora to apply on top of the startup model.
    #[arg(long)]
    pub lora: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Admission gate polling.
    pub gate: GateConfig,

    /// Model and lora discovery.
    pub models: ModelsConfig,

    /// Simulated engine settings.
    pub engine: EngineConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:7861").
    pub listen: String,

    /// Allow any origin via permissive CORS.
    pub permissive_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7861".to_string(),
            permissive_cors: true,
        }
    }
}

/// Admission gate timing.
///
/// `poll_timeout_ms` is polling granularity, not a request deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// How long a single acquisition attempt waits for the slot.
    pub poll_timeout_ms: u64,

    /// Sleep between failed attempts.
    pub backoff_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 100,
            backoff_ms: 1000,
        }
    }
}

impl GateConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Where models and loras are discovered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Directory holding one entry per model.
    pub model_dir: PathBuf,

    /// Directory holding one entry per lora.
    pub lora_dir: PathBuf,

    /// FlexGen layout: only `*-np` entries are models.
    pub flexgen: bool,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            lora_dir: PathBuf::from("loras"),
            flexgen: false,
        }
    }
}

/// Settings for the in-process simulated backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay between successive snapshots.
    pub step_delay_ms: u64,

    /// Simulated load time for a model swap.
    pub load_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_delay_ms: 20,
            load_delay_ms: 250,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.gate.poll_timeout(), Duration::from_millis(100));
        assert_eq!(cfg.gate.backoff(), Duration::from_secs(1));
        assert_eq!(cfg.server.listen, "0.0.0.0:7861");
        assert!(!cfg.models.flexgen);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let cfg: Config = serde_json::from_str(r#"{"gate": {"backoff_ms": 50}}"#).unwrap();
        assert_eq!(cfg.gate.backoff_ms, 50);
        assert_eq!(cfg.gate.poll_timeout_ms, 100);
        assert_eq!(cfg.models.lora_dir, PathBuf::from("loras"));
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(cfg.engine.step_delay_ms, 20);
    }
}
