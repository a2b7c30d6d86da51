//! Model and lora loading ports, plus identifier classification.
//!
//! The loader has no metadata to inspect before a load, so the loading
//! preset is derived from naming conventions in the model identifier
//! (quantization and parameter-count tags).

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error("model {0} not found on disk")]
    Missing(String),

    #[error("{0}")]
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// Lora shapes do not fit the loaded model.
    #[error("lora/model mismatch: {0}")]
    Mismatch(String),

    #[error("{0}")]
    Failed(String),
}

/// Architecture family used to select a loading path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Opt,
    HfGeneric,
}

/// Quantization preset handed to the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadHints {
    /// Pre-quantized weight bit width; 0 means full precision.
    pub wbits: u32,

    /// GPTQ group size; -1 disables grouping.
    pub groupsize: i32,

    /// Quantize to 8-bit at load time.
    pub load_in_8bit: bool,
}

impl Default for LoadHints {
    fn default() -> Self {
        Self {
            wbits: 0,
            groupsize: -1,
            load_in_8bit: false,
        }
    }
}

/// Derive the family and loading preset from a model identifier.
///
/// - `4bit` anywhere: GPTQ 4-bit, group size 128.
/// - `7b` anywhere: small enough for full precision.
/// - anything else: load in 8-bit.
pub fn classify(model: &str) -> (ModelFamily, LoadHints) {
    let name = model.to_lowercase();

    let hints = if name.contains("4bit") {
        LoadHints {
            wbits: 4,
            groupsize: 128,
            load_in_8bit: false,
        }
    } else if name.contains("7b") {
        LoadHints::default()
    } else {
        LoadHints {
            load_in_8bit: true,
            ..LoadHints::default()
        }
    };

    let family = if name_tokens(&name).any(|t| t == "opt") {
        ModelFamily::Opt
    } else {
        ModelFamily::HfGeneric
    };

    (family, hints)
}

/// Parameter-count tag such as `7b` or `1.3b`, if the name carries one.
pub fn size_tag(name: &str) -> Option<String> {
    let name = name.to_lowercase();
    let tag = name_tokens(&name)
        .find(|t| {
            t.strip_suffix('b')
                .is_some_and(|n| !n.is_empty() && n.parse::<f64>().is_ok())
        })
        .map(str::to_string);
    tag
}

fn name_tokens(name: &str) -> impl Iterator<Item = &str> {
    name.split(['-', '_', '/', ' ']).filter(|t| !t.is_empty())
}

#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Release the current model. Safe to call when nothing is loaded.
    async fn unload(&self) -> Result<(), LoaderError>;

    /// Load `model`. Model and tokenizer handles stay with the backend.
    async fn load(
        &self,
        model: &str,
        family: ModelFamily,
        hints: &LoadHints,
    ) -> Result<(), LoaderError>;
}

#[async_trait]
pub trait AdapterLoader: Send + Sync {
    /// Replace the applied loras with `names`. An empty slice removes all.
    async fn apply(&self, names: &[String]) -> Result<(), AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_4bit_preset_wins_over_size() {
        let (_, hints) = classify("llama-7b-4bit");
        assert_eq!(hints.wbits, 4);
        assert_eq!(hints.groupsize, 128);
        assert!(!hints.load_in_8bit);
    }

    #[test]
    fn test_7b_loads_full_precision() {
        let (family, hints) = classify("Alpaca-7B");
        assert_eq!(family, ModelFamily::HfGeneric);
        assert_eq!(hints, LoadHints::default());
    }

    #[test]
    fn test_other_sizes_load_in_8bit() {
        let (_, hints) = classify("llama-13b");
        assert!(hints.load_in_8bit);
        assert_eq!(hints.wbits, 0);
        assert_eq!(hints.groupsize, -1);
    }

    #[test]
    fn test_opt_family_detected_case_insensitively() {
        assert_eq!(classify("facebook_OPT-1.3b").0, ModelFamily::Opt);
        assert_eq!(classify("optimus-13b").0, ModelFamily::HfGeneric);
    }

    #[test]
    fn test_size_tag() {
        assert_eq!(size_tag("baize-lora-13B").as_deref(), Some("13b"));
        assert_eq!(size_tag("opt-1.3b").as_deref(), Some("1.3b"));
        assert_eq!(size_tag("alpaca-lora"), None);
        assert_eq!(size_tag("b"), None);
    }
}
