//! Generation request and parameter bag.
//!
//! Every parameter has a default, so a request body only needs `prompt`.
//! Values are passed to the engine untouched; range checking is the engine's
//! concern.

use serde::{Deserialize, Serialize};

/// A generation request as accepted over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,

    #[serde(flatten)]
    pub params: GenerationParameters,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            params: GenerationParameters::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParameters {
    pub max_new_tokens: i64,
    pub do_sample: bool,
    pub temperature: f64,
    pub top_p: f64,
    pub typical_p: f64,
    pub repetition_penalty: f64,
    pub encoder_repetition_penalty: f64,
    pub top_k: f64,
    pub min_length: i64,
    pub no_repeat_ngram_size: f64,
    pub num_beams: i64,
    pub penalty_alpha: f64,
    pub length_penalty: f64,
    pub early_stopping: bool,
    pub seed: i64,

    /// Accepted for client compatibility; not read by the gateway.
    pub stream: bool,

    /// When false the engine yields only the final snapshot.
    pub streaming: bool,

    pub return_prompt: bool,
    pub add_bos_token: bool,
    pub truncation_length: i64,
    pub custom_stopping_strings: String,
    pub ban_eos_token: bool,
    pub skip_special_tokens: bool,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            max_new_tokens: 200,
            do_sample: true,
            temperature: 0.7,
            top_p: 0.1,
            typical_p: 1.0,
            repetition_penalty: 1.18,
            encoder_repetition_penalty: 1.0,
            top_k: 40.0,
            min_length: 0,
            no_repeat_ngram_size: 0.0,
            num_beams: 1,
            penalty_alpha: 0.0,
            length_penalty: 1.0,
            early_stopping: false,
            seed: -1,
            stream: false,
            streaming: false,
            return_prompt: false,
            add_bos_token: true,
            truncation_length: 2048,
            custom_stopping_strings: String::new(),
            ban_eos_token: false,
            skip_special_tokens: false,
        }
    }
}

impl GenerationParameters {
    /// Stop sequences derived from `custom_stopping_strings`.
    ///
    /// The field holds a single string: empty means no stop sequences,
    /// anything else is one stop sequence taken verbatim.
    pub fn stop_sequences(&self) -> Vec<String> {
        if self.custom_stopping_strings.is_empty() {
            Vec::new()
        } else {
            vec![self.custom_stopping_strings.clone()]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_only_body_gets_defaults() {
        let req: GenerationRequest = serde_json::from_str(r#"{"prompt": "Hello"}"#).unwrap();
        assert_eq!(req.prompt, "Hello");
        assert_eq!(req.params, GenerationParameters::default());
        assert_eq!(req.params.max_new_tokens, 200);
        assert_eq!(req.params.repetition_penalty, 1.18);
        assert_eq!(req.params.truncation_length, 2048);
        assert!(req.params.add_bos_token);
        assert!(!req.params.streaming);
    }

    #[test]
    fn test_overrides_pass_through_unmodified() {
        let req: GenerationRequest = serde_json::from_str(
            r#"{"prompt": "x", "max_new_tokens": -5, "temperature": 3.5, "streaming": true}"#,
        )
        .unwrap();
        assert_eq!(req.params.max_new_tokens, -5);
        assert_eq!(req.params.temperature, 3.5);
        assert!(req.params.streaming);
        assert_eq!(req.params.top_k, 40.0);
    }

    #[test]
    fn test_stream_flag_does_not_enable_streaming() {
        let req: GenerationRequest =
            serde_json::from_str(r#"{"prompt": "x", "stream": true}"#).unwrap();
        assert!(req.params.stream);
        assert!(!req.params.streaming);
    }

    #[test]
    fn test_missing_prompt_rejected() {
        let res: Result<GenerationRequest, _> = serde_json::from_str(r#"{"temperature": 1.0}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_empty_stopping_string_gives_no_stop_sequences() {
        let params = GenerationParameters::default();
        assert!(params.stop_sequences().is_empty());
    }

    #[test]
    fn test_stopping_string_becomes_single_stop_sequence() {
        let params = GenerationParameters {
            custom_stopping_strings: "\nUser:".to_string(),
            ..Default::default()
        };
        assert_eq!(params.stop_sequences(), vec!["\nUser:".to_string()]);
    }
}
