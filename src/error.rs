//! Gateway-level error taxonomy.
//!
//! `Busy` never appears here: the admission gate retries it internally and
//! callers only ever observe it as latency. Engine failures are not here
//! either; they end a generation stream as its final frame.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::loader::{AdapterError, LoaderError};
use crate::models::store::StoreError;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("model not in list: [{}] {requested}", .available.join(", "))]
    NotFound {
        requested: String,
        available: Vec<String>,
    },

    #[error("Parameter mis-match between lora and model.")]
    Mismatch(String),

    #[error("failed to load model {model}: {source}")]
    LoadFailure {
        model: String,
        #[source]
        source: LoaderError,
    },

    #[error("failed to apply loras: {0}")]
    AdapterFailure(String),

    #[error("no model is loaded")]
    NoModelLoaded,

    /// A swap was handed a token from a gate other than the registry's.
    #[error("admission token was issued by a different gate")]
    ForeignToken,

    #[error("discovery failed: {0}")]
    Discovery(#[from] StoreError),
}

impl From<AdapterError> for GatewayError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Mismatch(detail) => GatewayError::Mismatch(detail),
            AdapterError::Failed(detail) => GatewayError::AdapterFailure(detail),
        }
    }
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::Mismatch(_) | GatewayError::NoModelLoaded => StatusCode::CONFLICT,
            GatewayError::LoadFailure { .. }
            | GatewayError::AdapterFailure(_)
            | GatewayError::ForeignToken
            | GatewayError::Discovery(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "err": self.to_string() }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
