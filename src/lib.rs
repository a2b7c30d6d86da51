//! llm-gate: single-slot LLM inference gateway.
//!
//! Admits one generation at a time system-wide, streams each generation
//! back as incremental text deltas, and hot-swaps the loaded model or loras
//! between generations.
//!
//! - [`gate`]: Single-slot admission gate
//! - [`inference`]: Engine port, parameters, diff streaming
//! - [`models`]: Discovery, loading and the model registry
//! - [`service`]: Orchestration of the above
//! - [`server`]: HTTP API

pub mod config;
pub mod error;
pub mod gate;
pub mod inference;
pub mod metrics;
pub mod models;
pub mod server;
pub mod service;

pub use error::{GatewayError, Result};
