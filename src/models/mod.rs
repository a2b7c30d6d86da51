//! Model and lora management.
//!
//! - [`store`]: Discovery of available models and loras
//! - [`loader`]: Loading ports and identifier classification
//! - [`registry`]: Loaded-model state and swap operations

pub mod loader;
pub mod registry;
pub mod store;
