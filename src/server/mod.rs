//! HTTP server.
//!
//! - [`api`]: Routes, handlers and shared state
//! - [`streaming`]: Chunked streaming of generation output

pub mod api;
pub mod streaming;
