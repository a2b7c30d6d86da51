//! Text generation.
//!
//! - [`engine`]: Engine port yielding cumulative snapshots
//! - [`params`]: Request and generation parameter defaults
//! - [`streamer`]: Snapshot-to-delta conversion
//! - [`simulated`]: Deterministic in-process backend

pub mod engine;
pub mod params;
pub mod simulated;
pub mod streamer;
