//! Generation engine port.
//!
//! An engine turns a prompt into a lazy sequence of cumulative snapshots:
//! each item is the full text generated so far (typically with the prompt
//! echoed in front), not a delta. Snapshots are not guaranteed to grow by
//! strict append; consumers must tolerate that.
//!
//! Closing the snapshot stream asks the engine to stop, but the engine may
//! still be mid-step when it is dropped. [`EngineRun::stopped`] resolves
//! only once the engine has really finished with the request.

use std::pin::Pin;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::Stream;
use thiserror::Error;

use crate::inference::params::GenerationParameters;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("no model is loaded")]
    NoModel,

    #[error("{0}")]
    Failed(String),
}

/// Cumulative snapshots, ending early with `Err` on a fatal engine error.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send>>;

/// A started generation.
pub struct EngineRun {
    pub snapshots: SnapshotStream,
    /// Resolves when the engine has stopped working on this generation,
    /// whether it ran to completion, failed, or was cancelled.
    pub stopped: BoxFuture<'static, ()>,
}

#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Start generating. Dropping the returned snapshot stream must stop
    /// generation, after which `stopped` must resolve.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParameters,
        stop_sequences: &[String],
    ) -> Result<EngineRun, EngineError>;
}
