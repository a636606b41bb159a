//! Error types for the variant pipeline.

use thiserror::Error;

use crate::cache::CacheError;

/// Errors surfaced by the pipeline's public operations.
///
/// Reduced-variant failures never appear here: they degrade to an absent
/// result so the caller can fall back to its own original-loading path.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The operation was cancelled; propagates unchanged.
    #[error("operation cancelled")]
    Cancelled,

    /// Loading the original-quality variant failed.
    ///
    /// Carries the entry's display name so the caller can surface a
    /// user-facing message.
    #[error("failed to load original image \"{name}\": {source}")]
    OriginalLoad {
        name: String,
        #[source]
        source: CacheError,
    },
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
