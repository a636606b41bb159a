//! Variant pipeline: the cache orchestrator.
//!
//! Composes the fast tier, durable tier, metadata index, and variant
//! producer behind three public operations: [`ImagePipeline::get_reduced`],
//! [`ImagePipeline::get_original`], and [`ImagePipeline::warm_all`].

mod error;
mod service;
mod warmer;

pub use error::PipelineError;
pub use service::ImagePipeline;
pub use warmer::WarmupSummary;

use std::sync::Arc;

use crate::cache::{DataSource, VariantKind};
use crate::metadata::ImageMetadata;

/// One served image variant.
///
/// Constructed per call; the bytes are shared with the cache tiers, not
/// copied.
#[derive(Debug, Clone)]
pub struct ImageData {
    pub bytes: Arc<Vec<u8>>,
    pub metadata: ImageMetadata,
    /// Which path served the bytes.
    pub source: DataSource,
    /// Whether this is the reduced or original variant.
    pub kind: VariantKind,
}

impl ImageData {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
