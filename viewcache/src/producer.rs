//! Variant producer contract.
//!
//! The cache core never decodes or transcodes images itself; it drives an
//! implementation of [`VariantProducer`] supplied by the host application.
//! Producers must be cancellable and are expected to run their heavy work on
//! the blocking pool.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheError;
use crate::metadata::ImageMetadata;
use crate::source::SourceEntry;

/// Target viewport the reduced variant should be sized for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetMetrics {
    pub width: u32,
    pub height: u32,
    /// Display scale factor (HiDPI); 1.0 for a plain monitor.
    pub scale: f64,
}

impl TargetMetrics {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            scale: 1.0,
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }
}

/// Encoded bytes plus their metadata, as returned by a producer and stored by
/// the fast tier.
#[derive(Debug, Clone)]
pub struct VariantPayload {
    pub bytes: Arc<Vec<u8>>,
    pub metadata: ImageMetadata,
}

impl VariantPayload {
    pub fn new(bytes: Vec<u8>, metadata: ImageMetadata) -> Self {
        Self {
            bytes: Arc::new(bytes),
            metadata,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Errors a producer implementation may return.
#[derive(Debug, Error)]
pub enum ProduceError {
    /// The operation was cancelled; propagates unchanged through the pipeline.
    #[error("production cancelled")]
    Cancelled,

    /// The source file could not be read.
    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Decoding or encoding failed.
    #[error("{0}")]
    Failed(String),
}

impl ProduceError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<ProduceError> for CacheError {
    fn from(err: ProduceError) -> Self {
        match err {
            ProduceError::Cancelled => CacheError::Cancelled,
            ProduceError::Io(e) => CacheError::Io(e),
            ProduceError::Failed(message) => CacheError::Production(message),
        }
    }
}

/// Produces encoded image variants for a source entry.
///
/// Both operations may fail and must honor the cancellation token
/// cooperatively; a cancelled production unwinds without any cache write.
pub trait VariantProducer: Send + Sync + 'static {
    /// Produce the reduced variant sized to `metrics`.
    fn produce_reduced(
        &self,
        entry: &SourceEntry,
        metrics: TargetMetrics,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<VariantPayload, ProduceError>> + Send;

    /// Load the original-quality variant.
    fn load_original(
        &self,
        entry: &SourceEntry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<VariantPayload, ProduceError>> + Send;
}
