//! ViewCache - tiered caching for derived image variants.
//!
//! Sits between a slow producer (an on-demand image transcoder) and a viewer
//! that needs low-latency repeated access to two variants per source file: a
//! reduced variant sized to a target viewport, and the original-quality
//! variant. Lookups go fast tier, then durable tier, then the producer, with
//! write-through on the way back; concurrent requests for the same key share
//! a single production.
//!
//! # High-level API
//!
//! ```ignore
//! use viewcache::cache::DiskCache;
//! use viewcache::config::PipelineConfig;
//! use viewcache::pipeline::ImagePipeline;
//! use viewcache::producer::TargetMetrics;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let durable = Arc::new(DiskCache::open(DiskCache::default_directory()).await?);
//! let pipeline = ImagePipeline::new(producer, durable, PipelineConfig::default());
//!
//! let cancel = CancellationToken::new();
//! if let Some(preview) = pipeline
//!     .get_reduced(&entry, TargetMetrics::new(1920, 1080), &cancel)
//!     .await?
//! {
//!     // serve preview.bytes
//! }
//! ```

pub mod cache;
pub mod config;
pub mod logging;
pub mod metadata;
pub mod pipeline;
pub mod producer;
pub mod source;
pub mod time;

/// Version of the viewcache library.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
