//! Pipeline construction, retrieval operations, and lifecycle.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{
    CacheError, CacheJanitor, CacheKey, CacheStats, CacheStatsSnapshot, DataSource, DurableCache,
    EntryPolicy, MemoryCache, VariantKind,
};
use crate::config::PipelineConfig;
use crate::metadata::MetadataIndex;
use crate::pipeline::{ImageData, PipelineError};
use crate::producer::{TargetMetrics, VariantPayload, VariantProducer};
use crate::source::SourceEntry;

/// Cache orchestrator for image variants.
///
/// Owns the fast tier, the metadata index, and the janitor; the producer and
/// durable tier are injected. Instances are explicitly constructed with clear
/// ownership so tests can run isolated pipelines side by side - there is no
/// process-wide state.
///
/// # Example
///
/// ```ignore
/// use viewcache::cache::NoOpDurableCache;
/// use viewcache::config::PipelineConfig;
/// use viewcache::pipeline::ImagePipeline;
/// use std::sync::Arc;
///
/// let pipeline = ImagePipeline::new(
///     Arc::new(my_producer),
///     Arc::new(NoOpDurableCache::new()),
///     PipelineConfig::default(),
/// );
/// ```
pub struct ImagePipeline<P, D>
where
    P: VariantProducer,
    D: DurableCache,
{
    pub(crate) producer: Arc<P>,
    pub(crate) durable: Arc<D>,
    pub(crate) memory: Arc<MemoryCache>,
    pub(crate) metadata: Arc<MetadataIndex>,
    pub(crate) stats: Arc<CacheStats>,
    pub(crate) config: PipelineConfig,
    janitor: CacheJanitor,
}

impl<P, D> ImagePipeline<P, D>
where
    P: VariantProducer,
    D: DurableCache,
{
    /// Build a pipeline and start its janitor.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(producer: Arc<P>, durable: Arc<D>, config: PipelineConfig) -> Self {
        let memory = Arc::new(MemoryCache::new());
        let stats = memory.stats();
        let janitor = CacheJanitor::start(Arc::clone(&memory), config.janitor_interval);

        info!(
            reduced_ttl_secs = config.reduced_policy.ttl.as_secs(),
            original_ttl_secs = config.original_policy.ttl.as_secs(),
            "image pipeline started"
        );

        Self {
            producer,
            durable,
            memory,
            metadata: Arc::new(MetadataIndex::new()),
            stats,
            config,
            janitor,
        }
    }

    /// Fetch the reduced variant for `entry`, producing it on miss.
    ///
    /// Entries that are not disk-cache eligible return `Ok(None)` immediately
    /// and never touch a tier; the caller decodes those on demand through its
    /// own path. Any non-cancellation failure also collapses to `Ok(None)` -
    /// a missing preview is never fatal.
    pub async fn get_reduced(
        &self,
        entry: &SourceEntry,
        metrics: TargetMetrics,
        cancel: &CancellationToken,
    ) -> Result<Option<ImageData>, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        if !entry.disk_cache_eligible() {
            debug!(
                name = entry.display_name(),
                "entry below cache eligibility, leaving to on-demand decode"
            );
            return Ok(None);
        }

        let key = entry.cache_key().clone();
        let policy = &self.config.reduced_policy;

        let result = self
            .memory
            .get_or_produce(&key, policy, cancel, || {
                self.populate_reduced(&key, entry, metrics, policy, cancel)
            })
            .await;

        match result {
            Ok((payload, source)) => {
                self.metadata.record(key, payload.metadata);
                Ok(Some(ImageData {
                    bytes: payload.bytes.clone(),
                    metadata: payload.metadata,
                    source,
                    kind: VariantKind::Reduced,
                }))
            }
            Err(CacheError::Cancelled) => Err(PipelineError::Cancelled),
            Err(err) => {
                warn!(
                    name = entry.display_name(),
                    error = %err,
                    "reduced variant unavailable, caller falls back to original"
                );
                Ok(None)
            }
        }
    }

    /// Fetch the original-quality variant for `entry`.
    ///
    /// Unlike the reduced path, failure here is fatal to the caller: the
    /// producer error is wrapped with the entry's display name and returned.
    /// Originals are cached only in the fast tier, never durably.
    pub async fn get_original(
        &self,
        entry: &SourceEntry,
        cancel: &CancellationToken,
    ) -> Result<ImageData, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let key = entry.cache_key().original();
        let policy = &self.config.original_policy;
        let produce_key = key.clone();

        let result = self
            .memory
            .get_or_produce(&key, policy, cancel, || async move {
                if cancel.is_cancelled() {
                    return Err(CacheError::Cancelled);
                }
                let payload = self
                    .producer
                    .load_original(entry, cancel)
                    .await
                    .map_err(CacheError::from)?;
                self.metadata.record(produce_key, payload.metadata);
                Ok((payload, DataSource::Producer))
            })
            .await;

        match result {
            Ok((payload, source)) => {
                self.metadata.record(key, payload.metadata);
                Ok(ImageData {
                    bytes: payload.bytes.clone(),
                    metadata: payload.metadata,
                    source,
                    kind: VariantKind::Original,
                })
            }
            Err(CacheError::Cancelled) => Err(PipelineError::Cancelled),
            Err(err) => {
                warn!(name = entry.display_name(), error = %err, "original load failed");
                Err(PipelineError::OriginalLoad {
                    name: entry.display_name().to_string(),
                    source: err,
                })
            }
        }
    }

    /// Point-in-time cache counters.
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of payloads currently held by the fast tier.
    pub fn cached_entries(&self) -> usize {
        self.memory.len()
    }

    /// Number of keys with memoized metadata.
    pub fn metadata_len(&self) -> usize {
        self.metadata.len()
    }

    /// Stop the janitor and release tier resources deterministically.
    pub async fn shutdown(self) {
        info!(stats = %self.stats.snapshot(), "image pipeline shutting down");
        self.janitor.shutdown().await;
    }

    /// Production path behind a fast-tier miss for a reduced variant. The
    /// durable tier is consulted before the producer, and a fresh production
    /// is written through to the durable tier when the policy allows.
    async fn populate_reduced(
        &self,
        key: &CacheKey,
        entry: &SourceEntry,
        metrics: TargetMetrics,
        policy: &EntryPolicy,
        cancel: &CancellationToken,
    ) -> Result<(VariantPayload, DataSource), CacheError> {
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        match self.durable.get(key, cancel).await {
            Ok(Some(bytes)) => match self.metadata.ensure(key, &bytes) {
                Ok(metadata) => {
                    self.stats.record_durable_hit();
                    debug!(key = %key, "durable tier hit");
                    return Ok((VariantPayload::new(bytes, metadata), DataSource::Durable));
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "durable payload unreadable, reproducing");
                }
            },
            Ok(None) => {
                self.stats.record_durable_miss();
            }
            Err(CacheError::Cancelled) => return Err(CacheError::Cancelled),
            Err(err) => {
                warn!(key = %key, error = %err, "durable tier read failed, reproducing");
            }
        }

        let payload = self
            .producer
            .produce_reduced(entry, metrics, cancel)
            .await
            .map_err(CacheError::from)?;
        self.metadata.record(key.clone(), payload.metadata);

        if let Some(ttl) = policy.durable_ttl {
            match self.durable.set(key, &payload.bytes, ttl, cancel).await {
                Ok(()) => self.stats.record_durable_write(),
                Err(CacheError::Cancelled) => return Err(CacheError::Cancelled),
                Err(err) => {
                    self.stats.record_durable_write_failure();
                    warn!(key = %key, error = %err, "durable tier write failed");
                }
            }
        }

        Ok((payload, DataSource::Producer))
    }
}
