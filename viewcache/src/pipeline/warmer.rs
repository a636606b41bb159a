//! Budgeted bulk warm-up.
//!
//! Two passes over an ordered entry list: a cheap pre-check that counts what
//! the fast tier already holds, then sequential production for the remainder
//! until the byte budget is spent. Entries never reached stay cold and are
//! fetched lazily on normal access.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::DurableCache;
use crate::config::format_size;
use crate::pipeline::{ImagePipeline, PipelineError};
use crate::producer::{TargetMetrics, VariantProducer};
use crate::source::SourceEntry;

/// Outcome of one warm-up pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WarmupSummary {
    /// Entries in the input list.
    pub total: usize,
    /// Entries already servable from the fast tier.
    pub already_cached: usize,
    /// Entries produced during this pass.
    pub produced: usize,
    /// Entries not eligible for caching.
    pub ineligible: usize,
    /// Entries whose production failed; they stay cold.
    pub failed: usize,
    /// Entries never reached because the budget ran out.
    pub left_unwarmed: usize,
    /// Bytes counted against the budget.
    pub bytes_warmed: u64,
    /// Whether the pass stopped on cancellation.
    pub cancelled: bool,
}

/// Tracks fractional progress over the entry list.
///
/// Weighted by declared file sizes when their sum is positive, by entry
/// count otherwise.
struct ProgressTracker {
    total_declared: u64,
    processed_declared: u64,
    total_count: usize,
    processed_count: usize,
}

impl ProgressTracker {
    fn new(entries: &[SourceEntry]) -> Self {
        Self {
            total_declared: entries.iter().map(|e| e.byte_len()).sum(),
            processed_declared: 0,
            total_count: entries.len(),
            processed_count: 0,
        }
    }

    fn advance(&mut self, entry: &SourceEntry) -> f64 {
        self.processed_count += 1;
        self.processed_declared += entry.byte_len();
        self.fraction()
    }

    fn fraction(&self) -> f64 {
        if self.total_declared > 0 {
            (self.processed_declared as f64 / self.total_declared as f64).min(1.0)
        } else if self.total_count > 0 {
            self.processed_count as f64 / self.total_count as f64
        } else {
            1.0
        }
    }
}

impl<P, D> ImagePipeline<P, D>
where
    P: VariantProducer,
    D: DurableCache,
{
    /// Pre-populate the cache for a batch of entries, bounded by the
    /// configured byte budget.
    ///
    /// Progress fractions in `[0, 1]` are published through `progress`; the
    /// final value is exactly `1.0` on completion and on early
    /// budget-exhaustion exit, including for an empty list. Cancellation
    /// stops the batch where it stands. Individual failures are logged and
    /// skipped; they never abort the batch.
    pub async fn warm_all(
        &self,
        entries: &[SourceEntry],
        metrics: TargetMetrics,
        progress: Option<&watch::Sender<f64>>,
        cancel: &CancellationToken,
    ) -> WarmupSummary {
        let budget = self.config.warmup_budget_bytes;
        let mut summary = WarmupSummary {
            total: entries.len(),
            ..WarmupSummary::default()
        };

        if entries.is_empty() {
            if let Some(tx) = progress {
                tx.send_replace(1.0);
            }
            debug!("warm-up requested with no entries");
            return summary;
        }

        info!(
            total = entries.len(),
            budget = %format_size(budget),
            "starting warm-up"
        );

        let mut tracker = ProgressTracker::new(entries);
        let mut pending: Vec<&SourceEntry> = Vec::new();

        // Pass 1: count what the fast tier already holds, without producing.
        for entry in entries {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                info!(warmed = summary.already_cached, "warm-up cancelled");
                return summary;
            }

            if entry.disk_cache_eligible() {
                if let Some(payload) = self.memory.try_get(entry.cache_key()) {
                    summary.already_cached += 1;
                    summary.bytes_warmed += payload.len() as u64;
                    let fraction = tracker.advance(entry);
                    if let Some(tx) = progress {
                        tx.send_replace(fraction);
                    }
                    if summary.bytes_warmed >= budget {
                        break;
                    }
                    continue;
                }
            }
            pending.push(entry);
        }

        // Pass 2: produce what pass 1 did not satisfy, until the budget runs
        // out.
        for entry in pending {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                info!(
                    warmed = summary.already_cached + summary.produced,
                    "warm-up cancelled"
                );
                return summary;
            }
            if summary.bytes_warmed >= budget {
                break;
            }

            if !entry.disk_cache_eligible() {
                summary.ineligible += 1;
                let fraction = tracker.advance(entry);
                if let Some(tx) = progress {
                    tx.send_replace(fraction);
                }
                continue;
            }

            match self.get_reduced(entry, metrics, cancel).await {
                Ok(Some(data)) => {
                    summary.produced += 1;
                    summary.bytes_warmed += data.len() as u64;
                }
                Ok(None) => {
                    // Production failure; already logged by get_reduced.
                    summary.failed += 1;
                }
                Err(PipelineError::Cancelled) => {
                    summary.cancelled = true;
                    info!(
                        warmed = summary.already_cached + summary.produced,
                        "warm-up cancelled"
                    );
                    return summary;
                }
                Err(err) => {
                    summary.failed += 1;
                    warn!(name = entry.display_name(), error = %err, "warm-up entry failed");
                }
            }

            let fraction = tracker.advance(entry);
            if let Some(tx) = progress {
                tx.send_replace(fraction);
            }
        }

        summary.left_unwarmed = summary.total - tracker.processed_count;
        if summary.left_unwarmed > 0 {
            debug!(
                left = summary.left_unwarmed,
                "budget spent, remaining entries load lazily"
            );
        }

        if let Some(tx) = progress {
            tx.send_replace(1.0);
        }

        info!(
            already_cached = summary.already_cached,
            produced = summary.produced,
            ineligible = summary.ineligible,
            failed = summary.failed,
            left_unwarmed = summary.left_unwarmed,
            bytes = %format_size(summary.bytes_warmed),
            "warm-up complete"
        );
        summary
    }
}
