//! Pipeline configuration.

use std::time::Duration;

use crate::cache::EntryPolicy;
use crate::source::EligibilityPolicy;

/// Default byte budget for one warm-up pass.
pub const DEFAULT_WARMUP_BUDGET_BYTES: u64 = 256 * 1024 * 1024;

/// Default interval between janitor sweeps of the fast tier.
pub const DEFAULT_JANITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Complete pipeline configuration.
///
/// # Example
///
/// ```
/// use viewcache::config::PipelineConfig;
///
/// let config = PipelineConfig::default()
///     .with_warmup_budget(64 * 1024 * 1024)
///     .with_janitor_interval(std::time::Duration::from_secs(30));
/// assert_eq!(config.warmup_budget_bytes, 64 * 1024 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Lifetime policy for reduced-variant entries.
    pub reduced_policy: EntryPolicy,
    /// Lifetime policy for original-variant entries.
    pub original_policy: EntryPolicy,
    /// Which entries qualify for the durable tier.
    pub eligibility: EligibilityPolicy,
    /// Byte budget for one warm-up pass.
    pub warmup_budget_bytes: u64,
    /// Interval between janitor sweeps.
    pub janitor_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reduced_policy: EntryPolicy::reduced(),
            original_policy: EntryPolicy::original(),
            eligibility: EligibilityPolicy::default(),
            warmup_budget_bytes: DEFAULT_WARMUP_BUDGET_BYTES,
            janitor_interval: DEFAULT_JANITOR_INTERVAL,
        }
    }
}

impl PipelineConfig {
    pub fn with_reduced_policy(mut self, policy: EntryPolicy) -> Self {
        self.reduced_policy = policy;
        self
    }

    pub fn with_original_policy(mut self, policy: EntryPolicy) -> Self {
        self.original_policy = policy;
        self
    }

    pub fn with_eligibility(mut self, policy: EligibilityPolicy) -> Self {
        self.eligibility = policy;
        self
    }

    pub fn with_warmup_budget(mut self, bytes: u64) -> Self {
        self.warmup_budget_bytes = bytes;
        self
    }

    pub fn with_janitor_interval(mut self, interval: Duration) -> Self {
        self.janitor_interval = interval;
        self
    }
}

/// Format a byte count as a human-readable string.
///
/// # Examples
///
/// ```
/// use viewcache::config::format_size;
///
/// assert_eq!(format_size(1024), "1KB");
/// assert_eq!(format_size(256 * 1024 * 1024), "256MB");
/// assert_eq!(format_size(500), "500");
/// ```
pub fn format_size(bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;
    const KB: u64 = 1024;

    if bytes >= GB && bytes % GB == 0 {
        format!("{}GB", bytes / GB)
    } else if bytes >= MB && bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else if bytes >= KB && bytes % KB == 0 {
        format!("{}KB", bytes / KB)
    } else {
        format!("{bytes}")
    }
}
