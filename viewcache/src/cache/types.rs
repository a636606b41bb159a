//! Core types for the cache tiers.

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Suffix appended to a reduced-variant key to address the original variant.
pub const ORIGINAL_KEY_SUFFIX: &str = "-orig";

/// Cache key uniquely identifying a (source file, variant) pair.
///
/// Derived from the source file's identity fingerprint: absolute path,
/// modification token, and byte length. Any change to the underlying file
/// yields a new key, so stale entries for the old fingerprint simply age out
/// instead of requiring explicit invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the reduced-variant key for a source file fingerprint.
    ///
    /// The key is the lowercase hex encoding of the first 16 bytes of a
    /// SHA-256 digest over the path, byte length, and modification token.
    pub fn derive(path: &Path, mtime_token: u64, byte_len: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(byte_len.to_le_bytes());
        hasher.update(mtime_token.to_le_bytes());
        let digest = hasher.finalize();

        let key = digest[..16]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>();
        Self(key)
    }

    /// The key addressing the original-quality variant of the same source.
    pub fn original(&self) -> Self {
        Self(format!("{}{ORIGINAL_KEY_SUFFIX}", self.0))
    }

    /// Whether this key addresses an original-quality variant.
    pub fn is_original(&self) -> bool {
        self.0.ends_with(ORIGINAL_KEY_SUFFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which variant of a source image a payload represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    /// Reduced variant sized to a target viewport.
    Reduced,
    /// Original-quality variant.
    Original,
}

impl VariantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reduced => "reduced",
            Self::Original => "original",
        }
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which path actually served a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// Fresh hit in the in-memory tier.
    Memory,
    /// Back-stop hit in the durable tier.
    Durable,
    /// Freshly produced by the variant producer.
    Producer,
    /// Stale value served from the fail-safe window after a failed refresh.
    FailSafe,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Durable => "durable",
            Self::Producer => "producer",
            Self::FailSafe => "fail-safe",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-entry lifetime policy for the cache tiers.
///
/// A value is fresh for `ttl` plus a uniformly random extension in
/// `[0, jitter)`; the jitter spreads expiry so a batch of entries written
/// together does not expire together. After freshness ends, a value with a
/// `fail_safe` window remains servable for that long while refreshes are
/// attempted. `durable_ttl` controls propagation to the durable tier;
/// `None` means the entry is never persisted there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPolicy {
    pub ttl: Duration,
    pub jitter: Duration,
    pub fail_safe: Option<Duration>,
    pub durable_ttl: Option<Duration>,
}

impl EntryPolicy {
    /// Policy preset for reduced variants: long-lived, fail-safe enabled,
    /// persisted durably.
    pub fn reduced() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            jitter: Duration::from_secs(2 * 60),
            fail_safe: Some(Duration::from_secs(2 * 60 * 60)),
            durable_ttl: Some(Duration::from_secs(14 * 24 * 60 * 60)),
        }
    }

    /// Policy preset for original variants: short-lived, no fail-safe, and
    /// never persisted durably (originals are large and cheap to reload).
    pub fn original() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            jitter: Duration::from_secs(30),
            fail_safe: None,
            durable_ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_fail_safe(mut self, fail_safe: Option<Duration>) -> Self {
        self.fail_safe = fail_safe;
        self
    }

    pub fn with_durable_ttl(mut self, durable_ttl: Option<Duration>) -> Self {
        self.durable_ttl = durable_ttl;
        self
    }
}

/// Cache-tier errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O failure in the durable tier.
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was cancelled. Never logged as an error.
    #[error("operation cancelled")]
    Cancelled,

    /// The variant producer failed.
    #[error("production failed: {0}")]
    Production(String),

    /// A payload's image header could not be read.
    #[error("metadata probe failed: {0}")]
    Metadata(String),
}

impl CacheError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn same_fingerprint_same_key() {
        let path = PathBuf::from("/g/a.png");
        let a = CacheKey::derive(&path, 1_000, 2_000_000);
        let b = CacheKey::derive(&path, 1_000, 2_000_000);
        assert_eq!(a, b);
    }

    #[test]
    fn any_field_change_changes_key() {
        let path = PathBuf::from("/g/a.png");
        let base = CacheKey::derive(&path, 1_000, 2_000_000);

        let other_path = CacheKey::derive(&PathBuf::from("/g/b.png"), 1_000, 2_000_000);
        let other_mtime = CacheKey::derive(&path, 1_001, 2_000_000);
        let other_len = CacheKey::derive(&path, 1_000, 2_000_001);

        assert_ne!(base, other_path);
        assert_ne!(base, other_mtime);
        assert_ne!(base, other_len);
    }

    #[test]
    fn key_is_hex_of_16_bytes() {
        let key = CacheKey::derive(&PathBuf::from("/g/a.png"), 1, 2);
        assert_eq!(key.as_str().len(), 32);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn original_key_appends_suffix() {
        let key = CacheKey::derive(&PathBuf::from("/g/a.png"), 1, 2);
        let original = key.original();

        assert!(original.as_str().starts_with(key.as_str()));
        assert!(original.as_str().ends_with(ORIGINAL_KEY_SUFFIX));
        assert!(original.is_original());
        assert!(!key.is_original());
        assert_ne!(key, original);
    }

    #[test]
    fn original_key_is_deterministic() {
        let path = PathBuf::from("/g/a.png");
        let a = CacheKey::derive(&path, 7, 8).original();
        let b = CacheKey::derive(&path, 7, 8).original();
        assert_eq!(a, b);
    }

    #[test]
    fn reduced_policy_persists_durably() {
        let policy = EntryPolicy::reduced();
        assert!(policy.fail_safe.is_some());
        assert!(policy.durable_ttl.is_some());
    }

    #[test]
    fn original_policy_stays_in_memory() {
        let policy = EntryPolicy::original();
        assert!(policy.fail_safe.is_none());
        assert!(policy.durable_ttl.is_none());
        assert!(policy.ttl < EntryPolicy::reduced().ttl);
    }

    #[test]
    fn policy_builders_override_fields() {
        let policy = EntryPolicy::reduced()
            .with_ttl(Duration::from_secs(1))
            .with_jitter(Duration::ZERO)
            .with_fail_safe(None)
            .with_durable_ttl(None);

        assert_eq!(policy.ttl, Duration::from_secs(1));
        assert_eq!(policy.jitter, Duration::ZERO);
        assert!(policy.fail_safe.is_none());
        assert!(policy.durable_ttl.is_none());
    }

    #[test]
    fn cancelled_error_is_distinguishable() {
        assert!(CacheError::Cancelled.is_cancelled());
        assert!(!CacheError::Production("boom".into()).is_cancelled());
    }

    #[test]
    fn data_source_labels() {
        assert_eq!(DataSource::Memory.as_str(), "memory");
        assert_eq!(DataSource::FailSafe.as_str(), "fail-safe");
        assert_eq!(format!("{}", DataSource::Durable), "durable");
    }

    #[test]
    fn variant_kind_labels() {
        assert_eq!(VariantKind::Reduced.as_str(), "reduced");
        assert_eq!(format!("{}", VariantKind::Original), "original");
    }
}
