//! Source file identity and discovery.
//!
//! A [`SourceEntry`] is the immutable fingerprint of one source image file,
//! created once per scan. A fresh scan produces fresh entries; nothing
//! mutates an existing entry, so the derived cache key stays stable for the
//! entry's whole lifetime.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::CacheKey;
use crate::time::mtime_token;

/// Formats that need a specialized decoder and always qualify for the
/// durable tier regardless of size.
pub const DEFAULT_SPECIAL_EXTENSIONS: &[&str] = &[
    "psd", "tif", "tiff", "heic", "heif", "avif", "cr2", "nef", "arw",
];

/// Default size threshold for durable-tier eligibility of common formats.
pub const DEFAULT_MIN_DISK_CACHE_BYTES: u64 = 1024 * 1024;

/// Decides which entries qualify for the durable tier.
///
/// Small common-format files decode faster than a disk round-trip, so only
/// large files and special formats are worth persisting.
#[derive(Debug, Clone)]
pub struct EligibilityPolicy {
    pub min_disk_cache_bytes: u64,
    special_extensions: Vec<String>,
}

impl EligibilityPolicy {
    pub fn new(min_disk_cache_bytes: u64) -> Self {
        Self {
            min_disk_cache_bytes,
            special_extensions: DEFAULT_SPECIAL_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn with_special_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.special_extensions = extensions
            .into_iter()
            .map(|s| s.into().to_lowercase())
            .collect();
        self
    }

    /// Whether the (normalized) extension needs a specialized decoder.
    pub fn is_special(&self, extension: &str) -> bool {
        self.special_extensions.iter().any(|e| e == extension)
    }

    /// Whether a file with this extension and size qualifies for the
    /// durable tier.
    pub fn is_eligible(&self, extension: &str, byte_len: u64) -> bool {
        self.is_special(extension) || byte_len >= self.min_disk_cache_bytes
    }
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DISK_CACHE_BYTES)
    }
}

/// Immutable identity of a source image file.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    path: PathBuf,
    display_name: String,
    mtime_token: u64,
    byte_len: u64,
    extension: String,
    cache_key: CacheKey,
    requires_special_decoding: bool,
    disk_cache_eligible: bool,
}

impl SourceEntry {
    /// Build an entry from a file's identity fingerprint.
    pub fn new(
        path: impl Into<PathBuf>,
        mtime: SystemTime,
        byte_len: u64,
        policy: &EligibilityPolicy,
    ) -> Self {
        let path = path.into();
        let mtime_token = mtime_token(mtime);
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let cache_key = CacheKey::derive(&path, mtime_token, byte_len);
        let requires_special_decoding = policy.is_special(&extension);
        let disk_cache_eligible = policy.is_eligible(&extension, byte_len);

        Self {
            path,
            display_name,
            mtime_token,
            byte_len,
            extension,
            cache_key,
            requires_special_decoding,
            disk_cache_eligible,
        }
    }

    /// Build an entry from filesystem metadata.
    pub fn from_fs(
        path: impl Into<PathBuf>,
        metadata: &std::fs::Metadata,
        policy: &EligibilityPolicy,
    ) -> Self {
        let mtime = metadata.modified().unwrap_or(UNIX_EPOCH);
        Self::new(path, mtime, metadata.len(), policy)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn mtime_token(&self) -> u64 {
        self.mtime_token
    }

    pub fn byte_len(&self) -> u64 {
        self.byte_len
    }

    /// Normalized lowercase extension without the dot; empty if none.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Key for the reduced variant; `cache_key().original()` addresses the
    /// original variant.
    pub fn cache_key(&self) -> &CacheKey {
        &self.cache_key
    }

    pub fn requires_special_decoding(&self) -> bool {
        self.requires_special_decoding
    }

    pub fn disk_cache_eligible(&self) -> bool {
        self.disk_cache_eligible
    }
}

/// Discovers source entries for warm-up.
///
/// The traversal policy belongs to the host application; the cache core only
/// consumes the resulting ordered list.
pub trait SourceScanner: Send + Sync + 'static {
    fn scan(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<SourceEntry>, io::Error>> + Send;
}

/// Flat single-directory scanner.
///
/// Skips subdirectories and unreadable files; entries come back sorted by
/// display name so warm-up order is stable across runs.
pub struct DirectoryScanner {
    root: PathBuf,
    policy: EligibilityPolicy,
}

impl DirectoryScanner {
    pub fn new(root: impl Into<PathBuf>, policy: EligibilityPolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }
}

impl SourceScanner for DirectoryScanner {
    fn scan(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<SourceEntry>, io::Error>> + Send {
        async move {
            let mut dir = tokio::fs::read_dir(&self.root).await?;
            let mut entries = Vec::new();

            while let Some(item) = dir.next_entry().await? {
                if cancel.is_cancelled() {
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "scan cancelled"));
                }

                let metadata = match item.metadata().await {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(path = %item.path().display(), error = %e, "skipping unreadable entry");
                        continue;
                    }
                };
                if !metadata.is_file() {
                    continue;
                }

                let mtime = metadata.modified().unwrap_or(UNIX_EPOCH);
                entries.push(SourceEntry::new(
                    item.path(),
                    mtime,
                    metadata.len(),
                    &self.policy,
                ));
            }

            entries.sort_by(|a, b| a.display_name().cmp(b.display_name()));
            Ok(entries)
        }
    }
}
