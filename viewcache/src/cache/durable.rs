//! Durable tier contract and the on-disk adapter.
//!
//! The pipeline only depends on the narrow [`DurableCache`] get/set/remove
//! contract; the adapter below is deliberately thin. Entries are stored one
//! file per key with an expiry header, so a reader can decide staleness
//! without any shared index:
//!
//! ```text
//! {directory}/{key}.bin
//!   bytes 0..8   expiry, unix milliseconds, little-endian
//!   bytes 8..    payload
//! ```

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::types::{CacheError, CacheKey};
use crate::time::unix_millis_now;

const EXPIRY_HEADER_LEN: usize = 8;

/// Persistent key/value store with per-entry TTL semantics.
///
/// Implementations must be safe to call from any worker thread. `get`
/// returns `None` for both absent and expired entries; expiry is an
/// implementation detail of the store.
pub trait DurableCache: Send + Sync + 'static {
    fn get(
        &self,
        key: &CacheKey,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, CacheError>> + Send;

    fn set(
        &self,
        key: &CacheKey,
        data: &[u8],
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn remove(
        &self,
        key: &CacheKey,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;
}

/// File-per-key durable store.
pub struct DiskCache {
    directory: PathBuf,
}

impl DiskCache {
    /// Open (and create if needed) a disk store rooted at `directory`.
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory).await?;
        Ok(Self { directory })
    }

    /// Platform cache directory for this crate's durable tier.
    pub fn default_directory() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("viewcache")
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Delete every entry whose expiry has passed.
    ///
    /// Reads only each file's header. Returns the number of files removed.
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = unix_millis_now();
        let mut removed = 0usize;
        let mut dir = tokio::fs::read_dir(&self.directory).await?;

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().map(|e| e != "bin").unwrap_or(true) {
                continue;
            }

            let mut file = match tokio::fs::File::open(&path).await {
                Ok(f) => f,
                Err(_) => continue,
            };
            let mut header = [0u8; EXPIRY_HEADER_LEN];
            if file.read_exact(&mut header).await.is_err() {
                continue;
            }
            drop(file);

            if u64::from_le_bytes(header) <= now && tokio::fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, dir = %self.directory.display(), "purged expired durable entries");
        }
        Ok(removed)
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.directory.join(format!("{key}.bin"))
    }
}

impl DurableCache for DiskCache {
    fn get(
        &self,
        key: &CacheKey,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, CacheError>> + Send {
        async move {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }

            let path = self.entry_path(key);
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(CacheError::Io(e)),
            };

            if raw.len() < EXPIRY_HEADER_LEN {
                warn!(key = %key, "durable entry truncated, discarding");
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(None);
            }

            let mut header = [0u8; EXPIRY_HEADER_LEN];
            header.copy_from_slice(&raw[..EXPIRY_HEADER_LEN]);
            if u64::from_le_bytes(header) <= unix_millis_now() {
                debug!(key = %key, "durable entry expired, discarding");
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(None);
            }

            Ok(Some(raw[EXPIRY_HEADER_LEN..].to_vec()))
        }
    }

    fn set(
        &self,
        key: &CacheKey,
        data: &[u8],
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), CacheError>> + Send {
        async move {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }

            let expires_at = unix_millis_now().saturating_add(ttl.as_millis() as u64);
            let mut buf = Vec::with_capacity(EXPIRY_HEADER_LEN + data.len());
            buf.extend_from_slice(&expires_at.to_le_bytes());
            buf.extend_from_slice(data);

            // Write-then-rename so a concurrent reader never sees a torn entry.
            let path = self.entry_path(key);
            let staging = path.with_extension("tmp");
            tokio::fs::write(&staging, &buf).await?;
            tokio::fs::rename(&staging, &path).await?;
            Ok(())
        }
    }

    fn remove(
        &self,
        key: &CacheKey,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), CacheError>> + Send {
        async move {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }

            match tokio::fs::remove_file(self.entry_path(key)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(CacheError::Io(e)),
            }
        }
    }
}

/// Durable store that never persists anything.
///
/// Always misses and accepts writes without storing. Stands in when no
/// durable tier is configured, and keeps tests free of filesystem setup.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpDurableCache;

impl NoOpDurableCache {
    pub fn new() -> Self {
        Self
    }
}

impl DurableCache for NoOpDurableCache {
    fn get(
        &self,
        _key: &CacheKey,
        _cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, CacheError>> + Send {
        std::future::ready(Ok(None))
    }

    fn set(
        &self,
        _key: &CacheKey,
        _data: &[u8],
        _ttl: Duration,
        _cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), CacheError>> + Send {
        std::future::ready(Ok(()))
    }

    fn remove(
        &self,
        _key: &CacheKey,
        _cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), CacheError>> + Send {
        std::future::ready(Ok(()))
    }
}
