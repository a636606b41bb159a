//! Image metadata side-index.
//!
//! Dimensions and resolution are computed at most once per distinct payload
//! and memoized under the payload's cache key. The index is never invalidated:
//! keys are derived from immutable source-file fingerprints, so metadata for a
//! changed file lives under a new key and the old entry simply goes unused.

use dashmap::DashMap;
use std::io::Cursor;
use thiserror::Error;

use crate::cache::CacheKey;

/// Default resolution hint when the payload carries none.
pub const DEFAULT_DPI: f32 = 96.0;

/// Dimensions and resolution of a decoded image payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub dpi: f32,
}

impl ImageMetadata {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            dpi: DEFAULT_DPI,
        }
    }

    pub fn with_dpi(mut self, dpi: f32) -> Self {
        self.dpi = dpi;
        self
    }
}

/// Error probing a payload's image header.
#[derive(Debug, Error)]
#[error("unrecognized image payload: {0}")]
pub struct MetadataError(String);

/// Concurrent map from cache key to derived metadata.
///
/// Safe for concurrent read/write from arbitrary worker threads.
pub struct MetadataIndex {
    entries: DashMap<CacheKey, ImageMetadata>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Look up memoized metadata for a key.
    pub fn get(&self, key: &CacheKey) -> Option<ImageMetadata> {
        self.entries.get(key).map(|e| *e)
    }

    /// Memoize producer-supplied metadata if the key is not yet present.
    pub fn record(&self, key: CacheKey, metadata: ImageMetadata) {
        self.entries.entry(key).or_insert(metadata);
    }

    /// Return the memoized metadata for `key`, probing the payload's header
    /// for dimensions if absent.
    ///
    /// The probe reads only enough of the byte stream to identify the format
    /// and dimensions; it never decodes pixel data.
    pub fn ensure(&self, key: &CacheKey, bytes: &[u8]) -> Result<ImageMetadata, MetadataError> {
        if let Some(existing) = self.get(key) {
            return Ok(existing);
        }

        let (width, height) = probe_dimensions(bytes)?;
        let metadata = ImageMetadata::new(width, height);
        self.record(key.clone(), metadata);
        Ok(metadata)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MetadataIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32), MetadataError> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| MetadataError(e.to_string()))?;
    reader
        .into_dimensions()
        .map_err(|e| MetadataError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_key(n: u64) -> CacheKey {
        CacheKey::derive(&PathBuf::from("/photos/a.png"), n, 1_000)
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn ensure_probes_dimensions_from_payload() {
        let index = MetadataIndex::new();
        let key = test_key(1);

        let metadata = index.ensure(&key, &png_bytes(6, 4)).unwrap();
        assert_eq!(metadata.width, 6);
        assert_eq!(metadata.height, 4);
        assert_eq!(metadata.dpi, DEFAULT_DPI);
    }

    #[test]
    fn ensure_memoizes_per_key() {
        let index = MetadataIndex::new();
        let key = test_key(1);

        index.ensure(&key, &png_bytes(6, 4)).unwrap();
        assert_eq!(index.len(), 1);

        // Second call returns the memoized value without touching the bytes;
        // garbage input proves the probe did not run again.
        let metadata = index.ensure(&key, b"not an image").unwrap();
        assert_eq!(metadata.width, 6);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn ensure_rejects_unrecognized_payload() {
        let index = MetadataIndex::new();
        let key = test_key(1);

        let result = index.ensure(&key, &[0u8; 16]);
        assert!(result.is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn record_keeps_first_value() {
        let index = MetadataIndex::new();
        let key = test_key(1);

        index.record(key.clone(), ImageMetadata::new(100, 50));
        index.record(key.clone(), ImageMetadata::new(999, 999));

        let metadata = index.get(&key).unwrap();
        assert_eq!(metadata.width, 100);
        assert_eq!(metadata.height, 50);
    }

    #[test]
    fn distinct_keys_are_independent() {
        let index = MetadataIndex::new();
        index.record(test_key(1), ImageMetadata::new(1, 1));
        index.record(test_key(2), ImageMetadata::new(2, 2));

        assert_eq!(index.len(), 2);
        assert_eq!(index.get(&test_key(1)).unwrap().width, 1);
        assert_eq!(index.get(&test_key(2)).unwrap().width, 2);
        assert!(index.get(&test_key(3)).is_none());
    }

    #[test]
    fn dpi_override() {
        let metadata = ImageMetadata::new(8, 8).with_dpi(300.0);
        assert_eq!(metadata.dpi, 300.0);
    }
}
