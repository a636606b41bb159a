//! Time-related utility functions.
//!
//! Helpers for converting filesystem timestamps into the opaque tokens used
//! by cache key derivation and the durable tier's expiry headers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Convert a filesystem modification time into an opaque token.
///
/// The token is the number of whole milliseconds since the Unix epoch.
/// Timestamps before the epoch (seen on some copied or archived files)
/// collapse to `0` rather than failing.
///
/// # Example
///
/// ```
/// use std::time::SystemTime;
/// use viewcache::time::mtime_token;
///
/// let token = mtime_token(SystemTime::now());
/// assert!(token > 0);
/// ```
pub fn mtime_token(mtime: SystemTime) -> u64 {
    mtime
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn unix_millis_now() -> u64 {
    mtime_token(SystemTime::now())
}
