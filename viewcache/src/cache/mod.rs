//! Two-tier cache for encoded image variants.
//!
//! The fast in-memory tier serves repeated access with bounded lifetimes and
//! single-flight population; the durable tier is the persistent back-stop
//! consulted on fast-tier miss.

mod durable;
mod janitor;
mod memory;
mod stats;
mod types;

pub use durable::{DiskCache, DurableCache, NoOpDurableCache};
pub use janitor::CacheJanitor;
pub use memory::MemoryCache;
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use types::{
    CacheError, CacheKey, DataSource, EntryPolicy, VariantKind, ORIGINAL_KEY_SUFFIX,
};
