//! Cache statistics tracking.
//!
//! Counters use relaxed atomics so they can be bumped from any worker thread
//! without contention; `snapshot()` captures a point-in-time copy for display.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared atomic counters for the cache tiers.
#[derive(Debug, Default)]
pub struct CacheStats {
    memory_hits: AtomicU64,
    memory_misses: AtomicU64,
    stale_served: AtomicU64,
    productions: AtomicU64,
    production_failures: AtomicU64,
    coalesced_waits: AtomicU64,
    durable_hits: AtomicU64,
    durable_misses: AtomicU64,
    durable_writes: AtomicU64,
    durable_write_failures: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_miss(&self) {
        self.memory_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_served(&self) {
        self.stale_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_production(&self) {
        self.productions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_production_failure(&self) {
        self.production_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced_wait(&self) {
        self.coalesced_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_durable_hit(&self) {
        self.durable_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_durable_miss(&self) {
        self.durable_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_durable_write(&self) {
        self.durable_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_durable_write_failure(&self) {
        self.durable_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Capture a point-in-time copy of all counters.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            memory_misses: self.memory_misses.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            productions: self.productions.load(Ordering::Relaxed),
            production_failures: self.production_failures.load(Ordering::Relaxed),
            coalesced_waits: self.coalesced_waits.load(Ordering::Relaxed),
            durable_hits: self.durable_hits.load(Ordering::Relaxed),
            durable_misses: self.durable_misses.load(Ordering::Relaxed),
            durable_writes: self.durable_writes.load(Ordering::Relaxed),
            durable_write_failures: self.durable_write_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub stale_served: u64,
    pub productions: u64,
    pub production_failures: u64,
    pub coalesced_waits: u64,
    pub durable_hits: u64,
    pub durable_misses: u64,
    pub durable_writes: u64,
    pub durable_write_failures: u64,
}

impl CacheStatsSnapshot {
    /// Memory-tier hit rate in `[0.0, 1.0]`.
    pub fn memory_hit_rate(&self) -> f64 {
        let total = self.memory_hits + self.memory_misses;
        if total == 0 {
            0.0
        } else {
            self.memory_hits as f64 / total as f64
        }
    }

    /// Durable-tier hit rate in `[0.0, 1.0]`.
    pub fn durable_hit_rate(&self) -> f64 {
        let total = self.durable_hits + self.durable_misses;
        if total == 0 {
            0.0
        } else {
            self.durable_hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "memory {}/{} ({:.1}%), durable {}/{} ({:.1}%), produced {} ({} failed), stale served {}, coalesced {}",
            self.memory_hits,
            self.memory_hits + self.memory_misses,
            self.memory_hit_rate() * 100.0,
            self.durable_hits,
            self.durable_hits + self.durable_misses,
            self.durable_hit_rate() * 100.0,
            self.productions,
            self.production_failures,
            self.stale_served,
            self.coalesced_waits,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let stats = CacheStats::new();
        let snap = stats.snapshot();
        assert_eq!(snap, CacheStatsSnapshot::default());
    }

    #[test]
    fn records_accumulate() {
        let stats = CacheStats::new();
        stats.record_memory_hit();
        stats.record_memory_hit();
        stats.record_memory_miss();
        stats.record_production();
        stats.record_durable_hit();
        stats.record_durable_write();

        let snap = stats.snapshot();
        assert_eq!(snap.memory_hits, 2);
        assert_eq!(snap.memory_misses, 1);
        assert_eq!(snap.productions, 1);
        assert_eq!(snap.durable_hits, 1);
        assert_eq!(snap.durable_writes, 1);
    }

    #[test]
    fn hit_rate_with_no_traffic_is_zero() {
        let snap = CacheStats::new().snapshot();
        assert_eq!(snap.memory_hit_rate(), 0.0);
        assert_eq!(snap.durable_hit_rate(), 0.0);
    }

    #[test]
    fn hit_rates_are_fractions() {
        let stats = CacheStats::new();
        stats.record_memory_hit();
        stats.record_memory_hit();
        stats.record_memory_hit();
        stats.record_memory_miss();

        let snap = stats.snapshot();
        assert!((snap.memory_hit_rate() - 0.75).abs() < 0.001);
    }

    #[test]
    fn display_includes_counts() {
        let stats = CacheStats::new();
        stats.record_memory_hit();
        stats.record_production();

        let line = format!("{}", stats.snapshot());
        assert!(line.contains("memory 1/1"));
        assert!(line.contains("produced 1"));
    }
}
