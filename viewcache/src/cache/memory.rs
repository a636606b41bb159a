//! In-memory fast tier with bounded lifetimes and single-flight population.
//!
//! When multiple callers request the same key simultaneously, only one
//! production runs - all other waiters receive the same result:
//!
//! ```text
//! Request A ─┐
//!            │                         Variant
//! Request B ─┼──► MemoryCache ───────► Producer
//!            │        │                   │
//! Request C ─┘        │                   │
//!                     ▼                   ▼
//!               [A, B, C all          [One task]
//!                receive same             │
//!                result]◄────────────────┘
//! ```
//!
//! The in-flight registry is a `DashMap` of key to broadcast sender. The
//! first caller for a key becomes the leader and runs the producer; later
//! callers subscribe and await the broadcast. A leader that unwinds without
//! a result (cancellation) drops its registry entry, closing the channel so
//! waiters re-race for leadership.
//!
//! Entries carry a jittered freshness deadline and, optionally, a fail-safe
//! horizon: past freshness but inside the fail-safe window the stale value
//! remains servable, and a failed refresh degrades to it instead of erroring.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cache::stats::CacheStats;
use crate::cache::types::{CacheError, CacheKey, DataSource, EntryPolicy};
use crate::producer::VariantPayload;

type FlightMessage = Result<(Arc<VariantPayload>, DataSource), Arc<CacheError>>;

/// Capacity of the per-key result channel. A single message is ever sent;
/// the capacity only needs to be nonzero.
const FLIGHT_CHANNEL_CAPACITY: usize = 8;

struct StoredEntry {
    payload: Arc<VariantPayload>,
    fresh_until: Instant,
    /// Last instant the entry may still be served; equals `fresh_until`
    /// when the policy has no fail-safe window.
    stale_until: Instant,
}

impl StoredEntry {
    fn new(payload: Arc<VariantPayload>, policy: &EntryPolicy) -> Self {
        let fresh_until = Instant::now() + policy.ttl + jitter_extension(policy.jitter);
        let stale_until = fresh_until + policy.fail_safe.unwrap_or_default();
        Self {
            payload,
            fresh_until,
            stale_until,
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        now < self.fresh_until
    }

    fn is_servable(&self, now: Instant) -> bool {
        now < self.stale_until
    }
}

fn jitter_extension(jitter: Duration) -> Duration {
    let millis = jitter.as_millis() as u64;
    if millis == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(rand::rng().random_range(0..millis))
    }
}

enum Flight {
    /// This caller starts the production and broadcasts the outcome.
    Leader(broadcast::Sender<FlightMessage>),
    /// Another production is in flight; await its broadcast.
    Coalesced(broadcast::Receiver<FlightMessage>),
}

/// Removes the in-flight registration when the leader finishes or unwinds.
struct FlightGuard<'a> {
    cache: &'a MemoryCache,
    key: CacheKey,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.cache.in_flight.remove(&self.key);
    }
}

/// In-memory fast tier for variant payloads.
///
/// Safe for concurrent use from arbitrary worker threads; lookups never
/// block production for other keys.
pub struct MemoryCache {
    entries: DashMap<CacheKey, StoredEntry>,
    in_flight: DashMap<CacheKey, broadcast::Sender<FlightMessage>>,
    stats: Arc<CacheStats>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Shared handle to the tier's counters.
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Look up a servable value without producing.
    ///
    /// Returns fresh values and stale values still inside their fail-safe
    /// window; entries past their last servable horizon are dropped.
    pub fn try_get(&self, key: &CacheKey) -> Option<Arc<VariantPayload>> {
        let now = Instant::now();
        let (payload, expired) = match self.entries.get(key) {
            Some(entry) if entry.is_servable(now) => (Some(entry.payload.clone()), false),
            Some(_) => (None, true),
            None => (None, false),
        };

        if expired {
            self.entries.remove(key);
        }

        match payload {
            Some(p) => {
                self.stats.record_memory_hit();
                Some(p)
            }
            None => {
                self.stats.record_memory_miss();
                None
            }
        }
    }

    /// Store a value under the given policy.
    pub fn set(&self, key: CacheKey, payload: impl Into<Arc<VariantPayload>>, policy: &EntryPolicy) {
        self.entries
            .insert(key, StoredEntry::new(payload.into(), policy));
    }

    /// Fetch the value for `key`, producing it at most once across all
    /// concurrent callers.
    ///
    /// A fresh value is returned immediately. Otherwise the first caller runs
    /// `produce` and every concurrent caller for the same key awaits that one
    /// production. On producer failure, a stale value inside its fail-safe
    /// window is served instead of the error.
    pub async fn get_or_produce<F, Fut>(
        &self,
        key: &CacheKey,
        policy: &EntryPolicy,
        cancel: &CancellationToken,
        produce: F,
    ) -> Result<(Arc<VariantPayload>, DataSource), CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(VariantPayload, DataSource), CacheError>>,
    {
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        if let Some(payload) = self.get_fresh(key) {
            self.stats.record_memory_hit();
            return Ok((payload, DataSource::Memory));
        }
        self.stats.record_memory_miss();

        let mut produce = Some(produce);
        loop {
            match self.begin_flight(key) {
                Flight::Leader(tx) => {
                    let guard = FlightGuard {
                        cache: self,
                        key: key.clone(),
                    };

                    // Another leader may have completed between our lookup
                    // and registration.
                    if let Some(payload) = self.get_fresh(key) {
                        drop(guard);
                        return Ok((payload, DataSource::Memory));
                    }

                    let produce = produce
                        .take()
                        .ok_or_else(|| CacheError::Production("producer already consumed".into()))?;

                    return match produce().await {
                        Ok((payload, source)) => {
                            let payload = Arc::new(payload);
                            self.set(key.clone(), payload.clone(), policy);
                            self.stats.record_production();
                            let _ = tx.send(Ok((payload.clone(), source)));
                            drop(guard);
                            Ok((payload, source))
                        }
                        Err(CacheError::Cancelled) => {
                            // Unwind without completing the write; the guard
                            // closes the channel and waiters re-race.
                            drop(guard);
                            Err(CacheError::Cancelled)
                        }
                        Err(err) => {
                            self.stats.record_production_failure();
                            let shared = Arc::new(err);
                            let _ = tx.send(Err(shared.clone()));
                            drop(guard);
                            self.serve_stale_or(key, shared)
                        }
                    };
                }
                Flight::Coalesced(mut rx) => {
                    self.stats.record_coalesced_wait();
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(CacheError::Cancelled),
                        msg = rx.recv() => match msg {
                            Ok(Ok((payload, source))) => return Ok((payload, source)),
                            Ok(Err(shared)) => return self.serve_stale_or(key, shared),
                            Err(broadcast::error::RecvError::Closed) => {
                                // The leader unwound, or completed before we
                                // subscribed; check the map, then race again.
                                if let Some(payload) = self.get_fresh(key) {
                                    return Ok((payload, DataSource::Memory));
                                }
                                continue;
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        },
                    }
                }
            }
        }
    }

    /// Drop every entry past its last servable horizon.
    ///
    /// Returns the number of entries removed. Called periodically by the
    /// janitor.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_servable(now));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    fn get_fresh(&self, key: &CacheKey) -> Option<Arc<VariantPayload>> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.payload.clone())
    }

    fn begin_flight(&self, key: &CacheKey) -> Flight {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(occupied) => Flight::Coalesced(occupied.get().subscribe()),
            Entry::Vacant(vacant) => {
                let (tx, _rx) = broadcast::channel(FLIGHT_CHANNEL_CAPACITY);
                vacant.insert(tx.clone());
                Flight::Leader(tx)
            }
        }
    }

    /// Degrade to the stale value if one is still inside its fail-safe
    /// window; otherwise surface the production failure.
    fn serve_stale_or(
        &self,
        key: &CacheKey,
        shared: Arc<CacheError>,
    ) -> Result<(Arc<VariantPayload>, DataSource), CacheError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_servable(now) {
                self.stats.record_stale_served();
                warn!(key = %key, error = %shared, "refresh failed, serving stale value");
                return Ok((entry.payload.clone(), DataSource::FailSafe));
            }
        }

        Err(match Arc::try_unwrap(shared) {
            Ok(err) => err,
            Err(arc) => CacheError::Production(arc.to_string()),
        })
    }

    #[cfg(test)]
    fn entry_horizons(&self, key: &CacheKey) -> Option<(Instant, Instant)> {
        self.entries
            .get(key)
            .map(|entry| (entry.fresh_until, entry.stale_until))
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ImageMetadata;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    fn test_key(n: u64) -> CacheKey {
        CacheKey::derive(&PathBuf::from("/photos/a.png"), n, 2_000_000)
    }

    fn test_payload(fill: u8, len: usize) -> VariantPayload {
        VariantPayload::new(vec![fill; len], ImageMetadata::new(64, 48))
    }

    fn immediate_policy() -> EntryPolicy {
        EntryPolicy::reduced()
            .with_ttl(Duration::from_secs(60))
            .with_jitter(Duration::ZERO)
    }

    fn expired_policy(fail_safe: Option<Duration>) -> EntryPolicy {
        EntryPolicy::reduced()
            .with_ttl(Duration::ZERO)
            .with_jitter(Duration::ZERO)
            .with_fail_safe(fail_safe)
    }

    #[test]
    fn try_get_miss_on_empty() {
        let cache = MemoryCache::new();
        assert!(cache.try_get(&test_key(1)).is_none());
        assert_eq!(cache.stats().snapshot().memory_misses, 1);
    }

    #[test]
    fn set_then_try_get_hits() {
        let cache = MemoryCache::new();
        let key = test_key(1);
        cache.set(key.clone(), test_payload(1, 5), &immediate_policy());

        let payload = cache.try_get(&key).unwrap();
        assert_eq!(payload.bytes.as_slice(), &[1u8; 5]);
        assert_eq!(cache.stats().snapshot().memory_hits, 1);
    }

    #[test]
    fn expired_entry_without_fail_safe_is_dropped() {
        let cache = MemoryCache::new();
        let key = test_key(1);
        cache.set(key.clone(), test_payload(1, 5), &expired_policy(None));

        assert!(cache.try_get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn stale_entry_inside_fail_safe_window_is_servable() {
        let cache = MemoryCache::new();
        let key = test_key(1);
        cache.set(
            key.clone(),
            test_payload(7, 3),
            &expired_policy(Some(Duration::from_secs(60))),
        );

        let payload = cache.try_get(&key).unwrap();
        assert_eq!(payload.bytes.as_slice(), &[7u8; 3]);
    }

    #[test]
    fn jittered_freshness_stays_within_bounds() {
        let cache = MemoryCache::new();
        let key = test_key(1);
        let policy = EntryPolicy::reduced()
            .with_ttl(Duration::from_secs(100))
            .with_jitter(Duration::from_secs(50))
            .with_fail_safe(Some(Duration::from_secs(10)));

        let before = Instant::now();
        cache.set(key.clone(), test_payload(1, 1), &policy);
        let (fresh_until, stale_until) = cache.entry_horizons(&key).unwrap();

        let lifetime = fresh_until - before;
        assert!(lifetime >= Duration::from_secs(100));
        assert!(lifetime < Duration::from_secs(151));
        assert_eq!(stale_until - fresh_until, Duration::from_secs(10));
    }

    #[test]
    fn sweep_drops_only_entries_past_stale_horizon() {
        let cache = MemoryCache::new();
        cache.set(test_key(1), test_payload(1, 1), &immediate_policy());
        cache.set(test_key(2), test_payload(2, 1), &expired_policy(None));
        cache.set(
            test_key(3),
            test_payload(3, 1),
            &expired_policy(Some(Duration::from_secs(60))),
        );

        let swept = cache.sweep_expired();
        assert_eq!(swept, 1);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn get_or_produce_populates_then_hits() {
        let cache = MemoryCache::new();
        let key = test_key(1);
        let cancel = CancellationToken::new();
        let policy = immediate_policy();

        let (payload, source) = cache
            .get_or_produce(&key, &policy, &cancel, || async {
                Ok((test_payload(9, 4), DataSource::Producer))
            })
            .await
            .unwrap();
        assert_eq!(source, DataSource::Producer);
        assert_eq!(payload.bytes.as_slice(), &[9u8; 4]);

        let (payload, source) = cache
            .get_or_produce(&key, &policy, &cancel, || async {
                panic!("producer must not run on a fresh hit")
            })
            .await
            .unwrap();
        assert_eq!(source, DataSource::Memory);
        assert_eq!(payload.bytes.as_slice(), &[9u8; 4]);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let cache = MemoryCache::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = cache
            .get_or_produce(&test_key(1), &immediate_policy(), &cancel, || async {
                panic!("producer must not run when cancelled")
            })
            .await;
        assert!(matches!(result, Err(CacheError::Cancelled)));
    }

    #[tokio::test]
    async fn producer_failure_without_stale_value_errors() {
        let cache = MemoryCache::new();
        let cancel = CancellationToken::new();

        let result = cache
            .get_or_produce(&test_key(1), &immediate_policy(), &cancel, || async {
                Err(CacheError::Production("decoder exploded".into()))
            })
            .await;

        assert!(matches!(result, Err(CacheError::Production(m)) if m.contains("decoder exploded")));
        assert_eq!(cache.stats().snapshot().production_failures, 1);
    }

    #[tokio::test]
    async fn producer_failure_degrades_to_stale_value() {
        let cache = MemoryCache::new();
        let key = test_key(1);
        let cancel = CancellationToken::new();
        let policy = expired_policy(Some(Duration::from_secs(60)));

        cache.set(key.clone(), test_payload(5, 2), &policy);

        let (payload, source) = cache
            .get_or_produce(&key, &policy, &cancel, || async {
                Err(CacheError::Production("transient".into()))
            })
            .await
            .unwrap();

        assert_eq!(source, DataSource::FailSafe);
        assert_eq!(payload.bytes.as_slice(), &[5u8; 2]);
        assert_eq!(cache.stats().snapshot().stale_served, 1);
    }

    #[tokio::test]
    async fn stale_entry_triggers_refresh_production() {
        let cache = MemoryCache::new();
        let key = test_key(1);
        let cancel = CancellationToken::new();
        let policy = expired_policy(Some(Duration::from_secs(60)));

        cache.set(key.clone(), test_payload(1, 1), &policy);

        let (payload, source) = cache
            .get_or_produce(&key, &policy, &cancel, || async {
                Ok((test_payload(2, 1), DataSource::Producer))
            })
            .await
            .unwrap();

        assert_eq!(source, DataSource::Producer);
        assert_eq!(payload.bytes.as_slice(), &[2u8; 1]);
    }

    #[tokio::test]
    async fn concurrent_calls_share_one_production() {
        let cache = Arc::new(MemoryCache::new());
        let key = test_key(1);
        let cancel = CancellationToken::new();
        let policy = immediate_policy();
        let productions = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            let cancel = cancel.clone();
            let productions = Arc::clone(&productions);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_produce(&key, &policy, &cancel, move || async move {
                        productions.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(50)).await;
                        Ok((test_payload(3, 8), DataSource::Producer))
                    })
                    .await
            }));
        }

        let results = futures::future::join_all(handles).await;
        for result in results {
            let (payload, _) = result.unwrap().unwrap();
            assert_eq!(payload.bytes.as_slice(), &[3u8; 8]);
        }
        assert_eq!(productions.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().snapshot().productions, 1);
    }

    #[tokio::test]
    async fn waiters_observe_shared_failure() {
        let cache = Arc::new(MemoryCache::new());
        let key = test_key(1);
        let cancel = CancellationToken::new();
        let policy = immediate_policy();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_produce(&key, &policy, &cancel, move || async move {
                        sleep(Duration::from_millis(30)).await;
                        Err(CacheError::Production("shared failure".into()))
                    })
                    .await
            }));
        }

        let results = futures::future::join_all(handles).await;
        for result in results {
            assert!(matches!(
                result.unwrap(),
                Err(CacheError::Production(m)) if m.contains("shared failure")
            ));
        }
        // Only the leader runs the producer, so exactly one failure recorded.
        assert_eq!(cache.stats().snapshot().production_failures, 1);
    }

    #[tokio::test]
    async fn clear_empties_the_tier() {
        let cache = MemoryCache::new();
        cache.set(test_key(1), test_payload(1, 1), &immediate_policy());
        cache.set(test_key(2), test_payload(2, 1), &immediate_policy());
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }
}
