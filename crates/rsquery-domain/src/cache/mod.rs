//! Request cache with TTL expiry, LRU eviction and in-flight sharing.
//!
//! The cache maps a request value to the completion channel of its
//! resolution. An entry is inserted *before* the resolver runs, while its
//! channel is still pending, so concurrent lookups for the same request
//! share the in-flight channel instead of triggering a second resolver
//! call. Once the channel completes the entry is immutable; failures are
//! memoized exactly like successes.
//!
//! # Eviction
//!
//! - **TTL**: an entry is expired once `now - inserted_at >= ttl`. Expiry is
//!   lazy: an expired entry is dropped on the next lookup, no background
//!   sweep runs.
//! - **Capacity**: inserting into a full cache evicts the least recently
//!   accessed entry (a hit or an insert counts as access), whatever its
//!   completion state.
//!
//! Eviction and invalidation only remove the key → entry mapping. Callers
//! already holding the channel keep observing its eventual outcome.
//!
//! # Thread Safety
//!
//! All map mutations and counter updates happen under a single mutex, which
//! is never held across an await. Waiting on a channel happens outside the
//! lock.
//!
//! # Example
//!
//! ```rust,ignore
//! use rsquery_domain::{make_cache, Query, Resolver};
//! use std::time::Duration;
//!
//! let cache = make_cache::<GetUser>(1_000, Duration::from_secs(30))?;
//! let user = Query::fetch_cached(GetUser(1), &users, &cache);
//!
//! // Consumers only get the restricted view.
//! let view = cache.view();
//! assert_eq!(view.stats().size, 0);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::completion::Completion;
use crate::error::CacheConfigError;
use crate::request::Request;

/// Configuration for a request cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries.
    pub capacity: usize,
    /// Time-to-live of an entry, measured from insertion.
    ///
    /// A zero TTL makes every entry expire immediately, which disables
    /// memoization but keeps lookups counted.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 65_536,
            ttl: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Sets the maximum capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Checks that the configuration can build a cache.
    pub fn validate(&self) -> Result<(), CacheConfigError> {
        if self.capacity == 0 {
            return Err(CacheConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered by a live entry.
    pub hits: u64,
    /// Lookups that found no live entry.
    pub misses: u64,
    /// Entries currently mapped, including expired ones not yet dropped.
    pub size: usize,
}

/// Result of an owner lookup.
pub(crate) struct CacheLookup<R: Request> {
    pub(crate) completion: Completion<R::Value, R::Error>,
    /// True if the entry was created by this lookup and the caller must
    /// arrange for the channel to be completed.
    pub(crate) created: bool,
}

struct CacheEntry<R: Request> {
    completion: Completion<R::Value, R::Error>,
    inserted_at: Instant,
    tick: u64,
}

struct CacheState<R: Request> {
    entries: HashMap<R, CacheEntry<R>>,
    /// Access tick → key, oldest first.
    recency: BTreeMap<u64, R>,
    next_tick: u64,
    hits: u64,
    misses: u64,
}

impl<R: Request> CacheState<R> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            hits: 0,
            misses: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    /// Returns the channel of a live entry and marks it as accessed.
    ///
    /// Expired and abandoned entries are dropped on the way.
    fn touch_live(
        &mut self,
        key: &R,
        now: Instant,
        ttl: Duration,
    ) -> Option<Completion<R::Value, R::Error>> {
        let tick = self.tick();
        let entry = self.entries.get_mut(key)?;
        let stale = now.saturating_duration_since(entry.inserted_at) >= ttl
            || entry.completion.is_abandoned();
        if stale {
            self.recency.remove(&entry.tick);
            self.entries.remove(key);
            return None;
        }
        self.recency.remove(&entry.tick);
        entry.tick = tick;
        self.recency.insert(tick, key.clone());
        Some(entry.completion.clone())
    }

    fn insert(
        &mut self,
        key: R,
        completion: Completion<R::Value, R::Error>,
        now: Instant,
        capacity: usize,
    ) -> bool {
        let mut evicted = false;
        if self.entries.len() >= capacity {
            if let Some((_, oldest)) = self.recency.pop_first() {
                self.entries.remove(&oldest);
                evicted = true;
            }
        }
        let tick = self.tick();
        self.recency.insert(tick, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                completion,
                inserted_at: now,
                tick,
            },
        );
        evicted
    }

    fn remove(&mut self, key: &R) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.recency.remove(&entry.tick);
                true
            }
            None => false,
        }
    }
}

struct CacheInner<R: Request> {
    config: CacheConfig,
    state: Mutex<CacheState<R>>,
}

/// Bounded, TTL-aware memoization of request outcomes.
///
/// Cloning is cheap and yields a handle to the same cache. Only the owner
/// of a `RequestCache` can attach it to a request; consumers should be
/// handed a [`CacheView`].
pub struct RequestCache<R: Request> {
    inner: Arc<CacheInner<R>>,
}

impl<R: Request> Clone for RequestCache<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Request> fmt::Debug for RequestCache<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCache")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Builds a cache with the given capacity and TTL.
pub fn make_cache<R: Request>(
    capacity: usize,
    ttl: Duration,
) -> Result<RequestCache<R>, CacheConfigError> {
    RequestCache::new(CacheConfig { capacity, ttl })
}

impl<R: Request> RequestCache<R> {
    /// Creates a cache with the given configuration.
    pub fn new(config: CacheConfig) -> Result<Self, CacheConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(CacheInner {
                config,
                state: Mutex::new(CacheState::new()),
            }),
        })
    }

    /// Returns the configuration of this cache.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Returns the live entry for `key`, or inserts a fresh pending one.
    ///
    /// When `created` is set the caller owns the resolution of the returned
    /// channel.
    pub(crate) fn get_or_create(&self, key: &R) -> CacheLookup<R> {
        let now = Instant::now();
        let config = &self.inner.config;
        let (lookup, evicted) = {
            let mut state = self.inner.state.lock();
            match state.touch_live(key, now, config.ttl) {
                Some(completion) => {
                    state.hits += 1;
                    (
                        CacheLookup {
                            completion,
                            created: false,
                        },
                        false,
                    )
                }
                None => {
                    state.misses += 1;
                    let completion = Completion::new();
                    let evicted =
                        state.insert(key.clone(), completion.clone(), now, config.capacity);
                    (
                        CacheLookup {
                            completion,
                            created: true,
                        },
                        evicted,
                    )
                }
            }
        };
        record_lookup(!lookup.created);
        if evicted {
            metrics::counter!("rsquery_cache_evictions_total").increment(1);
        }
        lookup
    }

    /// Returns a read-only handle to a live entry without creating one.
    ///
    /// The handle can be awaited while the entry is in flight; only the
    /// resolver call that created the entry can complete it.
    ///
    /// Counts as a hit or miss and refreshes the entry's LRU standing.
    pub fn get(&self, key: &R) -> Option<Completion<R::Value, R::Error>> {
        let now = Instant::now();
        let result = {
            let mut state = self.inner.state.lock();
            let result = state.touch_live(key, now, self.inner.config.ttl);
            if result.is_some() {
                state.hits += 1;
            } else {
                state.misses += 1;
            }
            result
        };
        record_lookup(result.is_some());
        result
    }

    /// Removes the entry for `key`, whatever its completion state.
    ///
    /// Returns true if an entry was removed.
    pub fn invalidate(&self, key: &R) -> bool {
        self.inner.state.lock().remove(key)
    }

    /// Removes every entry. Counters are kept.
    pub fn invalidate_all(&self) {
        let mut state = self.inner.state.lock();
        state.entries.clear();
        state.recency.clear();
    }

    /// Snapshot of the keys of live entries, least recently accessed first.
    pub fn keys(&self) -> CacheKeys<R> {
        let now = Instant::now();
        let ttl = self.inner.config.ttl;
        let state = self.inner.state.lock();
        let keys: Vec<R> = state
            .recency
            .values()
            .filter(|key| {
                state.entries.get(*key).is_some_and(|entry| {
                    now.saturating_duration_since(entry.inserted_at) < ttl
                        && !entry.completion.is_abandoned()
                })
            })
            .cloned()
            .collect();
        CacheKeys { keys: keys.into() }
    }

    /// Snapshot of hit/miss counters and current size.
    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            size: state.entries.len(),
        }
    }

    /// Returns the consumer-facing view of this cache.
    pub fn view(&self) -> CacheView<R> {
        CacheView {
            cache: self.clone(),
        }
    }
}

fn record_lookup(hit: bool) {
    if hit {
        metrics::counter!("rsquery_cache_hits_total").increment(1);
    } else {
        metrics::counter!("rsquery_cache_misses_total").increment(1);
    }
}

/// Consumer-facing cache handle.
///
/// Exposes lookups, invalidation and statistics but cannot be attached to a
/// request, so consumers cannot populate the cache.
pub struct CacheView<R: Request> {
    cache: RequestCache<R>,
}

impl<R: Request> Clone for CacheView<R> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

impl<R: Request> fmt::Debug for CacheView<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CacheView").field(&self.cache).finish()
    }
}

impl<R: Request> CacheView<R> {
    /// See [`RequestCache::get`].
    pub fn get(&self, key: &R) -> Option<Completion<R::Value, R::Error>> {
        self.cache.get(key)
    }

    /// See [`RequestCache::invalidate`].
    pub fn invalidate(&self, key: &R) -> bool {
        self.cache.invalidate(key)
    }

    /// See [`RequestCache::invalidate_all`].
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all()
    }

    /// See [`RequestCache::keys`].
    pub fn keys(&self) -> CacheKeys<R> {
        self.cache.keys()
    }

    /// See [`RequestCache::stats`].
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

/// Finite snapshot of cache keys.
///
/// Iterating does not touch the cache, and the snapshot can be iterated any
/// number of times.
#[derive(Debug)]
pub struct CacheKeys<R> {
    keys: Arc<[R]>,
}

impl<R> Clone for CacheKeys<R> {
    fn clone(&self) -> Self {
        Self {
            keys: Arc::clone(&self.keys),
        }
    }
}

impl<R> CacheKeys<R> {
    /// Iterates over the snapshot.
    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.keys.iter()
    }

    /// Number of keys in the snapshot.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<'a, R> IntoIterator for &'a CacheKeys<R> {
    type Item = &'a R;
    type IntoIter = std::slice::Iter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

/// Registers cache metric descriptions.
///
/// Call once during application startup so the metrics recorder can expose
/// descriptions alongside the values.
///
/// # Metrics Registered
///
/// - `rsquery_cache_hits_total` - Lookups answered by a live entry
/// - `rsquery_cache_misses_total` - Lookups that found no live entry
/// - `rsquery_cache_evictions_total` - Entries evicted for capacity
pub fn register_cache_metrics() {
    metrics::describe_counter!(
        "rsquery_cache_hits_total",
        "Total number of request cache hits"
    );
    metrics::describe_counter!(
        "rsquery_cache_misses_total",
        "Total number of request cache misses"
    );
    metrics::describe_counter!(
        "rsquery_cache_evictions_total",
        "Total number of request cache entries evicted for capacity"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Key(&'static str);

    impl Request for Key {
        type Value = u32;
        type Error = String;
    }

    fn cache(capacity: usize, ttl: Duration) -> RequestCache<Key> {
        make_cache(capacity, ttl).unwrap()
    }

    // ============================================================
    // Section 1: Construction
    // ============================================================

    #[test]
    fn test_zero_capacity_is_rejected() {
        let result = make_cache::<Key>(0, Duration::from_secs(1));

        assert!(matches!(result, Err(CacheConfigError::ZeroCapacity)));
    }

    #[test]
    fn test_config_builders() {
        let config = CacheConfig::default()
            .with_capacity(10)
            .with_ttl(Duration::from_millis(500));

        assert_eq!(config.capacity, 10);
        assert_eq!(config.ttl, Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_new_cache_is_empty() {
        let cache = cache(4, Duration::from_secs(60));

        assert_eq!(cache.stats(), CacheStats::default());
        assert!(cache.keys().is_empty());
    }

    // ============================================================
    // Section 2: Lookup and in-flight sharing
    // ============================================================

    #[tokio::test]
    async fn test_first_lookup_creates_pending_entry() {
        // Arrange
        let cache = cache(4, Duration::from_secs(60));

        // Act
        let lookup = cache.get_or_create(&Key("a"));

        // Assert
        assert!(lookup.created);
        assert!(lookup.completion.is_pending());
        assert_eq!(cache.stats(), CacheStats { hits: 0, misses: 1, size: 1 });
    }

    #[tokio::test]
    async fn test_duplicate_lookup_shares_pending_channel() {
        // Arrange
        let cache = cache(4, Duration::from_secs(60));
        let first = cache.get_or_create(&Key("a"));

        // Act
        let second = cache.get_or_create(&Key("a"));

        // Assert - the second caller awaits the first caller's channel
        assert!(!second.created);
        assert!(second.completion.same_channel(&first.completion));
        first.completion.succeed(5);
        assert_eq!(second.completion.wait().await, Some(Ok(5)));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_failures_are_cached() {
        let cache = cache(4, Duration::from_secs(60));
        cache.get_or_create(&Key("a")).completion.fail("not found".to_string());

        let lookup = cache.get_or_create(&Key("a"));

        assert!(!lookup.created);
        assert_eq!(lookup.completion.peek(), Some(Err("not found".to_string())));
    }

    #[tokio::test]
    async fn test_get_does_not_create_entries() {
        let cache = cache(4, Duration::from_secs(60));

        assert!(cache.get(&Key("a")).is_none());
        assert_eq!(cache.stats(), CacheStats { hits: 0, misses: 1, size: 0 });

        cache.get_or_create(&Key("a")).completion.succeed(1);
        let found = cache.get(&Key("a")).unwrap();
        assert_eq!(found.peek(), Some(Ok(1)));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_abandoned_entry_is_replaced_on_next_lookup() {
        let cache = cache(4, Duration::from_secs(60));
        let first = cache.get_or_create(&Key("a"));
        first.completion.abandon();

        let second = cache.get_or_create(&Key("a"));

        assert!(second.created);
        assert!(!second.completion.same_channel(&first.completion));
    }

    // ============================================================
    // Section 3: TTL and eviction
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        // Arrange
        let cache = cache(4, Duration::from_millis(100));
        cache.get_or_create(&Key("a")).completion.succeed(1);

        // Act
        tokio::time::advance(Duration::from_millis(99)).await;
        let before = cache.get_or_create(&Key("a"));
        tokio::time::advance(Duration::from_millis(2)).await;
        let after = cache.get_or_create(&Key("a"));

        // Assert
        assert!(!before.created);
        assert!(after.created);
        assert!(after.completion.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_measured_from_insertion() {
        let cache = cache(4, Duration::from_millis(100));
        cache.get_or_create(&Key("a"));

        // Hits do not extend the lifetime of an entry.
        for _ in 0..4 {
            tokio::time::advance(Duration::from_millis(30)).await;
            cache.get(&Key("a"));
        }

        assert!(cache.get_or_create(&Key("a")).created);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_channel_held_by_caller_is_unaffected() {
        let cache = cache(4, Duration::from_millis(10));
        let held = cache.get_or_create(&Key("a")).completion;
        held.succeed(9);

        tokio::time::advance(Duration::from_millis(20)).await;
        cache.get_or_create(&Key("a"));

        assert_eq!(held.peek(), Some(Ok(9)));
    }

    #[tokio::test]
    async fn test_zero_ttl_never_hits() {
        let cache = cache(4, Duration::ZERO);
        cache.get_or_create(&Key("a"));

        assert!(cache.get_or_create(&Key("a")).created);
        assert_eq!(cache.stats().hits, 0);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_accessed() {
        // Arrange
        let cache = cache(3, Duration::from_secs(60));
        cache.get_or_create(&Key("a"));
        cache.get_or_create(&Key("b"));
        cache.get_or_create(&Key("c"));
        // Touch "a" so "b" becomes the least recently accessed.
        cache.get_or_create(&Key("a"));

        // Act
        cache.get_or_create(&Key("d"));

        // Assert
        assert_eq!(cache.stats().size, 3);
        let keys: Vec<_> = cache.keys().iter().cloned().collect();
        assert_eq!(keys, vec![Key("c"), Key("a"), Key("d")]);
        assert!(cache.get_or_create(&Key("b")).created);
    }

    #[tokio::test]
    async fn test_evicting_pending_entry_keeps_waiters_working() {
        let cache = cache(1, Duration::from_secs(60));
        let in_flight = cache.get_or_create(&Key("a")).completion;
        let waiter = in_flight.clone();

        cache.get_or_create(&Key("b"));
        in_flight.succeed(3);

        assert_eq!(waiter.wait().await, Some(Ok(3)));
        assert!(cache.get(&Key("a")).is_none());
    }

    // ============================================================
    // Section 4: Consumer operations
    // ============================================================

    #[tokio::test]
    async fn test_invalidate_removes_entry_regardless_of_state() {
        let cache = cache(4, Duration::from_secs(60));
        let pending = cache.get_or_create(&Key("a")).completion;
        cache.get_or_create(&Key("b")).completion.succeed(2);

        assert!(cache.invalidate(&Key("a")));
        assert!(cache.invalidate(&Key("b")));
        assert!(!cache.invalidate(&Key("c")));

        assert_eq!(cache.stats().size, 0);
        assert!(pending.is_pending());
    }

    #[tokio::test]
    async fn test_invalidate_all_keeps_counters() {
        let cache = cache(4, Duration::from_secs(60));
        cache.get_or_create(&Key("a"));
        cache.get_or_create(&Key("a"));

        cache.invalidate_all();

        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, size: 0 });
        assert!(cache.get_or_create(&Key("a")).created);
    }

    #[tokio::test]
    async fn test_keys_snapshot_is_restartable() {
        let cache = cache(4, Duration::from_secs(60));
        cache.get_or_create(&Key("a"));
        cache.get_or_create(&Key("b"));

        let keys = cache.keys();
        cache.invalidate_all();

        let first: Vec<_> = keys.iter().collect();
        let second: Vec<_> = (&keys).into_iter().collect();
        assert_eq!(first, second);
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_skip_expired_entries() {
        let cache = cache(4, Duration::from_millis(50));
        cache.get_or_create(&Key("old"));
        tokio::time::advance(Duration::from_millis(40)).await;
        cache.get_or_create(&Key("new"));
        tokio::time::advance(Duration::from_millis(20)).await;

        let keys: Vec<_> = cache.keys().iter().cloned().collect();

        assert_eq!(keys, vec![Key("new")]);
    }

    #[tokio::test]
    async fn test_view_exposes_consumer_operations() {
        let cache = cache(4, Duration::from_secs(60));
        cache.get_or_create(&Key("a")).completion.succeed(1);
        let view = cache.view();

        assert_eq!(view.get(&Key("a")).and_then(|c| c.peek()), Some(Ok(1)));
        assert_eq!(view.keys().len(), 1);
        assert!(view.invalidate(&Key("a")));
        view.invalidate_all();
        assert_eq!(view.stats().size, 0);
    }
}
