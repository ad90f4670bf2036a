/*!
LRU cache with a time-to-live safety net for catalog row lookups.

Entries are invalidated explicitly on every mutation of the keyed row; the
TTL only bounds staleness if an invalidation is ever missed. Expired
entries are dropped lazily on access.
*/

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

/// Default number of cached rows.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;
/// Default entry time-to-live.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// An LRU cache whose entries expire after a fixed time-to-live.
pub struct TtlCache<K: Hash + Eq, V> {
    entries: LruCache<K, (Instant, V)>,
    ttl: Duration,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    /// Cache with the default capacity and TTL.
    pub fn new() -> Self {
        Self::with_capacity_and_ttl(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }

    /// Cache with explicit capacity and TTL.
    pub fn with_capacity_and_ttl(capacity: usize, ttl: Duration) -> Self {
        TtlCache {
            entries: LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            ),
            ttl,
        }
    }

    /// Look up a fresh entry, dropping it if expired.
    pub fn get(&mut self, key: &K) -> Option<V> {
        match self.entries.get(key) {
            Some((inserted, value)) if inserted.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                self.entries.pop(key);
                None
            }
            None => None,
        }
    }

    /// Insert or refresh an entry.
    pub fn put(&mut self, key: K, value: V) {
        self.entries.put(key, (Instant::now(), value));
    }

    /// Drop an entry after a mutation of the keyed row.
    pub fn invalidate(&mut self, key: &K) {
        self.entries.pop(key);
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of resident entries, including expired ones not yet dropped.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Hash + Eq, V: Clone> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
