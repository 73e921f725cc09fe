//! In-memory recent-event gate.
//!
//! Tracks raw-text digests of recently seen events in an LRU cache with
//! TTL-based expiration. This is the first and cheapest dedup gate.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// TTL'd cache of recently seen event digests.
///
/// # Thread Safety
///
/// Uses `RwLock` for interior mutability; this cache is one of only two
/// pieces of state mutated concurrently by in-flight pipelines.
///
/// # Lock Poisoning
///
/// Handled with fail-open semantics: a poisoned lock means the check reports
/// "not seen". Failing to detect a duplicate just means one extra event flows
/// downstream; blocking every pipeline on a transient panic would be worse.
pub struct RecentEventCache {
    /// Digest → first-seen instant.
    cache: RwLock<LruCache<String, Instant>>,
    /// How long an entry counts as "recently seen".
    ttl: Duration,
}

impl RecentEventCache {
    /// Creates a new cache.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    #[allow(clippy::expect_used)] // documented panic for invalid input
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).expect("capacity must be > 0");
        Self {
            cache: RwLock::new(LruCache::new(cap)),
            ttl,
        }
    }

    /// Checks whether the digest was seen within the TTL window and records
    /// it if not.
    ///
    /// Returns `true` if the digest is a duplicate. Expired entries found
    /// during the check are evicted lazily, so the cache is self-cleaning
    /// without a background task.
    pub fn seen(&self, digest: &str) -> bool {
        let now = Instant::now();
        let Ok(mut cache) = self.cache.write() else {
            return false;
        };

        if let Some(first_seen) = cache.get(digest) {
            if now.duration_since(*first_seen) <= self.ttl {
                metrics::counter!("dedup_recent_hits_total").increment(1);
                return true;
            }
            // Stale entry: evict and treat as fresh.
            cache.pop(digest);
        }

        cache.put(digest.to_string(), now);
        metrics::gauge!("dedup_recent_cache_size").set(cache.len() as f64);
        false
    }

    /// Returns the current number of entries, including any not yet expired
    /// lazily.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the configured TTL.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_first_sight_not_duplicate() {
        let cache = RecentEventCache::new(16, Duration::from_secs(60));
        assert!(!cache.seen("abc"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_second_sight_is_duplicate() {
        let cache = RecentEventCache::new(16, Duration::from_secs(60));
        assert!(!cache.seen("abc"));
        assert!(cache.seen("abc"));
    }

    #[test]
    fn test_expired_entry_not_duplicate() {
        let cache = RecentEventCache::new(16, Duration::from_millis(20));
        assert!(!cache.seen("abc"));
        thread::sleep(Duration::from_millis(40));
        assert!(!cache.seen("abc"));
        // The re-record counts again.
        assert!(cache.seen("abc"));
    }

    #[test]
    fn test_capacity_eviction() {
        let cache = RecentEventCache::new(2, Duration::from_secs(60));
        assert!(!cache.seen("a"));
        assert!(!cache.seen("b"));
        assert!(!cache.seen("c")); // evicts "a"
        assert!(!cache.seen("a")); // no longer remembered
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_distinct_digests_independent() {
        let cache = RecentEventCache::new(16, Duration::from_secs(60));
        assert!(!cache.seen("a"));
        assert!(!cache.seen("b"));
        assert!(cache.seen("a"));
        assert!(cache.seen("b"));
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        let cache = Arc::new(RecentEventCache::new(1024, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..100 {
                        cache.seen(&format!("digest-{t}-{i}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 800);
    }
}
