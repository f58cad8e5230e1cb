//! The route-level response cache: TTL-bounded, capacity-bounded with LRU
//! eviction, keyed on the canonical request shape.
//!
//! Concurrency uses `dashmap` over a `Mutex<HashMap<_>>`, since route
//! caches are shared across every concurrent request a route serves.
//! Eviction is a hand-rolled scan-for-oldest rather than a dedicated
//! ordered structure — a per-route cache's bound is small enough that an
//! O(n) eviction scan is not a real cost.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry as DashEntry;
use dashmap::DashMap;
use tokio::sync::Notify;

use crate::res::HttpResponse;

/// A cached response plus the bookkeeping needed to expire and evict it.
struct Entry {
    response: HttpResponse,
    inserted_at: Instant,
    last_touch: u64,
}

/// Counters exposed for observability (spec: ambient, not part of the
/// cache's functional contract).
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    /// Cache hits.
    pub hits: u64,
    /// Cache misses (including expired entries).
    pub misses: u64,
    /// Entries evicted to respect the capacity bound.
    pub evictions: u64,
}

/// The outcome of contending for the right to compute a cache key (spec
/// §4.8/§5: "ensure at-most-one in-flight computation; subsequent callers
/// await the first").
pub enum ComputeSlot {
    /// This caller won the race. It must compute the value, install it via
    /// [`ResponseCache::put`], then call [`ResponseCache::finish_compute`]
    /// to release the slot and wake any followers.
    Leader,
    /// Another caller is already computing this key. Await the `Notify`,
    /// then re-check the cache — the leader's result should be there.
    Follower(Arc<Notify>),
}

/// A TTL + capacity-bounded cache of responses, one instance per cached
/// route.
pub struct ResponseCache {
    ttl: Duration,
    capacity: usize,
    entries: DashMap<String, Entry>,
    inflight: DashMap<String, Arc<Notify>>,
    tick: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    /// Builds a cache with the given TTL and maximum entry count.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: DashMap::new(),
            inflight: DashMap::new(),
            tick: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Contends for the right to compute `key`. The first caller for a
    /// given key becomes the [`ComputeSlot::Leader`]; every concurrent
    /// caller after it becomes a [`ComputeSlot::Follower`] and should await
    /// the returned `Notify` instead of recomputing (thundering-herd
    /// prevention on a cache miss).
    pub fn begin_compute(&self, key: &str) -> ComputeSlot {
        match self.inflight.entry(key.to_string()) {
            DashEntry::Occupied(e) => ComputeSlot::Follower(Arc::clone(e.get())),
            DashEntry::Vacant(e) => {
                e.insert(Arc::new(Notify::new()));
                ComputeSlot::Leader
            }
        }
    }

    /// Releases the compute slot for `key` and wakes any followers waiting
    /// on it. Called by the leader once it has installed its result via
    /// [`ResponseCache::put`].
    pub fn finish_compute(&self, key: &str) {
        if let Some((_, notify)) = self.inflight.remove(key) {
            notify.notify_waiters();
        }
    }

    /// Looks up `key`. An expired entry counts as a miss and is removed.
    pub fn get(&self, key: &str) -> Option<HttpResponse> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.inserted_at.elapsed() <= self.ttl {
                entry.last_touch = self.tick.fetch_add(1, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.response.clone());
            }
        }
        self.entries.remove(key);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Inserts `response` under `key`, evicting the least-recently-touched
    /// entry first if the cache is already at capacity.
    pub fn put(&self, key: String, response: HttpResponse) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.evict_one();
        }
        self.entries.insert(
            key,
            Entry {
                response,
                inserted_at: Instant::now(),
                last_touch: self.tick.fetch_add(1, Ordering::Relaxed),
            },
        );
    }

    /// Removes `key` unconditionally, regardless of TTL. Used by the
    /// worker-pool envelope's cache-coordinator `delete` op (spec §4.8:
    /// "workers issue get/set/has/delete requests").
    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    fn evict_one(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.last_touch)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Snapshot of the cache's hit/miss/eviction counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Canonicalizes `(pathname, sorted query pairs)` into a single cache key.
/// Query pairs are sorted by key so `?a=1&b=2` and `?b=2&a=1` collide.
pub fn canonical_key(pathname: &str, query: &std::collections::HashMap<String, String>) -> String {
    let mut pairs: Vec<(&String, &String)> = query.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    let mut key = pathname.to_string();
    for (k, v) in pairs {
        key.push('\0');
        key.push_str(k);
        key.push('=');
        key.push_str(v);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn canonical_key_ignores_query_order() {
        let mut q1 = HashMap::new();
        q1.insert("a".to_string(), "1".to_string());
        q1.insert("b".to_string(), "2".to_string());
        let mut q2 = HashMap::new();
        q2.insert("b".to_string(), "2".to_string());
        q2.insert("a".to_string(), "1".to_string());
        assert_eq!(canonical_key("/x", &q1), canonical_key("/x", &q2));
    }

    #[test]
    fn hit_then_miss_after_expiry() {
        let cache = ResponseCache::new(Duration::from_millis(20), 4);
        cache.put("k".to_string(), HttpResponse::new());
        assert!(cache.get("k").is_some());
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn evicts_least_recently_touched_over_capacity() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        cache.put("a".to_string(), HttpResponse::new());
        cache.put("b".to_string(), HttpResponse::new());
        // touch "a" so "b" becomes the least-recently-touched entry
        assert!(cache.get("a").is_some());
        cache.put("c".to_string(), HttpResponse::new());
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[tokio::test]
    async fn second_caller_becomes_follower_until_leader_finishes() {
        let cache = ResponseCache::new(Duration::from_secs(60), 4);
        let key = "k".to_string();

        assert!(matches!(cache.begin_compute(&key), ComputeSlot::Leader));
        let notify = match cache.begin_compute(&key) {
            ComputeSlot::Follower(notify) => notify,
            ComputeSlot::Leader => panic!("expected a follower"),
        };

        let waiter = tokio::spawn(async move {
            notify.notified().await;
        });
        tokio::task::yield_now().await;
        cache.finish_compute(&key);
        waiter.await.unwrap();
    }
}
