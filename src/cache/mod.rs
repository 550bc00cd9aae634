//! Bounded in-memory result cache.
//!
//! Sharded for concurrency (shard count must be a power of two), TTL-expiring
//! with a periodic sweep, and byte-capped with oldest-first eviction. The
//! hard byte cap is distributed evenly across shards, so a single entry can
//! never exceed `hard_max_bytes / shards`.
//!
//! Counters are cumulative for the lifetime of the cache and never reset.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::QueryError;

/// Default shard count; must be a power of two.
pub const DEFAULT_SHARD_COUNT: usize = 1024;

/// Interval between sweeps that physically reclaim expired entries.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Initial allocation hint for the expected number of live entries.
pub const DEFAULT_INITIAL_ENTRIES: usize = 600_000;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Number of shards; rounded up to a power of two.
    pub shards: usize,
    /// Default entry lifetime when `put` does not override it.
    pub life_window: Duration,
    /// Interval between expired-entry sweeps.
    pub sweep_interval: Duration,
    /// Hard byte cap across all shards; 0 means unbounded (age-only eviction).
    pub hard_max_bytes: u64,
    /// Expected entry count; only sizes the initial allocation.
    pub initial_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shards: DEFAULT_SHARD_COUNT,
            life_window: Duration::from_secs(60 * 60),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            hard_max_bytes: 0,
            initial_entries: DEFAULT_INITIAL_ENTRIES,
        }
    }
}

/// Cumulative cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub collisions: u64,
    pub del_hits: u64,
    pub del_misses: u64,
}

#[derive(Debug)]
struct Entry {
    /// Full key, kept to make hash collisions observable.
    key: String,
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn size(&self) -> u64 {
        (self.key.len() + self.value.len()) as u64
    }
}

#[derive(Debug, Default)]
struct Shard {
    entries: HashMap<u64, Entry>,
    /// Insertion order for oldest-first eviction.
    order: VecDeque<u64>,
    bytes: u64,
}

impl Shard {
    fn with_capacity(capacity: usize) -> Self {
        Shard {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            bytes: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    collisions: AtomicU64,
    del_hits: AtomicU64,
    del_misses: AtomicU64,
}

/// Sharded byte-capped TTL cache for encoded result frames.
#[derive(Debug)]
pub struct QueryCache {
    shards: Vec<Mutex<Shard>>,
    shard_mask: u64,
    /// Per-shard byte budget; 0 means unbounded.
    shard_budget: u64,
    life_window: Duration,
    counters: Counters,
    total_bytes: AtomicU64,
    total_entries: AtomicU64,
    sweeper: CancellationToken,
    closed: AtomicBool,
}

impl QueryCache {
    /// Create the cache and start its background sweep task. Requires a tokio
    /// runtime.
    pub fn new(config: CacheConfig) -> Arc<Self> {
        let shards = config.shards.max(1).next_power_of_two();
        let shard_budget = if config.hard_max_bytes == 0 {
            0
        } else {
            (config.hard_max_bytes / shards as u64).max(1)
        };

        let per_shard_hint = config.initial_entries / shards;
        let cache = Arc::new(QueryCache {
            shards: (0..shards)
                .map(|_| Mutex::new(Shard::with_capacity(per_shard_hint)))
                .collect(),
            shard_mask: (shards - 1) as u64,
            shard_budget,
            life_window: config.life_window,
            counters: Counters::default(),
            total_bytes: AtomicU64::new(0),
            total_entries: AtomicU64::new(0),
            sweeper: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });

        spawn_sweeper(Arc::downgrade(&cache), config.sweep_interval);
        cache
    }

    fn shard_for(&self, hash: u64) -> &Mutex<Shard> {
        &self.shards[(hash & self.shard_mask) as usize]
    }

    /// Look up a key. Expired entries are invisible and reclaimed in place.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let hash = hash_key(key);
        let mut shard = self.shard_for(hash).lock().unwrap();

        let expired = match shard.entries.get(&hash) {
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) if entry.key != key => {
                self.counters.collisions.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) => entry.expires_at <= Instant::now(),
        };

        if expired {
            self.remove_entry(&mut shard, hash);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(shard.entries.get(&hash).unwrap().value.clone())
    }

    /// Insert a value with the given lifetime. When the shard's byte budget
    /// would be exceeded, the oldest entries are evicted until the new entry
    /// fits; an entry that can never fit fails with `CacheTooLarge`.
    pub fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), QueryError> {
        let hash = hash_key(key);
        let entry = Entry {
            key: key.to_string(),
            value,
            expires_at: Instant::now() + ttl,
        };
        let size = entry.size();

        if self.shard_budget > 0 && size > self.shard_budget {
            return Err(QueryError::CacheTooLarge(size as usize));
        }

        let mut shard = self.shard_for(hash).lock().unwrap();

        if let Some(existing) = shard.entries.get(&hash) {
            if existing.key != key {
                self.counters.collisions.fetch_add(1, Ordering::Relaxed);
            }
            // Same slot is overwritten either way; at most one stored value
            // per key at any instant.
            self.remove_entry(&mut shard, hash);
        }

        if self.shard_budget > 0 {
            while shard.bytes + size > self.shard_budget {
                let Some(oldest) = shard.order.front().copied() else {
                    break;
                };
                self.remove_entry(&mut shard, oldest);
            }
        }

        shard.bytes += size;
        shard.entries.insert(hash, entry);
        shard.order.push_back(hash);
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
        self.total_entries.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Insert with the cache's default life window.
    pub fn put_default(&self, key: &str, value: Vec<u8>) -> Result<(), QueryError> {
        self.put(key, value, self.life_window)
    }

    pub fn delete(&self, key: &str) {
        let hash = hash_key(key);
        let mut shard = self.shard_for(hash).lock().unwrap();
        match shard.entries.get(&hash) {
            Some(entry) if entry.key == key => {
                self.remove_entry(&mut shard, hash);
                self.counters.del_hits.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.counters.del_misses.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            collisions: self.counters.collisions.load(Ordering::Relaxed),
            del_hits: self.counters.del_hits.load(Ordering::Relaxed),
            del_misses: self.counters.del_misses.load(Ordering::Relaxed),
        }
    }

    /// Bytes currently stored across all shards.
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Number of live entries (including not-yet-swept expired ones).
    pub fn len(&self) -> u64 {
        self.total_entries.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn life_window(&self) -> Duration {
        self.life_window
    }

    /// Stop the sweeper and drop all entries. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.sweeper.cancel();
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap();
            let freed = shard.bytes;
            let count = shard.entries.len() as u64;
            shard.entries.clear();
            shard.order.clear();
            shard.bytes = 0;
            self.total_bytes.fetch_sub(freed, Ordering::Relaxed);
            self.total_entries.fetch_sub(count, Ordering::Relaxed);
        }
    }

    /// Physically reclaim expired entries. Called by the sweep task.
    fn sweep_expired(&self) {
        let now = Instant::now();
        let mut reclaimed = 0u64;
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap();
            let expired: Vec<u64> = shard
                .entries
                .iter()
                .filter(|(_, e)| e.expires_at <= now)
                .map(|(h, _)| *h)
                .collect();
            for hash in expired {
                self.remove_entry(&mut shard, hash);
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            debug!(reclaimed, "cache sweep reclaimed expired entries");
        }
    }

    fn remove_entry(&self, shard: &mut Shard, hash: u64) {
        if let Some(entry) = shard.entries.remove(&hash) {
            shard.bytes -= entry.size();
            shard.order.retain(|h| *h != hash);
            self.total_bytes.fetch_sub(entry.size(), Ordering::Relaxed);
            self.total_entries.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

fn hash_key(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn spawn_sweeper(cache: Weak<QueryCache>, interval: Duration) {
    tokio::spawn(async move {
        let token = match cache.upgrade() {
            Some(c) => c.sweeper.clone(),
            None => return,
        };
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(cache) = cache.upgrade() else { break };
                    cache.sweep_expired();
                }
            }
        }
    });
}

impl Drop for QueryCache {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache(hard_max_bytes: u64) -> Arc<QueryCache> {
        QueryCache::new(CacheConfig {
            shards: 1,
            life_window: Duration::from_secs(60),
            hard_max_bytes,
            initial_entries: 16,
            ..CacheConfig::default()
        })
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let cache = small_cache(0);
        cache.put_default("k1", b"hello".to_vec()).unwrap();
        assert_eq!(cache.get("k1"), Some(b"hello".to_vec()));
        assert_eq!(cache.get("missing"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_invisible() {
        let cache = small_cache(0);
        cache.put("k1", b"v".to_vec(), Duration::ZERO).unwrap();
        assert_eq!(cache.get("k1"), None);
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_ttl_override_outlives_life_window() {
        let cache = QueryCache::new(CacheConfig {
            shards: 1,
            life_window: Duration::ZERO,
            hard_max_bytes: 0,
            initial_entries: 16,
            ..CacheConfig::default()
        });
        cache
            .put("k1", b"v".to_vec(), Duration::from_secs(60))
            .unwrap();
        assert_eq!(cache.get("k1"), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_oldest_entry_evicted_at_byte_cap() {
        // Budget fits two of the three entries (each entry is 2 + 8 = 10 bytes).
        let cache = small_cache(25);
        cache.put_default("k1", vec![1u8; 8]).unwrap();
        cache.put_default("k2", vec![2u8; 8]).unwrap();
        cache.put_default("k3", vec![3u8; 8]).unwrap();

        assert_eq!(cache.get("k1"), None, "oldest entry should be evicted");
        assert_eq!(cache.get("k2"), Some(vec![2u8; 8]));
        assert_eq!(cache.get("k3"), Some(vec![3u8; 8]));
        assert!(cache.used_bytes() <= 25);
    }

    #[tokio::test]
    async fn test_entry_larger_than_cap_fails() {
        let cache = small_cache(16);
        let err = cache.put_default("k1", vec![0u8; 64]).unwrap_err();
        assert_eq!(err.kind(), "cache_too_large");
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_zero_cap_means_unbounded() {
        let cache = small_cache(0);
        cache.put_default("k1", vec![0u8; 1_000_000]).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_single_value_per_key() {
        let cache = small_cache(0);
        cache.put_default("k1", b"one".to_vec()).unwrap();
        cache.put_default("k1", b"two".to_vec()).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k1"), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_delete_counters() {
        let cache = small_cache(0);
        cache.put_default("k1", b"v".to_vec()).unwrap();
        cache.delete("k1");
        cache.delete("k1");

        let stats = cache.stats();
        assert_eq!(stats.del_hits, 1);
        assert_eq!(stats.del_misses, 1);
        assert_eq!(cache.get("k1"), None);
    }

    #[tokio::test]
    async fn test_sweep_reclaims_expired_entries() {
        let cache = small_cache(0);
        cache.put("k1", b"v".to_vec(), Duration::ZERO).unwrap();
        cache.put_default("k2", b"v".to_vec()).unwrap();
        assert_eq!(cache.len(), 2);

        cache.sweep_expired();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k2"), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let cache = small_cache(0);
        cache.put_default("k1", b"v".to_vec()).unwrap();
        cache.close();
        cache.close();
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let cache = QueryCache::new(CacheConfig {
            shards: 16,
            life_window: Duration::from_secs(60),
            hard_max_bytes: 0,
            initial_entries: 1024,
            ..CacheConfig::default()
        });

        let mut handles = Vec::new();
        for t in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..100 {
                    let key = format!("key-{}-{}", t, i);
                    cache.put_default(&key, vec![0u8; 32]).unwrap();
                    assert!(cache.get(&key).is_some());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.len(), 800);
        assert_eq!(cache.stats().hits, 800);
    }
}
