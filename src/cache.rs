//! In-memory TTL/LRU cache for changeset queries
//!
//! The store is an optimization layer only: a miss always falls through to a
//! fresh fetch, and nothing here can fail. All state sits behind one mutex;
//! each operation holds it briefly and never calls back out.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default capacity when none is configured
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// A cached value plus the bookkeeping needed for TTL and LRU decisions
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: Instant,
    pub ttl: Duration,
    /// Number of successful reads since insertion
    pub access_count: u64,
    /// Store-wide logical clock value of the last insert or hit
    pub last_access_tick: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Capacity-driven LRU removals
    pub evictions: u64,
    /// Entries dropped lazily because their TTL elapsed
    pub expirations: u64,
    /// Wall time spent inside `get`, across hits and misses
    #[serde(serialize_with = "serialize_duration_ms")]
    pub total_latency: Duration,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Hit rate as a fraction in `[0.0, 1.0]`
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Accumulated lookup latency divided by the number of hits
    pub fn avg_latency(&self) -> Duration {
        if self.hits == 0 {
            Duration::ZERO
        } else {
            self.total_latency.div_f64(self.hits as f64)
        }
    }
}

fn serialize_duration_ms<S: serde::Serializer>(
    value: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64() * 1000.0)
}

/// Kind of VCS fact being cached, which decides how long it stays fresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Facts that rarely change within a session (branch name, repository root)
    Identity,
    /// Facts describing working-tree state (diffs, changed-file lists)
    WorkingTree,
}

/// Maps query kinds to TTLs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub identity: Duration,
    pub working_tree: Duration,
}

impl TtlPolicy {
    pub fn ttl_for(&self, kind: QueryKind) -> Duration {
        match kind {
            QueryKind::Identity => self.identity,
            QueryKind::WorkingTree => self.working_tree,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            identity: Duration::from_secs(300),
            working_tree: Duration::from_secs(5),
        }
    }
}

/// Derive a cache key from a command and its arguments
///
/// Arguments are sorted before hashing, so the same logical query maps to the
/// same key regardless of argument order.
pub fn cache_key(command: &str, args: &[String]) -> String {
    let mut sorted: Vec<&str> = args.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    for arg in sorted {
        hasher.update(arg.as_bytes());
        hasher.update([0u8]);
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("{}:{}", command, &digest[..16])
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    stats: CacheStats,
    tick: u64,
}

impl<V> Inner<V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_lru(&mut self) -> Option<String> {
        let victim = self
            .entries
            .values()
            .min_by_key(|e| e.last_access_tick)
            .map(|e| e.key.clone())?;
        self.entries.remove(&victim);
        self.stats.evictions += 1;
        Some(victim)
    }
}

/// Thread-safe TTL + LRU store
#[derive(Debug)]
pub struct CacheStore<V> {
    inner: Mutex<Inner<V>>,
    max_entries: usize,
}

impl<V: Clone> CacheStore<V> {
    /// Create a store holding at most `max_entries` entries
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                stats: CacheStats {
                    capacity: max_entries,
                    ..CacheStats::default()
                },
                tick: 0,
            }),
            max_entries,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        // Entries are replaced whole, never left half-written, so poisoning is ignored
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up an unexpired value
    pub fn get(&self, key: &str) -> Option<V> {
        let start = Instant::now();
        let mut guard = self.lock();
        let inner = &mut *guard;
        let tick = inner.next_tick();

        let outcome = match inner.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(start) => {
                entry.access_count += 1;
                entry.last_access_tick = tick;
                Some(entry.value.clone())
            }
            Some(_) => {
                inner.entries.remove(key);
                inner.stats.expirations += 1;
                tracing::debug!("Cache entry expired: {}", key);
                None
            }
            None => None,
        };

        if outcome.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        inner.stats.total_latency += start.elapsed();
        outcome
    }

    /// Insert or overwrite a value
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let mut guard = self.lock();
        let inner = &mut *guard;

        if !inner.entries.contains_key(&key)
            && inner.entries.len() >= self.max_entries
            && let Some(victim) = inner.evict_lru()
        {
            tracing::debug!("Cache eviction: {}", victim);
        }

        let tick = inner.next_tick();
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                created_at: Instant::now(),
                ttl,
                access_count: 0,
                last_access_tick: tick,
            },
        );
    }

    /// Remove one key, returning whether it was present
    pub fn remove(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Check presence of an unexpired entry without touching stats or LRU order
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .entries
            .get(key)
            .map(|e| !e.is_expired(now))
            .unwrap_or(false)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, e| !e.is_expired(now));
        let removed = before - inner.entries.len();
        inner.stats.expirations += removed as u64;
        removed
    }

    /// Drop all entries and reset statistics
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.stats = CacheStats {
            capacity: self.max_entries,
            ..CacheStats::default()
        };
        tracing::info!("Cache cleared");
    }

    /// Number of stored entries, expired ones included until touched
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats.clone()
        }
    }
}

impl<V: Clone> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const LONG: Duration = Duration::from_secs(60);

    #[test]
    fn test_set_then_get_returns_value() {
        let cache = CacheStore::new(10);
        cache.set("k", "v".to_string(), LONG);
        assert_eq!(cache.get("k"), Some("v".to_string()));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_miss_on_unknown_key() {
        let cache: CacheStore<String> = CacheStore::new(10);
        assert_eq!(cache.get("missing"), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_ttl_expiry_counts_one_miss() {
        let cache = CacheStore::new(10);
        cache.set("k", "v".to_string(), Duration::from_secs(1));
        assert_eq!(cache.get("k"), Some("v".to_string()));

        let misses_before = cache.stats().misses;
        std::thread::sleep(Duration::from_millis(1100));

        assert_eq!(cache.get("k"), None);
        let stats = cache.stats();
        assert_eq!(stats.misses, misses_before + 1);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.evictions, 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_evicts_least_recently_accessed() {
        let cache = CacheStore::new(3);
        cache.set("a", 1, LONG);
        cache.set("b", 2, LONG);
        cache.set("c", 3, LONG);

        // Touch "a" so "b" becomes the oldest access
        assert_eq!(cache.get("a"), Some(1));

        cache.set("d", 4, LONG);

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let cache = CacheStore::new(2);
        cache.set("a", 1, LONG);
        cache.set("b", 2, LONG);
        cache.set("a", 10, LONG);

        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn test_fill_to_capacity_plus_one() {
        let capacity = DEFAULT_MAX_ENTRIES;
        let cache = CacheStore::new(capacity);
        for i in 0..capacity {
            cache.set(format!("key{}", i), i, LONG);
        }
        // Refresh everything except key7
        for i in 0..capacity {
            if i != 7 {
                cache.get(&format!("key{}", i));
            }
        }
        cache.set("overflow", 0, LONG);

        assert!(!cache.contains("key7"));
        assert_eq!(cache.len(), capacity);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_clear_resets_stats() {
        let cache = CacheStore::new(1);
        cache.set("a", 1, LONG);
        cache.set("b", 2, LONG);
        cache.get("b");
        cache.get("zzz");

        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.capacity, 1);
    }

    #[test]
    fn test_hit_rate_and_avg_latency() {
        let cache = CacheStore::new(4);
        assert_eq!(cache.stats().hit_rate(), 0.0);
        assert_eq!(cache.stats().avg_latency(), Duration::ZERO);

        cache.set("a", 1, LONG);
        cache.get("a");
        cache.get("a");
        cache.get("a");
        cache.get("b");

        let stats = cache.stats();
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert!(stats.avg_latency() <= stats.total_latency);
    }

    #[test]
    fn test_purge_expired() {
        let cache = CacheStore::new(4);
        cache.set("short", 1, Duration::from_millis(10));
        cache.set("long", 2, LONG);
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("long"));
    }

    #[test]
    fn test_remove() {
        let cache = CacheStore::new(4);
        cache.set("a", 1, LONG);
        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
    }

    #[test]
    fn test_cache_key_ignores_argument_order() {
        let a = cache_key("git diff", &["--cached".to_string(), "--stat".to_string()]);
        let b = cache_key("git diff", &["--stat".to_string(), "--cached".to_string()]);
        assert_eq!(a, b);
        assert!(a.starts_with("git diff:"));
    }

    #[test]
    fn test_cache_key_distinguishes_queries() {
        let staged = cache_key("git diff", &["--cached".to_string()]);
        let unstaged = cache_key("git diff", &[]);
        let status = cache_key("git status", &["--cached".to_string()]);
        assert_ne!(staged, unstaged);
        assert_ne!(staged, status);
    }

    #[test]
    fn test_ttl_policy() {
        let policy = TtlPolicy::default();
        assert!(policy.ttl_for(QueryKind::Identity) > policy.ttl_for(QueryKind::WorkingTree));
        assert_eq!(policy.ttl_for(QueryKind::WorkingTree), Duration::from_secs(5));
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(CacheStore::new(64));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("t{}-{}", t, i % 8);
                        cache.set(key.clone(), i, LONG);
                        cache.get(&key);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, 800);
        assert!(cache.len() <= 64);
    }
}
