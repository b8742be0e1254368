//! Result Cache (C5) — a process-local, bounded cache keyed by
//! `(tool name, canonicalized parameters)`, carrying the teacher's `DashMap`
//! approach to caching (`types.rs`'s `stub_cache`) forward with TTL and
//! priority-aware eviction.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Normal,
    High,
}

/// Default TTLs per tool family, per §4.5. Overridable via `config::CacheTtlOverrides`.
pub mod default_ttl {
    use std::time::Duration;

    pub const TEXT_SEARCH: Duration = Duration::from_secs(15 * 60);
    pub const RECENT_FILES: Duration = Duration::from_secs(5 * 60);
    pub const GOTO_DEFINITION: Duration = Duration::from_secs(10 * 60);
    pub const DIRECTORY_SEARCH: Duration = Duration::from_secs(5 * 60);
}

struct Entry<V> {
    value: V,
    absolute_expiration: Instant,
    priority: Priority,
    last_access_seq: AtomicU64,
}

/// Bounded TTL cache. `capacity` bounds the number of live entries; once
/// exceeded, Normal-priority entries are evicted before High, LRU within a
/// priority class.
pub struct ResultCache<V> {
    entries: DashMap<String, Entry<V>>,
    capacity: usize,
    access_counter: AtomicU64,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self { entries: DashMap::new(), capacity, access_counter: AtomicU64::new(0) }
    }

    /// Canonicalize a tool name + parameter string into a cache key.
    pub fn key(tool: &str, canonical_params: &str) -> String {
        format!("{tool}:{canonical_params}")
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let entry = self.entries.get(key)?;
        if Instant::now() >= entry.absolute_expiration {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        entry.last_access_seq.store(self.access_counter.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
        Some(entry.value.clone())
    }

    pub fn put(&self, key: String, value: V, ttl: Duration, priority: Priority) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.evict_one();
        }
        let seq = self.access_counter.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            key,
            Entry { value, absolute_expiration: Instant::now() + ttl, priority, last_access_seq: AtomicU64::new(seq) },
        );
    }

    /// Remove every key whose tool prefix matches; used by the refactor
    /// executor to invalidate affected keys on apply (§4.5).
    pub fn invalidate_prefix(&self, tool_prefix: &str) {
        self.entries.retain(|key, _| !key.starts_with(tool_prefix));
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    fn evict_one(&self) {
        let victim = self
            .entries
            .iter()
            .map(|e| {
                let seq = e.value().last_access_seq.load(Ordering::Relaxed);
                (e.key().clone(), e.value().priority, seq)
            })
            .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.2.cmp(&b.2)));

        if let Some((key, _, _)) = victim {
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn put_then_get_roundtrips() {
        let cache: ResultCache<String> = ResultCache::new(10);
        let key = ResultCache::<String>::key("search", "q=foo");
        cache.put(key.clone(), "result".into(), Duration::from_secs(60), Priority::Normal);
        assert_eq!(cache.get(&key), Some("result".into()));
    }

    #[test]
    fn expired_entry_returns_none() {
        let cache: ResultCache<String> = ResultCache::new(10);
        let key = "k".to_string();
        cache.put(key.clone(), "v".into(), Duration::from_millis(10), Priority::Normal);
        sleep(Duration::from_millis(30));
        assert_eq!(cache.get(&key), None);
    }

    #[test]
    fn normal_priority_evicted_before_high() {
        let cache: ResultCache<String> = ResultCache::new(1);
        cache.put("high".into(), "v".into(), Duration::from_secs(60), Priority::High);
        cache.put("normal".into(), "v".into(), Duration::from_secs(60), Priority::Normal);
        // capacity 1: inserting "normal" should have evicted nothing since
        // "high" was inserted first and length was 1 < capacity at insert time;
        // force a third insert to trigger eviction pressure.
        cache.put("normal2".into(), "v".into(), Duration::from_secs(60), Priority::Normal);
        assert!(cache.get("high").is_some());
    }

    #[test]
    fn invalidate_prefix_removes_matching_keys() {
        let cache: ResultCache<String> = ResultCache::new(10);
        cache.put(ResultCache::<String>::key("search", "a"), "v".into(), Duration::from_secs(60), Priority::Normal);
        cache.put(ResultCache::<String>::key("search", "b"), "v".into(), Duration::from_secs(60), Priority::Normal);
        cache.put(ResultCache::<String>::key("goto", "c"), "v".into(), Duration::from_secs(60), Priority::Normal);
        cache.invalidate_prefix("search:");
        assert_eq!(cache.len(), 1);
    }
}
