//! Bounded TTL + LRU cache and fixed-window rate limiter (C1).
//!
//! Both structures are single-owner, `RefCell`-free plain `&mut self`
//! APIs: each execution context (service-worker vs. foreground, per the
//! concurrency model) constructs and owns its own instances rather than
//! sharing one across contexts.

use indexmap::IndexMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Cache statistics, mirroring the `{ valid, expired, size, maxSize }`
/// shape from the cache design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub valid: usize,
    pub expired: usize,
    pub size: usize,
    pub max_size: usize,
}

/// A TTL map with LRU eviction on insert-at-capacity.
///
/// `IndexMap` gives us insertion/access order for free: every
/// successful `get` moves its entry to the back via `shift_remove` +
/// re-insert, so the front of the map is always the least-recently-used
/// entry.
pub struct BoundedCache<K, V> {
    entries: IndexMap<K, Entry<V>>,
    max_size: usize,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(max_size: usize) -> Self {
        BoundedCache {
            entries: IndexMap::new(),
            max_size,
        }
    }

    /// Returns the value if present and unexpired, refreshing its
    /// recency. Expired entries are swept on access.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let now = Instant::now();
        match self.entries.get_index_of(key) {
            Some(idx) => {
                if self.entries[idx].expires_at <= now {
                    self.entries.shift_remove(key);
                    return None;
                }
                // move to the back (most-recently-used)
                if let Some((k, entry)) = self.entries.shift_remove_entry(key) {
                    self.entries.insert(k, entry);
                }
                self.entries.get(key).map(|e| &e.value)
            }
            None => None,
        }
    }

    pub fn has(&self, key: &K) -> bool {
        match self.entries.get(key) {
            Some(entry) => entry.expires_at > Instant::now(),
            None => false,
        }
    }

    /// Inserts `value` under `key` with the given TTL, evicting the
    /// least-recently-used entry first if the cache is already full.
    pub fn set(&mut self, key: K, value: V, ttl: Duration) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_size {
            // front of the map is the least-recently-used entry
            if let Some(lru_key) = self.entries.keys().next().cloned() {
                self.entries.shift_remove(&lru_key);
            }
        }
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn delete(&mut self, key: &K) -> bool {
        self.entries.shift_remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let expired = self.entries.values().filter(|e| e.expires_at <= now).count();
        CacheStats {
            valid: self.entries.len() - expired,
            expired,
            size: self.entries.len(),
            max_size: self.max_size,
        }
    }
}

struct Window {
    start: Instant,
    count: u32,
}

/// A fixed-window counter per key, with a bounded key set evicted by
/// oldest window start when full.
pub struct RateLimiter {
    windows: IndexMap<String, Window>,
    window: Duration,
    max: u32,
    max_keys: usize,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration, max_keys: usize) -> Self {
        RateLimiter {
            windows: IndexMap::new(),
            window,
            max,
            max_keys,
        }
    }

    /// Admits a check for `key`, incrementing (and, if the window has
    /// elapsed, resetting) its counter. Returns `true` iff the
    /// resulting count is within `max`.
    pub fn check(&mut self, key: &str) -> bool {
        let now = Instant::now();

        if let Some(w) = self.windows.get_mut(key) {
            if now.duration_since(w.start) >= self.window {
                w.start = now;
                w.count = 1;
            } else {
                w.count += 1;
            }
            return w.count <= self.max;
        }

        if self.windows.len() >= self.max_keys {
            if let Some(oldest_key) = self
                .windows
                .iter()
                .min_by_key(|(_, w)| w.start)
                .map(|(k, _)| k.clone())
            {
                self.windows.shift_remove(&oldest_key);
            }
        }

        self.windows.insert(
            key.to_string(),
            Window {
                start: now,
                count: 1,
            },
        );
        1 <= self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_set_get_roundtrip() {
        let mut c: BoundedCache<String, i32> = BoundedCache::new(10);
        c.set("a".to_string(), 1, Duration::from_secs(60));
        assert_eq!(c.get(&"a".to_string()), Some(&1));
    }

    #[test]
    fn cache_idempotent_get() {
        let mut c: BoundedCache<String, i32> = BoundedCache::new(10);
        c.set("a".to_string(), 1, Duration::from_secs(60));
        assert_eq!(c.get(&"a".to_string()), c.get(&"a".to_string()).copied().as_ref());
    }

    #[test]
    fn cache_expires() {
        let mut c: BoundedCache<String, i32> = BoundedCache::new(10);
        c.set("a".to_string(), 1, Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(c.get(&"a".to_string()), None);
    }

    #[test]
    fn cache_evicts_lru_when_full() {
        let mut c: BoundedCache<String, i32> = BoundedCache::new(2);
        c.set("a".to_string(), 1, Duration::from_secs(60));
        c.set("b".to_string(), 2, Duration::from_secs(60));
        // touch "a" so "b" becomes the LRU entry
        c.get(&"a".to_string());
        c.set("c".to_string(), 3, Duration::from_secs(60));
        assert!(c.has(&"a".to_string()));
        assert!(!c.has(&"b".to_string()));
        assert!(c.has(&"c".to_string()));
    }

    #[test]
    fn cache_stats_reports_size() {
        let mut c: BoundedCache<String, i32> = BoundedCache::new(10);
        c.set("a".to_string(), 1, Duration::from_secs(60));
        let stats = c.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.valid, 1);
        assert_eq!(stats.max_size, 10);
    }

    #[test]
    fn rate_limiter_denies_after_max() {
        let mut rl = RateLimiter::new(2, Duration::from_secs(60), 10);
        assert!(rl.check("host"));
        assert!(rl.check("host"));
        assert!(!rl.check("host"));
    }

    #[test]
    fn rate_limiter_resets_after_window() {
        let mut rl = RateLimiter::new(1, Duration::from_millis(5), 10);
        assert!(rl.check("host"));
        assert!(!rl.check("host"));
        std::thread::sleep(Duration::from_millis(10));
        assert!(rl.check("host"));
    }

    #[test]
    fn rate_limiter_evicts_oldest_key_when_full() {
        let mut rl = RateLimiter::new(5, Duration::from_secs(60), 2);
        assert!(rl.check("a"));
        std::thread::sleep(Duration::from_millis(2));
        assert!(rl.check("b"));
        std::thread::sleep(Duration::from_millis(2));
        // evicts "a", the oldest window
        assert!(rl.check("c"));
        // "a"'s window is gone, so a fresh check starts a new window and succeeds
        assert!(rl.check("a"));
    }
}
