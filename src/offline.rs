//! The offline bundle store and the negative-resolution failure memory
//! (C1's persistent surface, plus the 60s failure cache from the error
//! handling design).

#![allow(async_fn_in_trait)]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::assemble::Bundle;

/// A bundle plus the site-index id it was built from and when it was
/// cached, so a later load can validate it against a fresh entrypoint
/// before trusting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineEntry {
    pub bundle: Bundle,
    pub site_index_id: String,
    pub cached_at_unix: u64,
}

/// Persistence seam for the offline bundle cache. The crate ships an
/// in-memory implementation for tests and non-browser embedders; a
/// production embedder backs this with real browser storage. Keys are
/// `"<host><route>"` as specified.
///
/// Concurrent access from multiple execution contexts (service worker
/// + foreground) is expected; last-writer-wins is acceptable, so the
/// trait takes `&self` rather than `&mut self`.
pub trait OfflineStore {
    async fn get(&self, key: &str) -> Option<OfflineEntry>;
    async fn set(&self, key: String, entry: OfflineEntry);
    async fn delete(&self, key: &str);
}

/// A simple last-writer-wins in-memory offline store, built around a
/// `std::sync::Mutex` so it tolerates being reached from more than one
/// task the way the real cross-context store must.
pub struct InMemoryOfflineStore {
    entries: std::sync::Mutex<HashMap<String, OfflineEntry>>,
    ttl: Duration,
}

impl InMemoryOfflineStore {
    pub fn new(ttl: Duration) -> Self {
        InMemoryOfflineStore {
            entries: std::sync::Mutex::new(HashMap::new()),
            ttl,
        }
    }
}

impl OfflineStore for InMemoryOfflineStore {
    async fn get(&self, key: &str) -> Option<OfflineEntry> {
        let now_unix = now_unix();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) => {
                if now_unix.saturating_sub(entry.cached_at_unix) > self.ttl.as_secs() {
                    entries.remove(key);
                    None
                } else {
                    Some(entry.clone())
                }
            }
            None => None,
        }
    }

    async fn set(&self, key: String, entry: OfflineEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key, entry);
    }

    async fn delete(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }
}

pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Remembers recent resolver failures for a host+route for
/// `failure_memory` (60s by default) so a navigation interceptor
/// doesn't retry a doomed load on every page view.
pub struct FailureMemory {
    last_failure: HashMap<String, Instant>,
    remember_for: Duration,
}

impl FailureMemory {
    pub fn new(remember_for: Duration) -> Self {
        FailureMemory {
            last_failure: HashMap::new(),
            remember_for,
        }
    }

    pub fn record(&mut self, key: &str) {
        self.last_failure.insert(key.to_string(), Instant::now());
    }

    /// True if `key` failed recently enough that it should be treated
    /// as still failing without retrying the pipeline.
    pub fn is_remembered(&self, key: &str) -> bool {
        match self.last_failure.get(key) {
            Some(t) => t.elapsed() < self.remember_for,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offline_store_roundtrips() {
        let store = InMemoryOfflineStore::new(Duration::from_secs(60));
        let entry = OfflineEntry {
            bundle: Bundle {
                html: "<html></html>".to_string(),
                css: vec![],
                js: vec![],
                manifest_meta: serde_json::json!({}),
            },
            site_index_id: "SI1".to_string(),
            cached_at_unix: now_unix(),
        };
        store.set("example.test/".to_string(), entry.clone()).await;
        let got = store.get("example.test/").await.expect("present");
        assert_eq!(got.site_index_id, "SI1");
    }

    #[test]
    fn failure_memory_expires() {
        let mut mem = FailureMemory::new(Duration::from_millis(5));
        mem.record("example.test/");
        assert!(mem.is_remembered("example.test/"));
        std::thread::sleep(Duration::from_millis(10));
        assert!(!mem.is_remembered("example.test/"));
    }
}
