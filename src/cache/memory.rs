//! In-process response cache backend.

use std::sync::RwLock;
use std::time::Instant;

use async_trait::async_trait;
use lru::LruCache;

use super::backend::{BackendError, ResponseCache};
use super::config::{CacheConfig, CacheProvider};
use super::lock::{rw_read, rw_write};
use super::snapshot::ResponseSnapshot;

const SOURCE: &str = "cache::memory";

struct Entry {
    stored_at: Instant,
    snapshot: ResponseSnapshot,
}

/// LRU-bounded in-memory store with write-time expiry.
///
/// When `reload_time > 0`, an entry becomes invisible `reload_time` seconds
/// after the `put` that stored it. The capacity bound replaces the
/// original's memory-pressure eviction; entries are only displaced when the
/// store is full.
pub struct MemoryCache {
    entries: RwLock<LruCache<String, Entry>>,
    reload_time: i64,
}

impl MemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.memory_capacity_non_zero())),
            reload_time: config.reload_time,
        }
    }

    /// Number of live entries, counting ones past their expiry that have not
    /// been touched since.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn store(&self, key: &str, snapshot: &ResponseSnapshot, stored_at: Instant) {
        rw_write(&self.entries, SOURCE, "put").put(
            key.to_string(),
            Entry {
                stored_at,
                snapshot: snapshot.clone(),
            },
        );
    }

    fn expired(&self, entry: &Entry) -> bool {
        self.reload_time > 0 && entry.stored_at.elapsed().as_secs() >= self.reload_time as u64
    }

    #[cfg(test)]
    fn put_stored_at(&self, key: &str, snapshot: &ResponseSnapshot, stored_at: Instant) {
        self.store(key, snapshot, stored_at);
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    fn provider(&self) -> CacheProvider {
        CacheProvider::Memory
    }

    async fn put(&self, key: &str, snapshot: &ResponseSnapshot) -> Result<(), BackendError> {
        self.store(key, snapshot, Instant::now());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<ResponseSnapshot>, BackendError> {
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        let fresh = match entries.get(key) {
            None => return Ok(None),
            Some(entry) if self.expired(entry) => None,
            Some(entry) => Some(entry.snapshot.clone()),
        };
        if fresh.is_none() {
            entries.pop(key);
        }
        Ok(fresh)
    }

    async fn invalidate(&self, key: &str) -> Result<(), BackendError> {
        rw_write(&self.entries, SOURCE, "invalidate").pop(key);
        Ok(())
    }

    async fn invalidate_all(&self) -> Result<(), BackendError> {
        rw_write(&self.entries, SOURCE, "invalidate_all").clear();
        Ok(())
    }

    async fn cleanup(&self) {}
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::{Response as HttpResponse, StatusCode};
    use bytes::Bytes;

    use super::*;

    fn sample_snapshot(body: &'static [u8]) -> ResponseSnapshot {
        let (parts, ()) = HttpResponse::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/css")
            .body(())
            .expect("valid response parts")
            .into_parts();
        ResponseSnapshot::capture(&parts, Bytes::from_static(body), 0)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = MemoryCache::new(&CacheConfig::default());
        let snapshot = sample_snapshot(b"body { color: red }");

        assert!(cache.get("/a.css").await.expect("get succeeds").is_none());

        cache.put("/a.css", &snapshot).await.expect("put succeeds");
        let cached = cache
            .get("/a.css")
            .await
            .expect("get succeeds")
            .expect("cached snapshot");
        assert_eq!(cached, snapshot);
    }

    #[tokio::test]
    async fn invalidate_removes_a_single_key() {
        let cache = MemoryCache::new(&CacheConfig::default());
        cache
            .put("/a.css", &sample_snapshot(b"a"))
            .await
            .expect("put succeeds");
        cache
            .put("/b.css", &sample_snapshot(b"b"))
            .await
            .expect("put succeeds");

        cache.invalidate("/a.css").await.expect("invalidate");

        assert!(cache.get("/a.css").await.expect("get").is_none());
        assert!(cache.get("/b.css").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn invalidate_all_empties_the_store() {
        let cache = MemoryCache::new(&CacheConfig::default());
        cache
            .put("/a.css", &sample_snapshot(b"a"))
            .await
            .expect("put succeeds");
        cache
            .put("/b.css", &sample_snapshot(b"b"))
            .await
            .expect("put succeeds");

        cache.invalidate_all().await.expect("invalidate all");

        assert!(cache.get("/a.css").await.expect("get").is_none());
        assert!(cache.get("/b.css").await.expect("get").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn entries_expire_reload_time_seconds_after_the_write() {
        let config = CacheConfig {
            reload_time: 60,
            ..Default::default()
        };
        let cache = MemoryCache::new(&config);
        let snapshot = sample_snapshot(b"a");

        cache.put_stored_at("/fresh.css", &snapshot, Instant::now());
        cache.put_stored_at(
            "/stale.css",
            &snapshot,
            Instant::now() - Duration::from_secs(61),
        );

        assert!(cache.get("/fresh.css").await.expect("get").is_some());
        assert!(cache.get("/stale.css").await.expect("get").is_none());
        // The expired entry was dropped, not just hidden.
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn no_reload_time_means_no_expiry() {
        let cache = MemoryCache::new(&CacheConfig::default());
        let snapshot = sample_snapshot(b"a");
        cache.put_stored_at(
            "/old.css",
            &snapshot,
            Instant::now() - Duration::from_secs(3600),
        );
        assert!(cache.get("/old.css").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn capacity_bound_evicts_least_recently_used() {
        let config = CacheConfig {
            memory_capacity: 2,
            ..Default::default()
        };
        let cache = MemoryCache::new(&config);

        cache
            .put("/a.css", &sample_snapshot(b"a"))
            .await
            .expect("put succeeds");
        cache
            .put("/b.css", &sample_snapshot(b"b"))
            .await
            .expect("put succeeds");
        cache
            .put("/c.css", &sample_snapshot(b"c"))
            .await
            .expect("put succeeds");

        assert!(cache.get("/a.css").await.expect("get").is_none());
        assert!(cache.get("/b.css").await.expect("get").is_some());
        assert!(cache.get("/c.css").await.expect("get").is_some());
    }
}
