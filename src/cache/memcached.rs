//! Memcached backend over the blocking client.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task;

use super::backend::{BackendError, ResponseCache, decode_snapshot, remote_ttl_seconds};
use super::config::{CacheConfig, CacheProvider};
use super::snapshot::ResponseSnapshot;

const DEFAULT_MEMCACHED_PORT: u16 = 11211;

/// Memcached adapter. The client is synchronous, so every operation runs on
/// the blocking thread pool.
pub struct MemcachedCache {
    client: Arc<memcache::Client>,
    reload_time: i64,
}

impl MemcachedCache {
    pub async fn connect(config: &CacheConfig) -> Result<Self, BackendError> {
        let hostname = config
            .hostname
            .as_deref()
            .ok_or(BackendError::Config("memcached backend requires a hostname"))?;
        let port = config.port.unwrap_or(DEFAULT_MEMCACHED_PORT);
        let url = format!("memcache://{hostname}:{port}?timeout=5");

        let client = task::spawn_blocking(move || memcache::Client::connect(url))
            .await
            .map_err(BackendError::task)?
            .map_err(BackendError::connect)?;

        Ok(Self {
            client: Arc::new(client),
            reload_time: config.reload_time,
        })
    }
}

#[async_trait]
impl ResponseCache for MemcachedCache {
    fn provider(&self) -> CacheProvider {
        CacheProvider::Memcached
    }

    async fn put(&self, key: &str, snapshot: &ResponseSnapshot) -> Result<(), BackendError> {
        let payload = serde_json::to_vec(snapshot)?;
        let expiry = remote_ttl_seconds(self.reload_time) as u32;
        let client = Arc::clone(&self.client);
        let key = key.to_string();
        task::spawn_blocking(move || client.set(&key, &payload[..], expiry))
            .await
            .map_err(BackendError::task)?
            .map_err(BackendError::operation)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<ResponseSnapshot>, BackendError> {
        let client = Arc::clone(&self.client);
        let key = key.to_string();
        let raw: Option<Vec<u8>> = task::spawn_blocking(move || client.get(&key))
            .await
            .map_err(BackendError::task)?
            .map_err(BackendError::operation)?;
        Ok(raw.as_deref().and_then(decode_snapshot))
    }

    async fn invalidate(&self, key: &str) -> Result<(), BackendError> {
        let client = Arc::clone(&self.client);
        let key = key.to_string();
        task::spawn_blocking(move || client.delete(&key))
            .await
            .map_err(BackendError::task)?
            .map_err(BackendError::operation)?;
        Ok(())
    }

    async fn invalidate_all(&self) -> Result<(), BackendError> {
        let client = Arc::clone(&self.client);
        task::spawn_blocking(move || client.flush())
            .await
            .map_err(BackendError::task)?
            .map_err(BackendError::operation)?;
        Ok(())
    }

    async fn cleanup(&self) {}
}
