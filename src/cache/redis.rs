//! Redis backend over a single managed connection.

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};

use super::backend::{BackendError, ResponseCache, decode_snapshot, remote_ttl_seconds};
use super::config::{CacheConfig, CacheProvider};
use super::snapshot::ResponseSnapshot;

const DEFAULT_REDIS_PORT: u16 = 6379;

/// Single-node Redis adapter. Snapshots travel as `serde_json` bytes; every
/// entry carries a server-side TTL.
pub struct RedisCache {
    manager: ConnectionManager,
    reload_time: i64,
}

impl RedisCache {
    /// Connect eagerly so an unreachable host fails construction instead of
    /// the first request.
    pub async fn connect(config: &CacheConfig) -> Result<Self, BackendError> {
        let hostname = config
            .hostname
            .as_deref()
            .ok_or(BackendError::Config("redis backend requires a hostname"))?;
        let port = config.port.unwrap_or(DEFAULT_REDIS_PORT);
        let url = format!("redis://{hostname}:{port}/");

        let client = redis::Client::open(url.as_str()).map_err(BackendError::connect)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(BackendError::connect)?;

        Ok(Self {
            manager,
            reload_time: config.reload_time,
        })
    }
}

#[async_trait]
impl ResponseCache for RedisCache {
    fn provider(&self) -> CacheProvider {
        CacheProvider::Redis
    }

    async fn put(&self, key: &str, snapshot: &ResponseSnapshot) -> Result<(), BackendError> {
        let payload = serde_json::to_vec(snapshot)?;
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, payload, remote_ttl_seconds(self.reload_time))
            .await
            .map_err(BackendError::operation)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<ResponseSnapshot>, BackendError> {
        let mut conn = self.manager.clone();
        let raw: Option<Vec<u8>> = conn.get(key).await.map_err(BackendError::operation)?;
        Ok(raw.as_deref().and_then(decode_snapshot))
    }

    async fn invalidate(&self, key: &str) -> Result<(), BackendError> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(BackendError::operation)?;
        Ok(())
    }

    async fn invalidate_all(&self) -> Result<(), BackendError> {
        let mut conn = self.manager.clone();
        redis::cmd("FLUSHDB")
            .query_async::<()>(&mut conn)
            .await
            .map_err(BackendError::operation)?;
        Ok(())
    }

    async fn cleanup(&self) {}
}
