//! Redis backend through a connection pool.

use async_trait::async_trait;
use deadpool_redis::{
    Config as PoolConfig, Pool, Runtime,
    redis::{AsyncCommands, cmd},
};

use super::backend::{BackendError, ResponseCache, decode_snapshot, remote_ttl_seconds};
use super::config::{CacheConfig, CacheProvider};
use super::snapshot::ResponseSnapshot;

const DEFAULT_REDIS_PORT: u16 = 6379;

/// Pooled Redis adapter. A pooled connection is acquired per operation and
/// handed back on every exit path when its guard drops.
pub struct RedisPoolCache {
    pool: Pool,
    reload_time: i64,
}

impl RedisPoolCache {
    /// Build the pool and prove a connection can be established; an
    /// unreachable host fails construction instead of the first request.
    pub async fn connect(config: &CacheConfig) -> Result<Self, BackendError> {
        let hostname = config
            .hostname
            .as_deref()
            .ok_or(BackendError::Config("redis backend requires a hostname"))?;
        let port = config.port.unwrap_or(DEFAULT_REDIS_PORT);
        let url = format!("redis://{hostname}:{port}/");

        let pool = PoolConfig::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(BackendError::connect)?;
        {
            let mut conn = pool.get().await.map_err(BackendError::connect)?;
            cmd("PING")
                .query_async::<String>(&mut conn)
                .await
                .map_err(BackendError::connect)?;
        }

        Ok(Self {
            pool,
            reload_time: config.reload_time,
        })
    }
}

#[async_trait]
impl ResponseCache for RedisPoolCache {
    fn provider(&self) -> CacheProvider {
        CacheProvider::RedisPool
    }

    async fn put(&self, key: &str, snapshot: &ResponseSnapshot) -> Result<(), BackendError> {
        let payload = serde_json::to_vec(snapshot)?;
        let mut conn = self.pool.get().await.map_err(BackendError::operation)?;
        conn.set_ex::<_, _, ()>(key, payload, remote_ttl_seconds(self.reload_time))
            .await
            .map_err(BackendError::operation)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<ResponseSnapshot>, BackendError> {
        let mut conn = self.pool.get().await.map_err(BackendError::operation)?;
        let raw: Option<Vec<u8>> = conn.get(key).await.map_err(BackendError::operation)?;
        Ok(raw.as_deref().and_then(decode_snapshot))
    }

    async fn invalidate(&self, key: &str) -> Result<(), BackendError> {
        let mut conn = self.pool.get().await.map_err(BackendError::operation)?;
        conn.del::<_, ()>(key)
            .await
            .map_err(BackendError::operation)?;
        Ok(())
    }

    async fn invalidate_all(&self) -> Result<(), BackendError> {
        let mut conn = self.pool.get().await.map_err(BackendError::operation)?;
        cmd("FLUSHDB")
            .query_async::<()>(&mut conn)
            .await
            .map_err(BackendError::operation)?;
        Ok(())
    }

    async fn cleanup(&self) {
        self.pool.close();
    }
}
