//! The capability interface every cache backend satisfies.

use std::fmt::Display;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use super::config::CacheProvider;
use super::snapshot::ResponseSnapshot;

/// Errors raised by backend construction or operations.
///
/// Inside the request path these are always caught and downgraded to a
/// cache miss or no-op; they only propagate out of backend constructors,
/// where the factory converts them into a local fallback.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid cache backend configuration: {0}")]
    Config(&'static str),
    #[error("cache backend connection failed: {0}")]
    Connect(String),
    #[error("cache backend operation failed: {0}")]
    Operation(String),
    #[error("cache value serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("cache backend task failed: {0}")]
    Task(String),
}

impl BackendError {
    pub(crate) fn connect(err: impl Display) -> Self {
        BackendError::Connect(err.to_string())
    }

    pub(crate) fn operation(err: impl Display) -> Self {
        BackendError::Operation(err.to_string())
    }

    pub(crate) fn task(err: impl Display) -> Self {
        BackendError::Task(err.to_string())
    }
}

/// Key→snapshot store behind the response cache filter.
///
/// A value stored with [`put`](ResponseCache::put) is observable by a later
/// [`get`](ResponseCache::get) with the same key on the same logical store
/// until it is evicted, invalidated, or its TTL elapses. Implementations are
/// safe for concurrent callers without external locking.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// The provider kind this backend was built for.
    fn provider(&self) -> CacheProvider;

    async fn put(&self, key: &str, snapshot: &ResponseSnapshot) -> Result<(), BackendError>;

    async fn get(&self, key: &str) -> Result<Option<ResponseSnapshot>, BackendError>;

    async fn invalidate(&self, key: &str) -> Result<(), BackendError>;

    async fn invalidate_all(&self) -> Result<(), BackendError>;

    /// Release backend resources. Terminal: no operation may follow.
    async fn cleanup(&self);
}

/// Decode a snapshot read back from a remote store. A payload that no longer
/// deserializes is treated as absent, not as an error.
pub(crate) fn decode_snapshot(bytes: &[u8]) -> Option<ResponseSnapshot> {
    match serde_json::from_slice(bytes) {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            warn!(error = %err, "discarding undecodable cached response payload");
            None
        }
    }
}

/// TTL applied to remote entries when no reload time is configured; remote
/// engines require a finite expiry.
pub(crate) const DEFAULT_REMOTE_TTL_SECS: u64 = 3600;

pub(crate) fn remote_ttl_seconds(reload_time: i64) -> u64 {
    if reload_time > 0 {
        reload_time as u64
    } else {
        DEFAULT_REMOTE_TTL_SECS
    }
}
