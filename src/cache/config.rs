//! Cache backend selection and construction parameters.

use std::num::NonZeroUsize;
use std::str::FromStr;

use thiserror::Error;

const DEFAULT_MEMORY_CAPACITY: usize = 200;

/// Which key-value engine backs the response cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheProvider {
    /// In-process LRU store; always available, also the degradation target.
    Memory,
    /// Redis over a single managed connection.
    Redis,
    /// Redis through a connection pool.
    RedisPool,
    /// Memcached.
    Memcached,
}

impl CacheProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheProvider::Memory => "memory",
            CacheProvider::Redis => "redis",
            CacheProvider::RedisPool => "redis-pool",
            CacheProvider::Memcached => "memcached",
        }
    }
}

/// Raised for provider names no backend answers to. Surfaced at
/// initialization; the filter refuses to start with ambiguous cache
/// semantics.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown cache provider `{name}` (expected memory, redis, redis-pool, or memcached)")]
pub struct ProviderParseError {
    name: String,
}

impl FromStr for CacheProvider {
    type Err = ProviderParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "default" => Ok(CacheProvider::Memory),
            "redis" => Ok(CacheProvider::Redis),
            "redis-pool" | "redis_pool" => Ok(CacheProvider::RedisPool),
            "memcached" => Ok(CacheProvider::Memcached),
            _ => Err(ProviderParseError {
                name: value.to_string(),
            }),
        }
    }
}

/// Construction parameters for a cache backend. Immutable once built;
/// consumed by [`crate::cache::factory::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub provider: CacheProvider,
    /// Remote engine host; required for every provider except `Memory`.
    pub hostname: Option<String>,
    /// Remote engine port; providers fall back to their conventional port.
    pub port: Option<u16>,
    /// Entry time-to-live in seconds counted from the write. `<= 0` means no
    /// explicit TTL locally and the backend default TTL remotely.
    pub reload_time: i64,
    /// Full-store reset window in seconds. `<= 0` disables periodic resets.
    pub reset_time: i64,
    /// Entry bound for the in-process store.
    pub memory_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            provider: CacheProvider::Memory,
            hostname: None,
            port: None,
            reload_time: 0,
            reset_time: 0,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
        }
    }
}

impl CacheConfig {
    /// Returns the in-process capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
