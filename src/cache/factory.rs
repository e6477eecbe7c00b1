//! Backend construction with graceful degradation.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use super::backend::{BackendError, ResponseCache};
use super::config::{CacheConfig, CacheProvider};
use super::memcached::MemcachedCache;
use super::memory::MemoryCache;
use super::redis::RedisCache;
use super::redis_pool::RedisPoolCache;

/// Build the backend the configuration asks for.
///
/// Never fails: a remote backend that cannot be constructed (bad host,
/// connection refused) degrades to the in-process store so the filter keeps
/// functioning with local-only caching.
pub async fn build(config: &CacheConfig) -> Arc<dyn ResponseCache> {
    match try_build(config).await {
        Ok(cache) => {
            debug!(provider = config.provider.as_str(), "cache backend ready");
            cache
        }
        Err(err) => {
            warn!(
                provider = config.provider.as_str(),
                error = %err,
                "cache backend construction failed; falling back to in-process cache"
            );
            counter!("scorta_cache_backend_fallback_total").increment(1);
            Arc::new(MemoryCache::new(config))
        }
    }
}

async fn try_build(config: &CacheConfig) -> Result<Arc<dyn ResponseCache>, BackendError> {
    Ok(match config.provider {
        CacheProvider::Memory => Arc::new(MemoryCache::new(config)),
        CacheProvider::Redis => Arc::new(RedisCache::connect(config).await?),
        CacheProvider::RedisPool => Arc::new(RedisPoolCache::connect(config).await?),
        CacheProvider::Memcached => Arc::new(MemcachedCache::connect(config).await?),
    })
}

/// Whether a live backend already satisfies the desired provider kind, so a
/// re-applied configuration does not tear down a working store.
pub fn is_same_provider(cache: &dyn ResponseCache, provider: CacheProvider) -> bool {
    cache.provider() == provider
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_provider_builds_directly() {
        let cache = build(&CacheConfig::default()).await;
        assert_eq!(cache.provider(), CacheProvider::Memory);
    }

    #[tokio::test]
    async fn unreachable_redis_falls_back_to_memory() {
        let config = CacheConfig {
            provider: CacheProvider::Redis,
            hostname: Some("127.0.0.1".to_string()),
            // Nothing listens on port 1; construction must fail fast.
            port: Some(1),
            ..Default::default()
        };
        let cache = build(&config).await;
        assert_eq!(cache.provider(), CacheProvider::Memory);
    }

    #[tokio::test]
    async fn missing_hostname_falls_back_to_memory() {
        let config = CacheConfig {
            provider: CacheProvider::Memcached,
            hostname: None,
            ..Default::default()
        };
        let cache = build(&config).await;
        assert_eq!(cache.provider(), CacheProvider::Memory);
    }

    #[tokio::test]
    async fn same_provider_check_matches_kind() {
        let cache = build(&CacheConfig::default()).await;
        assert!(is_same_provider(cache.as_ref(), CacheProvider::Memory));
        assert!(!is_same_provider(cache.as_ref(), CacheProvider::Redis));
    }
}
