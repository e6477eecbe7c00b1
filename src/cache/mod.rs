//! Scorta response-cache subsystem.
//!
//! Intercepts request/response pairs for static-asset-like resources and
//! serves previously captured responses until the backing resources change,
//! an operator signal fires, or a configured time-to-live elapses. The same
//! policy runs over an in-process store or a remote key-value engine.
//!
//! ## Configuration
//!
//! Backend selection and TTLs come from `scorta.toml`:
//!
//! ```toml
//! [cache]
//! provider = "memory"        # memory | redis | redis-pool | memcached
//! reload_time_seconds = 0    # <= 0: no entry TTL locally
//! reset_time_seconds = 0     # <= 0: no periodic full reset
//! key_format = "URI"         # e.g. "queryString, header=Accept-Encoding"
//! ```

mod backend;
mod config;
pub mod factory;
mod filter;
mod key;
mod lock;
mod memcached;
mod memory;
mod policy;
mod redis;
mod redis_pool;
mod snapshot;

pub use backend::{BackendError, ResponseCache};
pub use config::{CacheConfig, CacheProvider, ProviderParseError};
pub use filter::{
    CACHE_MARKER_HEADER, CacheOutcome, FilterInitError, FilterOptions, FilterState,
    PARAM_DEBUG, PARAM_EXPIRE_CACHE, PARAM_RESET_CACHE, PARAM_SKIP_CACHE, response_cache_filter,
};
pub use key::{KeyFormat, KeyFormatError};
pub use memcached::MemcachedCache;
pub use memory::MemoryCache;
pub use policy::{
    AcceptAll, AcceptancePolicy, Conditional, ConditionalGate, ModificationOracle, NoConditional,
    NullOracle,
};
pub use redis::RedisCache;
pub use redis_pool::RedisPoolCache;
pub use snapshot::{HeaderCapture, ResponseSnapshot};

pub(crate) use snapshot::{format_http_date, parse_http_date};
