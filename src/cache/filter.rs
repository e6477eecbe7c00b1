//! The request decision logic: serve-from-cache, bypass, invalidate, or
//! populate, reported through the `x-response-cache` marker header.

use std::sync::{
    Arc, RwLock,
    atomic::{AtomicBool, AtomicI64, Ordering},
};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, instrument, trace};

use super::backend::ResponseCache;
use super::config::CacheConfig;
use super::factory;
use super::key::{KeyFormat, KeyFormatError};
use super::lock::{rw_read, rw_write};
use super::policy::{AcceptancePolicy, ConditionalGate, ModificationOracle};
use super::snapshot::ResponseSnapshot;

const SOURCE: &str = "cache::filter";

/// Response header carrying the per-request cache decision.
pub const CACHE_MARKER_HEADER: &str = "x-response-cache";

/// Reserved query parameter evicting the current request's cache key.
pub const PARAM_EXPIRE_CACHE: &str = "_expirecache_";
/// Reserved query parameter flushing the whole store.
pub const PARAM_RESET_CACHE: &str = "_resetcache_";
/// Reserved query parameter bypassing the cache for this request.
pub const PARAM_SKIP_CACHE: &str = "_skipcache_";
/// Debug alias of [`PARAM_SKIP_CACHE`].
pub const PARAM_DEBUG: &str = "_dbg_";

const DEFAULT_BODY_LIMIT_BYTES: usize = 8 * 1024 * 1024;

/// Per-request outcome of the cache policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Found,
    NotFound,
    Added,
    Skipped,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOutcome::Found => "FOUND",
            CacheOutcome::NotFound => "NOT_FOUND",
            CacheOutcome::Added => "ADDED",
            CacheOutcome::Skipped => "SKIPPED",
        }
    }

    fn record(&self) {
        match self {
            CacheOutcome::Found => counter!("scorta_cache_found_total").increment(1),
            CacheOutcome::NotFound => counter!("scorta_cache_not_found_total").increment(1),
            CacheOutcome::Added => counter!("scorta_cache_added_total").increment(1),
            CacheOutcome::Skipped => counter!("scorta_cache_skipped_total").increment(1),
        }
    }
}

/// Raised when the filter cannot start with the configuration it was given.
#[derive(Debug, Error)]
pub enum FilterInitError {
    #[error("invalid cache key format")]
    KeyFormat(#[from] KeyFormatError),
}

/// Everything the filter needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct FilterOptions {
    pub cache: CacheConfig,
    /// Comma-separated key-format selector list; see [`KeyFormat::parse`].
    pub key_format: String,
    /// Largest downstream body the filter will buffer for capture.
    pub body_limit_bytes: usize,
    /// Invalidate the whole store once at startup.
    pub flush_on_start: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            key_format: "URI".to_string(),
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            flush_on_start: false,
        }
    }
}

struct FilterInner {
    backend: RwLock<Arc<dyn ResponseCache>>,
    key_format: KeyFormat,
    reset_time: i64,
    body_limit_bytes: usize,
    last_reset_ms: AtomicI64,
    cleaned_up: AtomicBool,
    policy: Arc<dyn AcceptancePolicy>,
    oracle: Arc<dyn ModificationOracle>,
    conditional: Arc<dyn ConditionalGate>,
}

/// Shared state for [`response_cache_filter`]. One instance lives for the
/// server's lifetime; cloning is cheap.
#[derive(Clone)]
pub struct FilterState {
    inner: Arc<FilterInner>,
}

impl FilterState {
    /// Validate the key format, build the backend (degrading to the local
    /// store on remote failure) and assemble the filter state.
    pub async fn new(
        options: FilterOptions,
        policy: Arc<dyn AcceptancePolicy>,
        oracle: Arc<dyn ModificationOracle>,
        conditional: Arc<dyn ConditionalGate>,
    ) -> Result<Self, FilterInitError> {
        let key_format = KeyFormat::parse(&options.key_format)?;
        let backend = factory::build(&options.cache).await;

        if options.flush_on_start
            && let Err(err) = backend.invalidate_all().await
        {
            debug!(error = %err, "startup cache flush failed");
        }

        Ok(Self {
            inner: Arc::new(FilterInner {
                backend: RwLock::new(backend),
                key_format,
                reset_time: options.cache.reset_time,
                body_limit_bytes: options.body_limit_bytes,
                last_reset_ms: AtomicI64::new(now_ms()),
                cleaned_up: AtomicBool::new(false),
                policy,
                oracle,
                conditional,
            }),
        })
    }

    /// Re-apply configuration. The live backend is kept when the provider
    /// kind is unchanged; otherwise a new backend is built and the old one
    /// is cleaned up.
    pub async fn apply_config(&self, config: &CacheConfig) {
        let current = self.backend();
        if factory::is_same_provider(current.as_ref(), config.provider) {
            return;
        }
        let replacement = factory::build(config).await;
        let previous = {
            let mut guard = rw_write(&self.inner.backend, SOURCE, "apply_config");
            std::mem::replace(&mut *guard, replacement)
        };
        previous.cleanup().await;
    }

    /// Release backend resources. Safe to call more than once; only the
    /// first call reaches the backend.
    pub async fn shutdown(&self) {
        if self.inner.cleaned_up.swap(true, Ordering::SeqCst) {
            return;
        }
        self.backend().cleanup().await;
    }

    /// Flush every stored response.
    pub async fn invalidate_cache(&self) {
        if let Err(err) = self.backend().invalidate_all().await {
            debug!(error = %err, "cache flush failed");
        }
    }

    fn backend(&self) -> Arc<dyn ResponseCache> {
        rw_read(&self.inner.backend, SOURCE, "backend").clone()
    }
}

/// Middleware deciding per request whether to serve from cache, bypass,
/// invalidate, or capture and store the downstream response.
///
/// Backend failures inside this function never fail the request; they
/// downgrade to miss or pass-through behavior.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_filter(
    State(state): State<FilterState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let inner = &state.inner;
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    if !inner.policy.is_path_accepted(&path)
        || !inner.policy.is_query_string_accepted(query.as_deref())
        || !inner.policy.is_user_agent_accepted(user_agent.as_deref())
    {
        debug!(query = query.as_deref(), "path, query string or user agent not accepted");
        let mut response = next.run(request).await;
        mark(&mut response, CacheOutcome::Skipped);
        return response;
    }

    let key = inner.key_format.derive(&request);
    let backend = state.backend();

    let snapshot = match backend.get(&key).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            trace!(error = %err, "cache read failed; treating as miss");
            counter!("scorta_cache_backend_error_total").increment(1);
            None
        }
    };

    let expire = has_query_param(query.as_deref(), PARAM_EXPIRE_CACHE);
    if expire {
        trace!(%key, "evicting cache entry on request signal");
        if let Err(err) = backend.invalidate(&key).await {
            trace!(error = %err, "cache eviction failed");
        }
    }

    let now = now_ms();
    let reset = has_query_param(query.as_deref(), PARAM_RESET_CACHE)
        || (inner.reset_time > 0
            && (now - inner.last_reset_ms.load(Ordering::Relaxed)) / 1000 > inner.reset_time);
    if reset {
        trace!("resetting whole cache");
        if let Err(err) = backend.invalidate_all().await {
            trace!(error = %err, "cache reset failed");
        }
        inner.last_reset_ms.store(now, Ordering::Relaxed);
    }

    if has_query_param(query.as_deref(), PARAM_DEBUG)
        || has_query_param(query.as_deref(), PARAM_SKIP_CACHE)
    {
        trace!("skipping cache on request signal");
        let mut response = next.run(request).await;
        mark(&mut response, CacheOutcome::Skipped);
        return response;
    }

    let resources = inner.oracle.resolve_resources(&path);

    let conditional = inner.conditional.check(request.headers(), &resources);
    if conditional.not_modified {
        trace!("resources not modified; answering 304");
        let mut response = inner.conditional.respond_not_modified(&conditional);
        mark(&mut response, CacheOutcome::Skipped);
        return response;
    }

    let mut found = None;
    if let Some(snapshot) = snapshot {
        if !resources.is_empty()
            && inner
                .oracle
                .modified_since(&resources, snapshot.captured_at_ms())
        {
            trace!(%key, "resources modified since capture; invalidating entry");
            if let Err(err) = backend.invalidate(&key).await {
                trace!(error = %err, "cache eviction failed");
            }
        } else {
            found = Some(snapshot);
        }
    }

    if let Some(snapshot) = found {
        debug!(outcome = "hit", "serving cached response");
        CacheOutcome::Found.record();
        let mut response = snapshot.replay();
        mark(&mut response, CacheOutcome::Found);
        return response;
    }

    debug!(outcome = "miss", "executing downstream handler");
    let response = next.run(request).await;

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let eligible = response.status() == StatusCode::OK
        && inner.policy.is_content_type_cacheable(content_type.as_deref())
        && !expire
        && !reset;

    if !eligible {
        trace!(
            status = response.status().as_u16(),
            content_type = content_type.as_deref(),
            expire,
            reset,
            "response not stored"
        );
        CacheOutcome::NotFound.record();
        let mut response = response;
        mark(&mut response, CacheOutcome::NotFound);
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, inner.body_limit_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!(error = %err, "failed to buffer downstream response body");
            let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
            mark(&mut response, CacheOutcome::NotFound);
            return response;
        }
    };

    let captured_at = inner.oracle.last_modified(&resources).unwrap_or(now);
    let snapshot = ResponseSnapshot::capture(&parts, bytes.clone(), captured_at);

    let outcome = match backend.put(&key, &snapshot).await {
        Ok(()) => {
            debug!(%key, "cached response added");
            CacheOutcome::Added
        }
        Err(err) => {
            debug!(error = %err, %key, "failed to add cached response");
            counter!("scorta_cache_backend_error_total").increment(1);
            CacheOutcome::NotFound
        }
    };
    outcome.record();

    let mut response = Response::from_parts(parts, Body::from(bytes));
    mark(&mut response, outcome);
    response
}

fn mark(response: &mut Response, outcome: CacheOutcome) {
    response
        .headers_mut()
        .insert(CACHE_MARKER_HEADER, HeaderValue::from_static(outcome.as_str()));
}

fn has_query_param(query: Option<&str>, name: &str) -> bool {
    let Some(query) = query else { return false };
    url::form_urlencoded::parse(query.as_bytes()).any(|(param, _)| param == name)
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_param_detection_handles_bare_and_valued_params() {
        assert!(has_query_param(Some("_dbg_"), PARAM_DEBUG));
        assert!(has_query_param(Some("_dbg_=1"), PARAM_DEBUG));
        assert!(has_query_param(Some("a=1&_resetcache_=now"), PARAM_RESET_CACHE));
        assert!(!has_query_param(Some("a=_dbg_"), PARAM_DEBUG));
        assert!(!has_query_param(None, PARAM_DEBUG));
    }

    #[test]
    fn outcome_marker_values() {
        assert_eq!(CacheOutcome::Found.as_str(), "FOUND");
        assert_eq!(CacheOutcome::NotFound.as_str(), "NOT_FOUND");
        assert_eq!(CacheOutcome::Added.as_str(), "ADDED");
        assert_eq!(CacheOutcome::Skipped.as_str(), "SKIPPED");
    }
}
