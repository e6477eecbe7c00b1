//! Filesystem asset serving and the filesystem-backed cache collaborators.
//!
//! The asset handler is the downstream producer the cache filter fronts;
//! [`FsOracle`] and [`FsConditionalGate`] answer freshness and conditional
//! questions from file metadata, and [`SettingsPolicy`] turns the asset
//! settings into acceptance gates.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::debug;

use crate::cache::{
    AcceptancePolicy, Conditional, ConditionalGate, ModificationOracle, format_http_date,
    parse_http_date,
};
use crate::config::AssetSettings;

/// Serves files beneath the configured asset root.
#[derive(Clone)]
pub struct AssetService {
    inner: Arc<AssetInner>,
}

struct AssetInner {
    root: PathBuf,
    expires_minutes: u64,
}

impl AssetService {
    pub fn new(settings: &AssetSettings) -> Self {
        Self {
            inner: Arc::new(AssetInner {
                root: settings.root.clone(),
                expires_minutes: settings.expires_minutes,
            }),
        }
    }
}

/// Fallback handler serving static assets.
pub async fn serve_asset(State(assets): State<AssetService>, request: Request<Body>) -> Response {
    let Some(full_path) = resolve_under_root(&assets.inner.root, request.uri().path()) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let contents = match tokio::fs::read(&full_path).await {
        Ok(contents) => contents,
        Err(err) => {
            debug!(path = %full_path.display(), error = %err, "asset not readable");
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    let modified_ms = tokio::fs::metadata(&full_path)
        .await
        .ok()
        .and_then(|meta| meta.modified().ok())
        .and_then(epoch_ms);

    build_asset_response(
        Bytes::from(contents),
        &full_path,
        modified_ms,
        assets.inner.expires_minutes,
    )
}

fn build_asset_response(
    bytes: Bytes,
    path: &Path,
    modified_ms: Option<i64>,
    expires_minutes: u64,
) -> Response {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let len = bytes.len();

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    apply_client_cache_headers(headers, expires_minutes);
    if let Some(modified_ms) = modified_ms
        && let Some(date) = format_http_date(modified_ms)
        && let Ok(value) = HeaderValue::from_str(&date)
    {
        headers.insert(header::LAST_MODIFIED, value);
    }

    response
}

fn apply_client_cache_headers(headers: &mut HeaderMap, expires_minutes: u64) {
    let max_age = expires_minutes * 60;
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={max_age}")) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    let expires_at_ms = now_epoch_ms() + (max_age as i64) * 1000;
    if let Some(date) = format_http_date(expires_at_ms)
        && let Ok(value) = HeaderValue::from_str(&date)
    {
        headers.insert(header::EXPIRES, value);
    }
}

/// Resolve a request path to a file beneath `root`, refusing traversal.
fn resolve_under_root(root: &Path, request_path: &str) -> Option<PathBuf> {
    let candidate = request_path.trim_start_matches('/');
    if candidate.is_empty() || candidate.ends_with('/') {
        return None;
    }
    if candidate.split(['/', '\\']).any(|segment| segment == "..") {
        return None;
    }
    Some(root.join(candidate))
}

fn epoch_ms(instant: SystemTime) -> Option<i64> {
    instant
        .duration_since(SystemTime::UNIX_EPOCH)
        .ok()
        .map(|elapsed| elapsed.as_millis() as i64)
}

fn now_epoch_ms() -> i64 {
    epoch_ms(SystemTime::now()).unwrap_or(0)
}

fn file_mtime_ms(resource: &str) -> Option<i64> {
    std::fs::metadata(resource)
        .ok()
        .and_then(|meta| meta.modified().ok())
        .and_then(epoch_ms)
}

// ============================================================================
// Cache collaborators backed by the filesystem
// ============================================================================

/// Modification oracle answering from file modification times.
#[derive(Clone)]
pub struct FsOracle {
    root: PathBuf,
}

impl FsOracle {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl ModificationOracle for FsOracle {
    fn resolve_resources(&self, path: &str) -> Vec<String> {
        match resolve_under_root(&self.root, path) {
            Some(resolved) => vec![resolved.to_string_lossy().into_owned()],
            None => Vec::new(),
        }
    }

    fn modified_since(&self, resources: &[String], since_ms: i64) -> bool {
        resources
            .iter()
            .any(|resource| file_mtime_ms(resource).is_some_and(|mtime| mtime > since_ms))
    }

    fn last_modified(&self, resources: &[String]) -> Option<i64> {
        resources
            .iter()
            .filter_map(|resource| file_mtime_ms(resource))
            .max()
    }
}

/// Conditional-request gate: weak ETag from aggregate length and latest
/// mtime, If-Modified-Since at second granularity.
pub struct FsConditionalGate {
    expires_minutes: u64,
}

impl FsConditionalGate {
    pub fn new(expires_minutes: u64) -> Self {
        Self { expires_minutes }
    }

    fn current_etag(resources: &[String]) -> Option<(String, i64)> {
        let mut total_len: u64 = 0;
        let mut latest_ms: i64 = 0;
        let mut seen = false;
        for resource in resources {
            let meta = std::fs::metadata(resource).ok()?;
            total_len = total_len.wrapping_add(meta.len());
            if let Some(mtime) = meta.modified().ok().and_then(epoch_ms) {
                latest_ms = latest_ms.max(mtime);
            }
            seen = true;
        }
        if !seen {
            return None;
        }
        Some((format!("W/\"{total_len:x}-{latest_ms:x}\""), latest_ms))
    }
}

impl ConditionalGate for FsConditionalGate {
    fn check(&self, headers: &HeaderMap, resources: &[String]) -> Conditional {
        let Some((etag, latest_ms)) = Self::current_etag(resources) else {
            return Conditional::default();
        };

        let etag_match = headers
            .get(header::IF_NONE_MATCH)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|candidates| {
                candidates
                    .split(',')
                    .any(|candidate| candidate.trim() == etag || candidate.trim() == "*")
            });

        let date_match = headers
            .get(header::IF_MODIFIED_SINCE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date)
            .is_some_and(|since_ms| since_ms / 1000 >= latest_ms / 1000);

        Conditional {
            not_modified: etag_match || date_match,
            etag: Some(etag),
        }
    }

    fn respond_not_modified(&self, conditional: &Conditional) -> Response {
        let mut response = StatusCode::NOT_MODIFIED.into_response();
        let headers = response.headers_mut();
        if let Some(etag) = &conditional.etag
            && let Ok(value) = HeaderValue::from_str(etag)
        {
            headers.insert(header::ETAG, value);
        }
        apply_client_cache_headers(headers, self.expires_minutes);
        response
    }
}

/// Acceptance gates derived from the asset settings.
pub struct SettingsPolicy {
    accepted_extensions: Vec<String>,
    denied_user_agents: Vec<String>,
    denied_query_markers: Vec<String>,
    accepted_mimes: Vec<String>,
}

impl SettingsPolicy {
    pub fn new(settings: &AssetSettings) -> Self {
        Self {
            accepted_extensions: settings
                .accepted_extensions
                .iter()
                .map(|ext| ext.to_ascii_lowercase())
                .collect(),
            denied_user_agents: settings
                .denied_user_agents
                .iter()
                .map(|ua| ua.to_ascii_lowercase())
                .collect(),
            denied_query_markers: settings.denied_query_markers.clone(),
            accepted_mimes: settings
                .accepted_mimes
                .iter()
                .map(|mime| mime.to_ascii_lowercase())
                .collect(),
        }
    }
}

impl AcceptancePolicy for SettingsPolicy {
    fn is_path_accepted(&self, path: &str) -> bool {
        if self.accepted_extensions.is_empty() {
            return true;
        }
        path.rsplit_once('.')
            .is_some_and(|(_, ext)| {
                self.accepted_extensions
                    .iter()
                    .any(|accepted| accepted.eq_ignore_ascii_case(ext))
            })
    }

    fn is_query_string_accepted(&self, query: Option<&str>) -> bool {
        match query {
            None => true,
            Some(query) => !self
                .denied_query_markers
                .iter()
                .any(|marker| query.contains(marker.as_str())),
        }
    }

    fn is_user_agent_accepted(&self, user_agent: Option<&str>) -> bool {
        match user_agent {
            None => true,
            Some(user_agent) => {
                let lowered = user_agent.to_ascii_lowercase();
                !self
                    .denied_user_agents
                    .iter()
                    .any(|denied| lowered.contains(denied.as_str()))
            }
        }
    }

    fn is_content_type_cacheable(&self, content_type: Option<&str>) -> bool {
        let Some(content_type) = content_type else {
            return false;
        };
        if self.accepted_mimes.is_empty() {
            return true;
        }
        let base = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim()
            .to_ascii_lowercase();
        self.accepted_mimes.iter().any(|mime| *mime == base)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::AssetSettings;

    use super::*;

    fn settings() -> AssetSettings {
        AssetSettings {
            root: PathBuf::from("assets"),
            accepted_extensions: vec!["js".to_string(), "css".to_string()],
            denied_user_agents: vec!["badbot".to_string()],
            denied_query_markers: vec!["nocache".to_string()],
            accepted_mimes: vec!["text/css".to_string(), "application/javascript".to_string()],
            expires_minutes: 60,
        }
    }

    #[test]
    fn traversal_paths_do_not_resolve() {
        let root = Path::new("/srv/assets");
        assert!(resolve_under_root(root, "/../etc/passwd").is_none());
        assert!(resolve_under_root(root, "/a/../../etc/passwd").is_none());
        assert!(resolve_under_root(root, "/").is_none());
        assert!(resolve_under_root(root, "/css/").is_none());
        assert_eq!(
            resolve_under_root(root, "/css/site.css"),
            Some(PathBuf::from("/srv/assets/css/site.css"))
        );
    }

    #[test]
    fn path_acceptance_follows_extension_list() {
        let policy = SettingsPolicy::new(&settings());
        assert!(policy.is_path_accepted("/bundle.js"));
        assert!(policy.is_path_accepted("/site.CSS"));
        assert!(!policy.is_path_accepted("/report.pdf"));
        assert!(!policy.is_path_accepted("/noext"));
    }

    #[test]
    fn empty_extension_list_accepts_everything() {
        let mut cfg = settings();
        cfg.accepted_extensions.clear();
        let policy = SettingsPolicy::new(&cfg);
        assert!(policy.is_path_accepted("/anything.bin"));
        assert!(policy.is_path_accepted("/noext"));
    }

    #[test]
    fn user_agent_and_query_denials() {
        let policy = SettingsPolicy::new(&settings());
        assert!(policy.is_user_agent_accepted(Some("Mozilla/5.0")));
        assert!(!policy.is_user_agent_accepted(Some("BadBot/2.0")));
        assert!(policy.is_user_agent_accepted(None));
        assert!(policy.is_query_string_accepted(Some("v=3")));
        assert!(!policy.is_query_string_accepted(Some("v=3&nocache=1")));
        assert!(policy.is_query_string_accepted(None));
    }

    #[test]
    fn content_type_allow_list_ignores_parameters() {
        let policy = SettingsPolicy::new(&settings());
        assert!(policy.is_content_type_cacheable(Some("text/css")));
        assert!(policy.is_content_type_cacheable(Some("text/css; charset=utf-8")));
        assert!(!policy.is_content_type_cacheable(Some("text/plain")));
        assert!(!policy.is_content_type_cacheable(None));
    }

    #[test]
    fn conditional_gate_matches_etag_and_date() {
        // Use this source file as a stable on-disk resource.
        let resource = file!().to_string();
        let resources = vec![resource];
        let gate = FsConditionalGate::new(60);

        let (etag, latest_ms) =
            FsConditionalGate::current_etag(&resources).expect("source file has metadata");

        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, etag.parse().expect("valid header"));
        let conditional = gate.check(&headers, &resources);
        assert!(conditional.not_modified);
        assert_eq!(conditional.etag.as_deref(), Some(etag.as_str()));

        let mut headers = HeaderMap::new();
        let since = format_http_date(latest_ms).expect("renders");
        headers.insert(header::IF_MODIFIED_SINCE, since.parse().expect("valid"));
        assert!(gate.check(&headers, &resources).not_modified);

        let headers = HeaderMap::new();
        assert!(!gate.check(&headers, &resources).not_modified);
    }

    #[test]
    fn conditional_gate_without_resources_is_a_pass() {
        let gate = FsConditionalGate::new(60);
        let conditional = gate.check(&HeaderMap::new(), &[]);
        assert!(!conditional.not_modified);
        assert!(conditional.etag.is_none());
    }
}
