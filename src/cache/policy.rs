//! Seams to the surrounding policy and resource-resolution layers.
//!
//! The filter consumes these as trait objects; the binary wires in the
//! filesystem-backed implementations from `infra::assets`, and tests supply
//! their own.

use axum::{
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};

/// Boolean gates deciding which requests the cache filter engages for and
/// which response content types may be stored.
pub trait AcceptancePolicy: Send + Sync {
    fn is_path_accepted(&self, path: &str) -> bool;

    fn is_query_string_accepted(&self, query: Option<&str>) -> bool;

    fn is_user_agent_accepted(&self, user_agent: Option<&str>) -> bool;

    /// Allow-list over response content types; only accepted types are ever
    /// stored.
    fn is_content_type_cacheable(&self, content_type: Option<&str>) -> bool;
}

/// Answers "has any resource behind this response changed since time T".
pub trait ModificationOracle: Send + Sync {
    /// The resources contributing to a response for the given request path.
    fn resolve_resources(&self, path: &str) -> Vec<String>;

    /// Whether any resource was modified after `since_ms` (epoch millis).
    fn modified_since(&self, resources: &[String], since_ms: i64) -> bool;

    /// Latest modification instant across the resources, in epoch millis.
    fn last_modified(&self, resources: &[String]) -> Option<i64>;
}

/// Outcome of a conditional-request probe.
#[derive(Debug, Clone, Default)]
pub struct Conditional {
    pub not_modified: bool,
    pub etag: Option<String>,
}

/// Conditional-request handling (If-None-Match / If-Modified-Since),
/// consulted before any cached body is replayed.
pub trait ConditionalGate: Send + Sync {
    fn check(&self, headers: &HeaderMap, resources: &[String]) -> Conditional;

    /// Build the 304 answered when [`check`](ConditionalGate::check) reports
    /// not-modified.
    fn respond_not_modified(&self, conditional: &Conditional) -> Response {
        let mut response = StatusCode::NOT_MODIFIED.into_response();
        if let Some(etag) = &conditional.etag
            && let Ok(value) = etag.parse()
        {
            response.headers_mut().insert(header::ETAG, value);
        }
        response
    }
}

/// Policy that accepts every request and any content type.
pub struct AcceptAll;

impl AcceptancePolicy for AcceptAll {
    fn is_path_accepted(&self, _path: &str) -> bool {
        true
    }

    fn is_query_string_accepted(&self, _query: Option<&str>) -> bool {
        true
    }

    fn is_user_agent_accepted(&self, _user_agent: Option<&str>) -> bool {
        true
    }

    fn is_content_type_cacheable(&self, content_type: Option<&str>) -> bool {
        content_type.is_some()
    }
}

/// Oracle for deployments without a resource-resolution layer: nothing
/// resolves and nothing ever counts as modified.
pub struct NullOracle;

impl ModificationOracle for NullOracle {
    fn resolve_resources(&self, _path: &str) -> Vec<String> {
        Vec::new()
    }

    fn modified_since(&self, _resources: &[String], _since_ms: i64) -> bool {
        false
    }

    fn last_modified(&self, _resources: &[String]) -> Option<i64> {
        None
    }
}

/// Gate that never short-circuits with a 304.
pub struct NoConditional;

impl ConditionalGate for NoConditional {
    fn check(&self, _headers: &HeaderMap, _resources: &[String]) -> Conditional {
        Conditional::default()
    }
}
