//! Cache-key derivation from request attributes.
//!
//! A key always starts with the request path. A comma-separated format
//! string appends further components in declared order, e.g.
//! `"queryString, header=Accept-Encoding"`.

use axum::http::Request;
use thiserror::Error;

/// A single selector from the key format string.
#[derive(Debug, Clone, PartialEq, Eq)]
enum KeyComponent {
    QueryString,
    Header(String),
    Parameter(String),
}

/// Raised at initialization for selectors no component answers to.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unrecognized cache key selector `{selector}`")]
pub struct KeyFormatError {
    selector: String,
}

/// Parsed, validated cache-key format. Selector order is significant and is
/// reproduced exactly in every derived key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFormat {
    components: Vec<KeyComponent>,
}

impl KeyFormat {
    /// Parse a comma-separated selector list. The empty string and the
    /// literal `URI` selector contribute nothing beyond the path base.
    pub fn parse(format: &str) -> Result<Self, KeyFormatError> {
        let mut components = Vec::new();
        for raw in format.split(',') {
            let selector = raw.trim();
            if selector.is_empty() || selector.eq_ignore_ascii_case("uri") {
                continue;
            }
            let lowered = selector.to_ascii_lowercase();
            if lowered == "querystring" {
                components.push(KeyComponent::QueryString);
            } else if let Some(name) = lowered.strip_prefix("header=") {
                components.push(KeyComponent::Header(name.trim().to_string()));
            } else if let Some(name) = lowered.strip_prefix("parameter=") {
                components.push(KeyComponent::Parameter(name.trim().to_string()));
            } else {
                return Err(KeyFormatError {
                    selector: selector.to_string(),
                });
            }
        }
        Ok(Self { components })
    }

    /// Derive the cache key for a request: the path, then `+<component>` per
    /// selector in declared order. An absent header contributes the literal
    /// `null`, matching the key layout existing deployments depend on.
    pub fn derive<B>(&self, request: &Request<B>) -> String {
        let mut key = String::from(request.uri().path());
        for component in &self.components {
            match component {
                KeyComponent::QueryString => {
                    if let Some(query) = request.uri().query() {
                        key.push('+');
                        key.push_str(query);
                    }
                }
                // `parameter=` reads the request header of that name; the
                // compatibility note lives in DESIGN.md.
                KeyComponent::Header(name) | KeyComponent::Parameter(name) => {
                    key.push('+');
                    match request
                        .headers()
                        .get(name.as_str())
                        .and_then(|value| value.to_str().ok())
                    {
                        Some(value) => key.push_str(value),
                        None => key.push_str("null"),
                    }
                }
            }
        }
        key
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;

    use super::*;

    fn request(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).expect("valid request")
    }

    #[test]
    fn bare_uri_format_is_the_path() {
        let format = KeyFormat::parse("URI").expect("parses");
        assert_eq!(format.derive(&request("/a.css", &[])), "/a.css");

        let empty = KeyFormat::parse("").expect("parses");
        assert_eq!(empty.derive(&request("/a.css?x=1", &[])), "/a.css");
    }

    #[test]
    fn query_string_component_appends_when_present() {
        let format = KeyFormat::parse("queryString").expect("parses");
        assert_eq!(format.derive(&request("/a.css?x=1", &[])), "/a.css+x=1");
        assert_eq!(format.derive(&request("/a.css", &[])), "/a.css");
    }

    #[test]
    fn header_component_appends_value_or_null() {
        let format = KeyFormat::parse("header=X-Requested-By").expect("parses");
        assert_eq!(
            format.derive(&request("/a.js", &[("X-Requested-By", "app")])),
            "/a.js+app"
        );
        assert_eq!(format.derive(&request("/a.js", &[])), "/a.js+null");
    }

    #[test]
    fn parameter_component_reads_the_header_of_that_name() {
        let format = KeyFormat::parse("parameter=username").expect("parses");
        assert_eq!(
            format.derive(&request("/a.js", &[("username", "mira")])),
            "/a.js+mira"
        );
    }

    #[test]
    fn selector_order_is_reproduced_exactly() {
        let qs_first = KeyFormat::parse("queryString, header=Vary").expect("parses");
        let header_first = KeyFormat::parse("header=Vary, queryString").expect("parses");
        let req = request("/a.css?x=1", &[("Vary", "Accept")]);
        assert_eq!(qs_first.derive(&req), "/a.css+x=1+Accept");
        assert_eq!(header_first.derive(&req), "/a.css+Accept+x=1");
    }

    #[test]
    fn derivation_is_deterministic() {
        let format = KeyFormat::parse("queryString, header=Vary").expect("parses");
        let req = request("/a.css?x=1", &[("Vary", "Accept")]);
        assert_eq!(format.derive(&req), format.derive(&req));
    }

    #[test]
    fn unknown_selector_is_rejected() {
        let err = KeyFormat::parse("queryString, cookie=session").unwrap_err();
        assert!(err.to_string().contains("cookie=session"));
    }
}
