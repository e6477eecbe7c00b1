//! Immutable captures of completed HTTP responses.
//!
//! A [`ResponseSnapshot`] is the value type every cache backend stores: a
//! by-value copy of a finished response that can be replayed onto new
//! responses any number of times. The serialized byte format is plain
//! `serde_json` so it stays identical across backends.

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, StatusCode, header, response},
    response::Response,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::{
    OffsetDateTime, PrimitiveDateTime, UtcOffset, format_description::BorrowedFormatItem,
    macros::format_description,
};

const IMF_FIXDATE: &[BorrowedFormatItem<'_>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Headers whose values are date-typed when they parse as an HTTP date.
const DATE_TAGGED_HEADERS: [&str; 3] = ["date", "expires", "last-modified"];

/// A captured header value, tagged so replay chooses the matching emission
/// form (plain string, decimal integer, or IMF-fixdate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum HeaderCapture {
    Text(String),
    Int(i64),
    /// Epoch milliseconds, rendered as an IMF-fixdate on replay.
    Date(i64),
}

/// Immutable, serializable capture of a completed HTTP response.
///
/// Constructed once from a finished response; replayed read-only. Nothing in
/// a snapshot refers back to the request or response it was captured from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    captured_at_ms: i64,
    status: u16,
    headers: Vec<(String, HeaderCapture)>,
    cookies: Vec<String>,
    body: Bytes,
    encoding: Option<String>,
    content_type: Option<String>,
    locale: Option<String>,
}

impl ResponseSnapshot {
    /// Copy the full state of a completed response by value.
    ///
    /// `Content-Type`, `Content-Language` and `Set-Cookie` land in their
    /// dedicated fields; length and hop-by-hop headers are recomputed on
    /// replay and not captured.
    pub fn capture(parts: &response::Parts, body: Bytes, captured_at_ms: i64) -> Self {
        let mut headers = Vec::new();
        let mut cookies: Vec<String> = Vec::new();
        let mut content_type = None;
        let mut locale = None;

        for (name, value) in parts.headers.iter() {
            let Ok(text) = value.to_str() else { continue };
            match name.as_str() {
                "set-cookie" => {
                    if !cookies.iter().any(|c| c == text) {
                        cookies.push(text.to_string());
                    }
                }
                "content-type" => content_type = Some(text.to_string()),
                "content-language" => locale = Some(text.to_string()),
                "content-length" | "transfer-encoding" | "connection" => {}
                other => headers.push((other.to_string(), classify(other, text))),
            }
        }

        let encoding = content_type.as_deref().and_then(extract_charset);

        Self {
            captured_at_ms,
            status: parts.status.as_u16(),
            headers,
            cookies,
            body,
            encoding,
            content_type,
            locale,
        }
    }

    /// When the snapshot was captured, in epoch milliseconds.
    pub fn captured_at_ms(&self) -> i64 {
        self.captured_at_ms
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Write the snapshot onto a fresh response: cookies, then tagged
    /// headers, then content type with its character encoding, content
    /// language, status (stored status when valid and non-zero, 200
    /// otherwise), and the body bytes last.
    ///
    /// Replay never fails; header values that no longer form a valid header
    /// are dropped.
    pub fn replay(&self) -> Response {
        let mut response = Response::new(Body::from(self.body.clone()));

        let headers = response.headers_mut();
        for cookie in &self.cookies {
            if let Ok(value) = HeaderValue::from_str(cookie) {
                headers.append(header::SET_COOKIE, value);
            }
        }

        for (name, capture) in &self.headers {
            let rendered = match capture {
                HeaderCapture::Text(text) => text.clone(),
                HeaderCapture::Int(number) => number.to_string(),
                HeaderCapture::Date(epoch_ms) => match format_http_date(*epoch_ms) {
                    Some(date) => date,
                    None => continue,
                },
            };
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&rendered),
            ) {
                headers.append(name, value);
            }
        }

        if let Some(content_type) = self.content_type_with_charset()
            && let Ok(value) = HeaderValue::from_str(&content_type)
        {
            headers.insert(header::CONTENT_TYPE, value);
        }
        if let Some(locale) = &self.locale
            && let Ok(value) = HeaderValue::from_str(locale)
        {
            headers.insert(header::CONTENT_LANGUAGE, value);
        }

        *response.status_mut() = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        response
    }

    fn content_type_with_charset(&self) -> Option<String> {
        let content_type = self.content_type.as_deref()?;
        if content_type.to_ascii_lowercase().contains("charset") {
            return Some(content_type.to_string());
        }
        match &self.encoding {
            Some(encoding) => Some(format!("{content_type}; charset={encoding}")),
            None => Some(content_type.to_string()),
        }
    }
}

fn classify(name: &str, value: &str) -> HeaderCapture {
    if DATE_TAGGED_HEADERS.contains(&name)
        && let Some(epoch_ms) = parse_http_date(value)
    {
        return HeaderCapture::Date(epoch_ms);
    }
    if let Ok(number) = value.trim().parse::<i64>() {
        return HeaderCapture::Int(number);
    }
    HeaderCapture::Text(value.to_string())
}

fn extract_charset(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Render epoch milliseconds as an IMF-fixdate header value.
pub(crate) fn format_http_date(epoch_ms: i64) -> Option<String> {
    let instant = OffsetDateTime::from_unix_timestamp_nanos(i128::from(epoch_ms) * 1_000_000)
        .ok()?
        .to_offset(UtcOffset::UTC);
    instant.format(IMF_FIXDATE).ok()
}

/// Parse an IMF-fixdate header value into epoch milliseconds.
pub(crate) fn parse_http_date(value: &str) -> Option<i64> {
    let parsed = PrimitiveDateTime::parse(value.trim(), IMF_FIXDATE).ok()?;
    Some((parsed.assume_utc().unix_timestamp_nanos() / 1_000_000) as i64)
}
