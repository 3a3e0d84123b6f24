//! HTTP security utilities.

use http::HeaderMap;
use http::header::HeaderName;
use url::Url;

/// Maximum body preview size for error messages (8KB).
///
/// Bounds how much of a non-2xx body is read into `HttpError::HttpStatus`.
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Default limit for reading a response body into memory (10MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Placeholder written in place of sensitive values.
pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_HEADERS: [&str; 4] = [
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
];

/// Whether a header value must never reach logs.
///
/// Covers credentials, cookies, anything ending in `-key`, and values the
/// producer marked sensitive.
#[must_use]
pub fn is_sensitive_header(name: &HeaderName) -> bool {
    let name = name.as_str();
    SENSITIVE_HEADERS.contains(&name) || name.ends_with("-key") || name.ends_with("-token")
}

/// Render headers for logging with sensitive values replaced by [`REDACTED`].
#[must_use]
pub fn redacted_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let rendered = if value.is_sensitive() || is_sensitive_header(name) {
                REDACTED.to_owned()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name.as_str().to_owned(), rendered)
        })
        .collect()
}

/// URL without query string or userinfo, safe for spans and logs.
#[must_use]
pub fn sanitized_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}://{host}:{port}{}", url.scheme(), url.path()),
        None => format!("{}://{host}{}", url.scheme(), url.path()),
    }
}
