use crate::error::{BoxError, HttpError};
use crate::request::RequestInfo;
use crate::security::{DEFAULT_MAX_BODY_SIZE, ERROR_BODY_PREVIEW_LIMIT};
use bytes::Bytes;
use futures_util::{StreamExt, stream};
use http::{HeaderMap, HeaderName, StatusCode};
use http_body::Frame;
use http_body_util::{BodyExt, BodyStream, Full, StreamBody};
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::fmt;
use std::time::{Duration, SystemTime};

/// Millisecond retry hint, checked before `Retry-After`.
pub const RETRY_AFTER_MS: HeaderName = HeaderName::from_static("retry-after-ms");

/// Vendor-prefixed millisecond retry hint.
pub const X_MS_RETRY_AFTER_MS: HeaderName = HeaderName::from_static("x-ms-retry-after-ms");

/// Parse the server's retry hint into a `Duration`.
///
/// Checked in order:
/// - `retry-after-ms` / `x-ms-retry-after-ms`: integer milliseconds
/// - `Retry-After` seconds: "120" → 120 seconds
/// - `Retry-After` HTTP-date (RFC 1123): duration until that time
///
/// Returns `None` if no header is present, the value cannot be parsed, or
/// it is negative / already in the past.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    for name in [&RETRY_AFTER_MS, &X_MS_RETRY_AFTER_MS] {
        if let Some(ms) = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            return Some(Duration::from_millis(ms));
        }
    }

    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?;
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        return Some(Duration::from_secs(seconds.cast_unsigned()));
    }

    parse_http_date(trimmed)
}

/// Duration until an HTTP-date; `None` if in the past or unparsable.
fn parse_http_date(value: &str) -> Option<Duration> {
    let parsed = httpdate::parse_http_date(value).ok()?;
    parsed.duration_since(SystemTime::now()).ok()
}

/// Type-erased streaming response body.
pub type ResponseBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

enum Body {
    Buffered(Bytes),
    /// `None` once the stream has been taken
    Streaming(Option<ResponseBody>),
}

/// HTTP response returned by the pipeline.
///
/// A streaming body can be taken once. A buffered body (from
/// [`buffer`](Self::buffer) or a test transport) can be read repeatedly.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Body,
    attempts: u32,
    request: Option<RequestInfo>,
    max_body_size: usize,
}

impl Response {
    /// Create a response with a streaming body.
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            body: Body::Streaming(Some(body)),
            attempts: 1,
            request: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Create a response whose body is already in memory.
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: Body::Buffered(body.into()),
            attempts: 1,
            request: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Set the limit applied when reading the body.
    #[must_use]
    pub fn with_max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = limit;
        self
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Physical attempts the retry policy made to produce this response.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn set_attempts(&mut self, attempts: u32) {
        self.attempts = attempts;
    }

    /// Method and URL of the originating request, set by the transport.
    #[must_use]
    pub fn request_info(&self) -> Option<&RequestInfo> {
        self.request.as_ref()
    }

    #[must_use]
    pub fn with_request_info(mut self, info: RequestInfo) -> Self {
        self.request = Some(info);
        self
    }

    /// Server retry hint, see [`parse_retry_after`].
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        parse_retry_after(&self.headers)
    }

    #[must_use]
    pub fn is_buffered(&self) -> bool {
        matches!(self.body, Body::Buffered(_))
    }

    /// Take the body as a stream.
    ///
    /// # Errors
    /// Returns `HttpError::BodyConsumed` if a streaming body was already taken.
    pub fn take_body(&mut self) -> Result<ResponseBody, HttpError> {
        match &mut self.body {
            Body::Buffered(bytes) => Ok(full_body(bytes.clone())),
            Body::Streaming(body) => body
                .take()
                .ok_or(HttpError::BodyConsumed("response body")),
        }
    }

    /// Read a streaming body into memory, so it can be read more than once.
    ///
    /// # Errors
    /// Returns `HttpError::BodyConsumed` if the stream was already taken,
    /// `HttpError::BodyTooLarge` if it exceeds the body limit.
    pub async fn buffer(&mut self) -> Result<&Bytes, HttpError> {
        if let Body::Streaming(body) = &mut self.body {
            let stream = body.take().ok_or(HttpError::BodyConsumed("response body"))?;
            let bytes = read_body_limited(stream, self.max_body_size).await?;
            self.body = Body::Buffered(bytes);
        }
        match &self.body {
            Body::Buffered(bytes) => Ok(bytes),
            Body::Streaming(_) => Err(HttpError::BodyConsumed("response body")),
        }
    }

    /// Up to `limit` bytes from the start of the body, leaving it readable.
    ///
    /// A streaming body stays streaming: the frames read here are replayed
    /// ahead of the rest of the stream, so a read error or the body limit
    /// surfaces to whoever reads the body next. Yields empty bytes if the
    /// stream was already taken.
    pub async fn peek(&mut self, limit: usize) -> Bytes {
        let mut rest = match &mut self.body {
            Body::Buffered(bytes) => return bytes.slice(..bytes.len().min(limit)),
            Body::Streaming(body) => match body.take() {
                Some(stream) => stream,
                None => return Bytes::new(),
            },
        };

        let mut head = Vec::new();
        let mut seen: Vec<Result<Frame<Bytes>, BoxError>> = Vec::new();
        let mut ended = false;
        while head.len() < limit {
            match rest.frame().await {
                Some(Ok(frame)) => {
                    if let Some(chunk) = frame.data_ref() {
                        head.extend_from_slice(chunk);
                    }
                    seen.push(Ok(frame));
                }
                Some(Err(e)) => {
                    seen.push(Err(e));
                    ended = true;
                    break;
                }
                None => {
                    ended = true;
                    break;
                }
            }
        }

        let replay = stream::iter(seen);
        let body = if ended {
            BodyExt::boxed(StreamBody::new(replay))
        } else {
            BodyExt::boxed(StreamBody::new(replay.chain(BodyStream::new(rest))))
        };
        self.body = Body::Streaming(Some(body));

        head.truncate(limit);
        Bytes::from(head)
    }

    /// Buffered body bytes, if the body is in memory.
    #[must_use]
    pub fn buffered_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            Body::Buffered(bytes) => Some(bytes),
            Body::Streaming(_) => None,
        }
    }

    /// Return an error for non-2xx responses without reading a streaming body.
    ///
    /// A buffered body contributes a preview to the error.
    ///
    /// # Errors
    /// Returns `HttpError::HttpStatus` if the status is not 2xx.
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.status.is_success() {
            return Ok(self);
        }
        let body_preview = self
            .buffered_bytes()
            .map(preview)
            .unwrap_or_default();
        Err(self.status_error(body_preview))
    }

    /// Read the body without a status check.
    ///
    /// # Errors
    /// Returns `HttpError::BodyTooLarge` if the body exceeds the limit.
    pub async fn bytes(mut self) -> Result<Bytes, HttpError> {
        Ok(self.buffer().await?.clone())
    }

    /// Read the body with a status check.
    ///
    /// Non-2xx responses become `HttpError::HttpStatus` with a body preview.
    ///
    /// # Errors
    /// Returns `HttpError::HttpStatus` or `HttpError::BodyTooLarge`.
    pub async fn checked_bytes(mut self) -> Result<Bytes, HttpError> {
        if !self.status.is_success() {
            let limit = self.max_body_size.min(ERROR_BODY_PREVIEW_LIMIT);
            let body_preview = match self.take_body() {
                Ok(body) => match read_body_limited(body, limit).await {
                    Ok(bytes) => preview(&bytes),
                    Err(HttpError::BodyTooLarge { .. }) => {
                        "<body too large for preview>".to_owned()
                    }
                    Err(e) => return Err(e),
                },
                Err(_) => String::new(),
            };
            return Err(self.status_error(body_preview));
        }
        self.bytes().await
    }

    /// Parse the body as JSON with a status check.
    ///
    /// # Errors
    /// Returns `HttpError::HttpStatus`, `HttpError::BodyTooLarge` or `HttpError::Json`.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        let bytes = self.checked_bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Read the body as UTF-8 text with a status check (lossy).
    ///
    /// # Errors
    /// Returns `HttpError::HttpStatus` or `HttpError::BodyTooLarge`.
    pub async fn text(self) -> Result<String, HttpError> {
        let bytes = self.checked_bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn status_error(&self, body_preview: String) -> HttpError {
        HttpError::HttpStatus {
            status: self.status,
            body_preview,
            retry_after: self.retry_after(),
            attempts: self.attempts,
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            Body::Buffered(bytes) => format!("Buffered({} bytes)", bytes.len()),
            Body::Streaming(Some(_)) => "Streaming".to_owned(),
            Body::Streaming(None) => "Streaming(consumed)".to_owned(),
        };
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &body)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

fn full_body(bytes: Bytes) -> ResponseBody {
    Full::new(bytes)
        .map_err(|never: Infallible| -> BoxError { match never {} })
        .boxed()
}

fn preview(bytes: &Bytes) -> String {
    let end = bytes.len().min(ERROR_BODY_PREVIEW_LIMIT);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Read a body into memory, failing once `limit` bytes are exceeded.
///
/// The limit applies to decompressed bytes.
///
/// # Errors
/// Returns `HttpError::BodyTooLarge` or `HttpError::Transport`.
pub async fn read_body_limited(body: ResponseBody, limit: usize) -> Result<Bytes, HttpError> {
    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}
