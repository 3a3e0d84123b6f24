use crate::error::{BoxError, HttpError, InvalidUriKind};
use bytes::Bytes;
use futures_core::Stream;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;
use std::fmt;
use std::pin::Pin;
use url::Url;

/// Single-use stream of request body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

enum BodyKind {
    Empty,
    Bytes(Bytes),
    /// `None` once the transport has taken the stream
    Stream(Option<ByteStream>),
}

/// Request body with read tracking.
///
/// Byte bodies can be sent any number of times. Stream bodies can be sent
/// once; a second [`take_for_send`](Self::take_for_send) fails with
/// [`HttpError::BodyConsumed`].
pub struct RequestBody {
    kind: BodyKind,
    reads: u32,
}

/// Body handed to a transport for one physical exchange.
pub enum TransportBody {
    Empty,
    Bytes(Bytes),
    Stream(ByteStream),
}

impl RequestBody {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            kind: BodyKind::Empty,
            reads: 0,
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            kind: BodyKind::Bytes(bytes.into()),
            reads: 0,
        }
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, BoxError>> + Send + 'static,
    {
        Self {
            kind: BodyKind::Stream(Some(Box::pin(stream))),
            reads: 0,
        }
    }

    /// Whether the body can be rewound and sent again.
    #[must_use]
    pub fn is_replayable(&self) -> bool {
        !matches!(self.kind, BodyKind::Stream(_))
    }

    /// Whether a transport has started reading this body.
    #[must_use]
    pub fn has_been_read(&self) -> bool {
        self.reads > 0
    }

    /// Buffered bytes, if the body is not a stream.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.kind {
            BodyKind::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.kind {
            BodyKind::Empty => true,
            BodyKind::Bytes(bytes) => bytes.is_empty(),
            BodyKind::Stream(_) => false,
        }
    }

    /// Hand the body to a transport and mark it read.
    ///
    /// # Errors
    /// Returns `HttpError::BodyConsumed` if a stream body was already taken.
    pub fn take_for_send(&mut self) -> Result<TransportBody, HttpError> {
        self.reads = self.reads.saturating_add(1);
        match &mut self.kind {
            BodyKind::Empty => Ok(TransportBody::Empty),
            BodyKind::Bytes(bytes) => Ok(TransportBody::Bytes(bytes.clone())),
            BodyKind::Stream(stream) => stream
                .take()
                .map(TransportBody::Stream)
                .ok_or(HttpError::BodyConsumed("request stream body")),
        }
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            BodyKind::Empty => f.write_str("Empty"),
            BodyKind::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            BodyKind::Stream(Some(_)) => f.write_str("Stream"),
            BodyKind::Stream(None) => f.write_str("Stream(consumed)"),
        }
    }
}

/// Method and URL of the request a response was produced for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: Method,
    pub url: Url,
}

/// Outbound HTTP request.
///
/// Owned by exactly one in-flight operation and passed to policies by
/// mutable reference, so each policy sees the edits of the ones before it.
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: RequestBody,
    non_replayable: bool,
}

impl Request {
    /// Create a request for an already-parsed URL.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::empty(),
            non_replayable: false,
        }
    }

    /// Parse `url` and create a request.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidUri` if the URL is malformed, has no host,
    /// or is not `http`/`https`.
    pub fn parse(method: Method, url: &str) -> Result<Self, HttpError> {
        Ok(Self::new(method, parse_url(url)?))
    }

    /// Create a GET request.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidUri` if the URL is invalid.
    pub fn get(url: &str) -> Result<Self, HttpError> {
        Self::parse(Method::GET, url)
    }

    /// Create a POST request.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidUri` if the URL is invalid.
    pub fn post(url: &str) -> Result<Self, HttpError> {
        Self::parse(Method::POST, url)
    }

    /// Add a header, validating name and value.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderName` / `InvalidHeaderValue`.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, HttpError> {
        let name = HeaderName::try_from(name)?;
        let value = HeaderValue::try_from(value)?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Set a JSON body and `Content-Type: application/json` unless a content type is set.
    ///
    /// # Errors
    /// Returns `HttpError::Json` if serialization fails.
    pub fn with_json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, HttpError> {
        let bytes = serde_json::to_vec(value)?;
        self.set_default_content_type("application/json");
        self.body = RequestBody::from_bytes(bytes);
        Ok(self)
    }

    /// Set a form-urlencoded body.
    ///
    /// # Errors
    /// Returns `HttpError::FormEncode` if serialization fails.
    pub fn with_form<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, HttpError> {
        let encoded = serde_urlencoded::to_string(value)?;
        self.set_default_content_type("application/x-www-form-urlencoded");
        self.body = RequestBody::from_bytes(encoded);
        Ok(self)
    }

    /// Set a raw byte body.
    #[must_use]
    pub fn with_bytes(mut self, bytes: impl Into<Bytes>) -> Self {
        self.body = RequestBody::from_bytes(bytes);
        self
    }

    /// Set a single-use streaming body. Such requests are never replayed
    /// once the transport has started reading them.
    #[must_use]
    pub fn with_stream<S>(mut self, stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, BoxError>> + Send + 'static,
    {
        self.body = RequestBody::from_stream(stream);
        self
    }

    /// Mark the request as unsafe to send twice, whatever its body.
    pub fn set_replayable(&mut self, replayable: bool) {
        self.non_replayable = !replayable;
    }

    /// Whether the request may be sent again after its body has been read.
    #[must_use]
    pub fn is_replayable(&self) -> bool {
        !self.non_replayable && self.body.is_replayable()
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    #[must_use]
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut RequestBody {
        &mut self.body
    }

    /// Snapshot of method and URL.
    #[must_use]
    pub fn info(&self) -> RequestInfo {
        RequestInfo {
            method: self.method.clone(),
            url: self.url.clone(),
        }
    }

    fn set_default_content_type(&mut self, content_type: &'static str) {
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
    }
}

/// Parse and validate an absolute `http`/`https` URL.
///
/// # Errors
/// Returns `HttpError::InvalidUri` describing the failure.
pub fn parse_url(raw: &str) -> Result<Url, HttpError> {
    let url = Url::parse(raw).map_err(|e| HttpError::InvalidUri {
        url: raw.to_owned(),
        kind: InvalidUriKind::ParseError,
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(HttpError::InvalidUri {
            url: raw.to_owned(),
            kind: InvalidUriKind::UnsupportedScheme,
            reason: format!("scheme '{}' is not http or https", url.scheme()),
        });
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(HttpError::InvalidUri {
            url: raw.to_owned(),
            kind: InvalidUriKind::MissingAuthority,
            reason: "URL has no host".to_owned(),
        });
    }
    Ok(url)
}
