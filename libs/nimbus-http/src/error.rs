use std::time::Duration;
use thiserror::Error;

/// Boxed error type used for opaque transport and body sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of every [`HttpError`].
///
/// Callers branch on the kind instead of matching individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Connection failure, per-attempt timeout, or operation deadline.
    TransportFault,
    /// No usable token could be obtained for the request.
    AuthenticationFailure,
    /// The service answered with a 4xx/5xx status.
    ServiceFault,
    /// The service answered with a body that does not have the expected shape.
    ProtocolViolation,
    /// The caller broke a usage contract (e.g. consumed a single-use body twice).
    ConsumerContractViolation,
    /// Invalid construction-time input (header, URL, options).
    Configuration,
}

/// Classification of URL validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL scheme is not `http` or `https`
    UnsupportedScheme,
}

/// Errors produced by the request pipeline, its policies and transports.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Invalid URL
    ///
    /// The `reason` field is diagnostic only; match on `kind`.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        url: String,
        kind: InvalidUriKind,
        reason: String,
    },

    /// Options rejected at construction time
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Single request attempt timed out
    #[error("Request attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The operation deadline carried by the context expired
    #[error("Operation deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// Transport error (connection refused, reset, DNS, ...)
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// TLS setup error
    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),

    /// No token could be resolved for an authenticated request
    #[error("Authentication failed: {message}")]
    Authentication {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// HTTP non-2xx status, produced by [`Response::error_for_status`](crate::Response::error_for_status)
    #[error("HTTP {status}: {body_preview}")]
    HttpStatus {
        status: http::StatusCode,
        body_preview: String,
        /// Parsed `Retry-After` value, if present and valid
        retry_after: Option<Duration>,
        /// Physical attempts made by the retry policy for this response
        attempts: u32,
    },

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Response body did not have the expected shape
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// JSON (de)serialization error
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Form URL encoding error
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// A single-use body was consumed more than once
    #[error("Body already consumed: {0}")]
    BodyConsumed(&'static str),

    /// Retries were attempted and the last attempt still failed
    #[error("{source} (after {attempts} attempts)")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<HttpError>,
    },
}

impl HttpError {
    /// Create an authentication error without an underlying cause.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error from any error value.
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Self::Transport(err.into())
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) | Self::DeadlineExceeded(_) | Self::Transport(_) | Self::Tls(_) => {
                ErrorKind::TransportFault
            }
            Self::Authentication { .. } => ErrorKind::AuthenticationFailure,
            Self::HttpStatus { .. } => ErrorKind::ServiceFault,
            Self::BodyTooLarge { .. } | Self::Protocol(_) | Self::Json(_) => {
                ErrorKind::ProtocolViolation
            }
            Self::BodyConsumed(_) => ErrorKind::ConsumerContractViolation,
            Self::InvalidHeaderName(_)
            | Self::InvalidHeaderValue(_)
            | Self::InvalidUri { .. }
            | Self::Config(_)
            | Self::FormEncode(_) => ErrorKind::Configuration,
            Self::RetriesExhausted { source, .. } => source.kind(),
        }
    }

    /// HTTP status carried by this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::RetriesExhausted { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Number of physical attempts, when more than one was made.
    #[must_use]
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetriesExhausted { attempts, .. } => Some(*attempts),
            Self::HttpStatus { attempts, .. } if *attempts > 1 => Some(*attempts),
            _ => None,
        }
    }

    /// Whether the retry policy may re-issue the request after this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}
