use nimbus_http::HttpError;
use thiserror::Error;

/// Errors returned while acquiring a token.
///
/// Variants carry rendered strings so one refresh outcome can be cloned to
/// every caller waiting on it. Secret values never appear in the output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CredentialError {
    /// The credential is not configured in this environment; a chained
    /// credential moves on to the next source.
    #[error("credential unavailable: {0}")]
    Unavailable(String),

    /// Transport or status failure talking to the identity endpoint.
    #[error("{0}")]
    Http(String),

    /// The identity endpoint returned an unparseable or incomplete response.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// The identity endpoint returned a `token_type` that is not `Bearer`.
    #[error("unsupported token type: {0}")]
    UnsupportedTokenType(String),

    /// Credential configuration is invalid.
    #[error("credential config error: {0}")]
    Config(String),
}

impl CredentialError {
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<CredentialError> for HttpError {
    fn from(err: CredentialError) -> Self {
        HttpError::Authentication {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

/// Render an [`HttpError`] from a token exchange with a context prefix.
///
/// `HttpStatus` renders only the status; identity endpoints may echo request
/// details in their error bodies.
#[must_use]
pub fn format_http_error(e: &HttpError, prefix: &str) -> String {
    match e {
        HttpError::HttpStatus { status, .. } => format!("{prefix} HTTP {status}"),
        HttpError::RetriesExhausted { attempts, source } => {
            format!("{} (after {attempts} attempts)", format_http_error(source, prefix))
        }
        HttpError::Json(err) => format!("{prefix} JSON parse failed: {err}"),
        HttpError::Timeout(duration) => format!("{prefix} request timed out after {duration:?}"),
        HttpError::DeadlineExceeded(duration) => {
            format!("{prefix} total deadline exceeded after {duration:?}")
        }
        HttpError::Transport(err) => format!("{prefix} transport error: {err}"),
        HttpError::Tls(err) => format!("{prefix} TLS error: {err}"),
        HttpError::BodyTooLarge { limit, actual } => {
            format!("{prefix} response too large: limit {limit} bytes, got {actual} bytes")
        }
        HttpError::InvalidUri { url, reason, .. } => {
            format!("{prefix} invalid URL '{url}': {reason}")
        }
        HttpError::InvalidHeaderValue(err) => format!("{prefix} invalid header value: {err}"),
        HttpError::FormEncode(err) => format!("{prefix} form encode error: {err}"),
        // remaining variants may render request content
        _ => format!("{prefix} request failed"),
    }
}
