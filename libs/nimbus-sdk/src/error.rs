use nimbus_http::{ErrorKind, HttpError};
use thiserror::Error;

/// Terminal error of a page stream.
///
/// A stream yields at most one of these and then ends.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PagerError<E> {
    /// The page fetch function failed.
    #[error("page fetch failed: {0}")]
    Fetch(#[source] E),

    /// The service answered a continuation token with the same token,
    /// which would page forever.
    #[error("service returned the continuation token it was given: {0}")]
    RepeatedContinuation(String),
}

impl<E> PagerError<E> {
    /// The fetch error, if this is one.
    #[must_use]
    pub fn into_fetch(self) -> Option<E> {
        match self {
            Self::Fetch(e) => Some(e),
            Self::RepeatedContinuation(_) => None,
        }
    }
}

impl PagerError<HttpError> {
    /// Taxonomy kind; a repeated continuation counts as a malformed page.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Fetch(e) => e.kind(),
            Self::RepeatedContinuation(_) => ErrorKind::ProtocolViolation,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_fetch_error() {
        let err = PagerError::Fetch(HttpError::Protocol("no items".into()));
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);

        let err = PagerError::Fetch(HttpError::transport("connection reset"));
        assert_eq!(err.kind(), ErrorKind::TransportFault);
        assert!(err.to_string().starts_with("page fetch failed"));
        assert!(err.into_fetch().is_some());

        let err = PagerError::<HttpError>::RepeatedContinuation("t1".into());
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert!(err.into_fetch().is_none());
    }
}
