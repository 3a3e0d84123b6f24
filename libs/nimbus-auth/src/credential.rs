use std::fmt;

use async_trait::async_trait;

use crate::error::CredentialError;
use crate::token::AccessToken;

/// Source of bearer tokens for a set of scopes.
///
/// Implementations perform the out-of-band exchange with an identity
/// provider on every call; caching and coalescing live in
/// [`CredentialResolver`](crate::CredentialResolver).
#[async_trait]
pub trait TokenCredential: Send + Sync + fmt::Debug {
    /// # Errors
    /// Returns [`CredentialError::Unavailable`] when this source is not
    /// configured, or another variant when the exchange fails.
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError>;
}
