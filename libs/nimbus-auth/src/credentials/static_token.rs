use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::credential::TokenCredential;
use crate::error::CredentialError;
use crate::token::AccessToken;

/// Returns the same token for every scope set.
///
/// For tokens acquired outside this library and for tests.
#[derive(Debug)]
pub struct StaticTokenCredential {
    token: AccessToken,
    calls: AtomicUsize,
}

impl StaticTokenCredential {
    #[must_use]
    pub fn new(token: AccessToken) -> Self {
        Self {
            token,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `get_token` calls served.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(&self, _scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.token.clone())
    }
}
