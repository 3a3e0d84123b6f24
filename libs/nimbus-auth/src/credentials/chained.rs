use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use super::{CredentialOptions, EnvironmentCredential, ManagedIdentityCredential};
use crate::credential::TokenCredential;
use crate::error::CredentialError;
use crate::token::AccessToken;

/// Tries each credential in order.
///
/// Sources reporting [`CredentialError::Unavailable`] are skipped; any other
/// error stops the chain. The first source that yields a token is used for
/// every later call.
#[derive(Debug)]
pub struct ChainedTokenCredential {
    sources: Vec<Arc<dyn TokenCredential>>,
    selected: OnceLock<usize>,
}

impl ChainedTokenCredential {
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn TokenCredential>>) -> Self {
        Self {
            sources,
            selected: OnceLock::new(),
        }
    }

    /// Index of the source that produced the first token, if any has.
    #[must_use]
    pub fn selected(&self) -> Option<usize> {
        self.selected.get().copied()
    }
}

#[async_trait]
impl TokenCredential for ChainedTokenCredential {
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        if let Some(&index) = self.selected.get()
            && let Some(source) = self.sources.get(index)
        {
            return source.get_token(scopes).await;
        }

        let mut unavailable = Vec::new();
        for (index, source) in self.sources.iter().enumerate() {
            match source.get_token(scopes).await {
                Ok(token) => {
                    if self.selected.set(index).is_ok() {
                        tracing::debug!(index, credential = ?source, "Selected credential from chain");
                    }
                    return Ok(token);
                }
                Err(CredentialError::Unavailable(reason)) => unavailable.push(reason),
                Err(err) => return Err(err),
            }
        }

        Err(CredentialError::Unavailable(if unavailable.is_empty() {
            "credential chain is empty".to_owned()
        } else {
            format!("no credential in chain is available: {}", unavailable.join("; "))
        }))
    }
}

/// Environment credential, then managed identity.
#[derive(Debug)]
pub struct DefaultCredential {
    chain: ChainedTokenCredential,
}

impl DefaultCredential {
    /// # Errors
    /// Returns [`CredentialError::Config`] if the managed identity endpoint
    /// configured in the environment is invalid.
    pub fn new() -> Result<Self, CredentialError> {
        Self::from_lookup(|name| std::env::var(name).ok(), &CredentialOptions::default())
    }

    /// # Errors
    /// Same as [`new`](Self::new).
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        options: &CredentialOptions,
    ) -> Result<Self, CredentialError> {
        let environment = EnvironmentCredential::from_lookup(&lookup, options.clone());
        let managed = ManagedIdentityCredential::from_lookup(
            &lookup,
            None,
            CredentialOptions {
                authority_host: None,
                pipeline: options.pipeline.clone(),
            },
        )?;
        Ok(Self {
            chain: ChainedTokenCredential::new(vec![Arc::new(environment), Arc::new(managed)]),
        })
    }
}

#[async_trait]
impl TokenCredential for DefaultCredential {
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        self.chain.get_token(scopes).await
    }
}
