use std::sync::Arc;

use async_trait::async_trait;
use http::header::AUTHORIZATION;
use http::{HeaderValue, StatusCode};
use nimbus_http::{ClientOptions, Context, HttpError, Next, Policy, Request, Response};
use zeroize::Zeroizing;

use crate::credential::TokenCredential;
use crate::error::CredentialError;
use crate::resolver::CredentialResolver;
use crate::token::AccessToken;

/// Sets `Authorization: Bearer <token>` from a [`CredentialResolver`].
///
/// Runs before the retry policy, so every attempt carries the same token.
/// When no token can be resolved the call fails with an authentication error
/// before any network I/O. A `401` drops the cached token and, if the body
/// can be sent again, re-issues the request once with a fresh token.
#[derive(Debug, Clone)]
pub struct BearerTokenPolicy {
    resolver: CredentialResolver,
    scopes: Vec<String>,
    allow_insecure_http: bool,
}

impl BearerTokenPolicy {
    pub fn new(resolver: CredentialResolver, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            resolver,
            scopes: scopes.into_iter().map(Into::into).collect(),
            allow_insecure_http: false,
        }
    }

    /// Policy over a fresh resolver for `credential`.
    pub fn from_credential(
        credential: Arc<dyn TokenCredential>,
        scopes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::new(CredentialResolver::new(credential), scopes)
    }

    /// Policy requesting the `credentialScopes` configured in `options`.
    ///
    /// # Errors
    /// Returns `HttpError::Config` if no non-empty scope is configured.
    pub fn from_options(
        resolver: CredentialResolver,
        options: &ClientOptions,
    ) -> Result<Self, HttpError> {
        let scopes: Vec<String> = options
            .credential_scopes
            .iter()
            .map(|scope| scope.trim())
            .filter(|scope| !scope.is_empty())
            .map(str::to_owned)
            .collect();
        if scopes.is_empty() {
            return Err(HttpError::Config(
                "credentialScopes must name at least one scope when authentication is configured"
                    .into(),
            ));
        }
        Ok(Self::new(resolver, scopes))
    }

    /// Allow sending tokens over plain `http://`. For local mock servers only.
    #[must_use]
    pub fn allow_insecure_http(mut self) -> Self {
        self.allow_insecure_http = true;
        self
    }

    #[must_use]
    pub fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    fn scope_refs(&self) -> Vec<&str> {
        self.scopes.iter().map(String::as_str).collect()
    }

    async fn token(&self) -> Result<AccessToken, HttpError> {
        let scopes = self.scope_refs();
        match self.resolver.get_token(&scopes).await {
            Ok(token) => Ok(token),
            Err(err) => match self.resolver.cached(&scopes) {
                Some(cached) => {
                    tracing::warn!(
                        error = %err,
                        "Token refresh failed; using cached token until it expires"
                    );
                    Ok(cached)
                }
                None => Err(err.into()),
            },
        }
    }

    async fn authorize(&self, request: &mut Request) -> Result<(), HttpError> {
        let token = self.token().await?;
        let header = Zeroizing::new(format!("Bearer {}", token.secret().expose()));
        let mut value = HeaderValue::from_str(&header).map_err(|_| {
            HttpError::from(CredentialError::InvalidResponse(
                "access token is not a valid header value".into(),
            ))
        })?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}

#[async_trait]
impl Policy for BearerTokenPolicy {
    async fn send(
        &self,
        ctx: &mut Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> Result<Response, HttpError> {
        if request.url().scheme() != "https" && !self.allow_insecure_http {
            return Err(HttpError::authentication(
                "bearer token authentication requires HTTPS",
            ));
        }

        self.authorize(request).await?;
        let response = next.run(ctx, request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        self.resolver.invalidate(&self.scope_refs());
        if !request.is_replayable() && request.body().has_been_read() {
            return Ok(response);
        }
        tracing::debug!(
            method = %request.method(),
            host = request.url().host_str().unwrap_or_default(),
            "401 received; re-authorizing with a fresh token"
        );
        drop(response);
        self.authorize(request).await?;
        next.run(ctx, request).await
    }
}
