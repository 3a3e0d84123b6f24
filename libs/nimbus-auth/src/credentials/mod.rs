//! Token credential implementations.
//!
//! - [`StaticTokenCredential`]: a fixed, pre-acquired token
//! - [`ClientSecretCredential`]: OAuth2 client-credentials grant
//! - [`ManagedIdentityCredential`]: App Service identity endpoint or IMDS
//! - [`EnvironmentCredential`]: client secret configured through `AZURE_*` variables
//! - [`ChainedTokenCredential`] / [`DefaultCredential`]: first available source wins

mod chained;
mod client_secret;
mod environment;
mod managed_identity;
mod static_token;

pub use chained::{ChainedTokenCredential, DefaultCredential};
pub use client_secret::{ClientSecretCredential, DEFAULT_AUTHORITY_HOST};
pub use environment::{
    AZURE_AUTHORITY_HOST, AZURE_CLIENT_ID, AZURE_CLIENT_SECRET, AZURE_TENANT_ID,
    EnvironmentCredential,
};
pub use managed_identity::{IDENTITY_ENDPOINT, IDENTITY_HEADER, IMDS_ENDPOINT, ManagedIdentityCredential};
pub use static_token::StaticTokenCredential;

use std::sync::Arc;
use std::time::Duration;

use nimbus_http::{ClientOptions, Context, HttpError, HttpTransport, Pipeline, Request, Response};
use url::Url;

use crate::error::{CredentialError, format_http_error};
use crate::token::{AccessToken, TokenResponse};

/// Lifetime assumed when an identity endpoint omits `expires_in`.
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(300);

/// Settings shared by credentials that talk to an identity endpoint.
#[derive(Debug, Clone, Default)]
pub struct CredentialOptions {
    /// Authority host for client-credential grants; defaults to
    /// [`DEFAULT_AUTHORITY_HOST`].
    pub authority_host: Option<Url>,
    /// Pipeline used for token requests; a dedicated HTTPS pipeline is built
    /// when unset.
    pub pipeline: Option<Pipeline>,
}

/// Pipeline for token requests. Request/response logging stays off since
/// form bodies carry client secrets.
fn token_pipeline(
    allow_insecure_http: bool,
    attempt_timeout: Duration,
    retries: u32,
) -> Result<Pipeline, CredentialError> {
    let mut builder = HttpTransport::builder().attempt_timeout(attempt_timeout);
    if allow_insecure_http {
        builder = builder.allow_insecure_http();
    }
    let transport = builder
        .build()
        .map_err(|e| CredentialError::Http(format_http_error(&e, "token client")))?;

    let options = ClientOptions {
        retry_max_attempts: retries,
        ..ClientOptions::default()
    };
    Pipeline::builder(options)
        .transport(Arc::new(transport))
        .build()
        .map_err(|e| CredentialError::Config(format_http_error(&e, "token client")))
}

/// Send a token request and parse the response.
async fn fetch_token(
    pipeline: &Pipeline,
    mut request: Request,
    prefix: &str,
) -> Result<AccessToken, CredentialError> {
    let response = send_token_request(pipeline, &mut request)
        .await
        .map_err(|e| CredentialError::Http(format_http_error(&e, prefix)))?;
    parse_token_response(response, prefix).await
}

async fn parse_token_response(
    response: Response,
    prefix: &str,
) -> Result<AccessToken, CredentialError> {
    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| CredentialError::InvalidResponse(format_http_error(&e, prefix)))?;
    body.into_access_token(DEFAULT_TOKEN_TTL)
}

async fn send_token_request(
    pipeline: &Pipeline,
    request: &mut Request,
) -> Result<Response, HttpError> {
    pipeline
        .send(&mut Context::new(), request)
        .await?
        .error_for_status()
}

fn join_scopes(scopes: &[&str]) -> Result<String, CredentialError> {
    if scopes.is_empty() || scopes.iter().any(|s| s.trim().is_empty()) {
        return Err(CredentialError::Config("at least one non-empty scope is required".into()));
    }
    Ok(scopes.join(" "))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Pipeline over a plain-HTTP transport for mock identity servers.
    pub(crate) fn mock_server_pipeline() -> Pipeline {
        token_pipeline(true, Duration::from_secs(5), 0).unwrap()
    }

    pub(crate) fn token_json(token: &str, expires_in: u64) -> String {
        format!(r#"{{"access_token":"{token}","expires_in":{expires_in},"token_type":"Bearer"}}"#)
    }
}
