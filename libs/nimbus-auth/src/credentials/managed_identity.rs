use std::time::Duration;

use async_trait::async_trait;
use http::header::HeaderName;
use http::{HeaderValue, Method};
use nimbus_http::{Context, ErrorKind, Pipeline, Request};
use url::Url;

use super::{CredentialOptions, parse_token_response, token_pipeline};
use crate::credential::TokenCredential;
use crate::error::{CredentialError, format_http_error};
use crate::secret::SecretString;
use crate::token::AccessToken;

/// App Service / Functions identity endpoint variable.
pub const IDENTITY_ENDPOINT: &str = "IDENTITY_ENDPOINT";
/// Secret header value paired with [`IDENTITY_ENDPOINT`].
pub const IDENTITY_HEADER: &str = "IDENTITY_HEADER";
/// Azure Instance Metadata Service token endpoint.
pub const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";
const APP_SERVICE_TIMEOUT: Duration = Duration::from_secs(5);
/// IMDS is absent off Azure, so it gets a single short attempt.
const IMDS_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(500);
const X_IDENTITY_HEADER: HeaderName = HeaderName::from_static("x-identity-header");
const METADATA: HeaderName = HeaderName::from_static("metadata");

#[derive(Debug, Clone)]
enum Source {
    AppService { endpoint: Url, secret: SecretString },
    Imds { endpoint: Url },
}

/// Token from the platform's managed identity endpoint.
///
/// Uses the App Service endpoint when `IDENTITY_ENDPOINT` and
/// `IDENTITY_HEADER` are set, IMDS otherwise. Exactly one scope is accepted;
/// the resource is the scope without its `/.default` suffix. An unreachable
/// endpoint reports [`CredentialError::Unavailable`].
#[derive(Debug, Clone)]
pub struct ManagedIdentityCredential {
    source: Source,
    client_id: Option<String>,
    pipeline: Pipeline,
}

impl ManagedIdentityCredential {
    /// Detect the endpoint from the process environment.
    ///
    /// # Errors
    /// Returns [`CredentialError::Config`] if `IDENTITY_ENDPOINT` is not a
    /// valid URL or the token pipeline cannot be built.
    pub fn new(client_id: Option<String>) -> Result<Self, CredentialError> {
        Self::from_lookup(
            |name| std::env::var(name).ok(),
            client_id,
            CredentialOptions::default(),
        )
    }

    /// Detect the endpoint through `lookup` instead of the process environment.
    ///
    /// # Errors
    /// Same as [`new`](Self::new).
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        client_id: Option<String>,
        options: CredentialOptions,
    ) -> Result<Self, CredentialError> {
        let source = match (lookup(IDENTITY_ENDPOINT), lookup(IDENTITY_HEADER)) {
            (Some(endpoint), Some(secret)) => Source::AppService {
                endpoint: parse_endpoint(&endpoint)?,
                secret: SecretString::new(secret),
            },
            _ => Source::Imds {
                endpoint: parse_endpoint(IMDS_ENDPOINT)?,
            },
        };
        Self::with_source(source, client_id, options)
    }

    /// Use an App Service style endpoint.
    ///
    /// # Errors
    /// Returns [`CredentialError::Config`] if the token pipeline cannot be built.
    pub fn app_service(
        endpoint: Url,
        secret: SecretString,
        options: CredentialOptions,
    ) -> Result<Self, CredentialError> {
        Self::with_source(Source::AppService { endpoint, secret }, None, options)
    }

    /// Use an IMDS style endpoint.
    ///
    /// # Errors
    /// Returns [`CredentialError::Config`] if the token pipeline cannot be built.
    pub fn imds(endpoint: Url, options: CredentialOptions) -> Result<Self, CredentialError> {
        Self::with_source(Source::Imds { endpoint }, None, options)
    }

    /// Request a user-assigned identity.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        match &self.source {
            Source::AppService { endpoint, .. } | Source::Imds { endpoint } => endpoint,
        }
    }

    fn with_source(
        source: Source,
        client_id: Option<String>,
        options: CredentialOptions,
    ) -> Result<Self, CredentialError> {
        // identity endpoints are plain-HTTP, host-local services
        let pipeline = match options.pipeline {
            Some(pipeline) => pipeline,
            None => match &source {
                Source::AppService { .. } => token_pipeline(true, APP_SERVICE_TIMEOUT, 1)?,
                Source::Imds { .. } => token_pipeline(true, IMDS_ATTEMPT_TIMEOUT, 0)?,
            },
        };
        Ok(Self {
            source,
            client_id,
            pipeline,
        })
    }

    fn token_request(&self, resource: &str) -> Result<Request, CredentialError> {
        let (endpoint, api_version) = match &self.source {
            Source::AppService { endpoint, .. } => (endpoint, APP_SERVICE_API_VERSION),
            Source::Imds { endpoint } => (endpoint, IMDS_API_VERSION),
        };
        let mut url = endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api-version", api_version);
            query.append_pair("resource", resource);
            if let Some(client_id) = &self.client_id {
                query.append_pair("client_id", client_id);
            }
        }

        let mut request = Request::new(Method::GET, url);
        match &self.source {
            Source::AppService { secret, .. } => {
                let mut value = HeaderValue::from_str(secret.expose()).map_err(|_| {
                    CredentialError::Config("IDENTITY_HEADER is not a valid header value".into())
                })?;
                value.set_sensitive(true);
                request.headers_mut().insert(X_IDENTITY_HEADER, value);
            }
            Source::Imds { .. } => {
                request
                    .headers_mut()
                    .insert(METADATA, HeaderValue::from_static("true"));
            }
        }
        Ok(request)
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        let [scope] = scopes else {
            return Err(CredentialError::Config(format!(
                "managed identity accepts exactly one scope, got {}",
                scopes.len()
            )));
        };
        let resource = scope.strip_suffix("/.default").unwrap_or(scope);
        let mut request = self.token_request(resource)?;

        // An absent endpoint reads as unavailable rather than failed.
        let response = match self.pipeline.send(&mut Context::new(), &mut request).await {
            Ok(response) => response,
            Err(err) if err.kind() == ErrorKind::TransportFault => {
                tracing::debug!(
                    endpoint = %self.endpoint(),
                    error = %err,
                    "Managed identity endpoint unreachable"
                );
                return Err(CredentialError::Unavailable(format_http_error(
                    &err,
                    "managed identity endpoint unreachable:",
                )));
            }
            Err(err) => {
                return Err(CredentialError::Http(format_http_error(&err, "managed identity")));
            }
        };

        let status = response.status();
        if matches!(self.source, Source::Imds { .. }) && status == http::StatusCode::BAD_REQUEST {
            // IMDS answers 400 when no identity is assigned to the host
            return Err(CredentialError::Unavailable(
                "no managed identity assigned to this host".into(),
            ));
        }
        if !status.is_success() {
            return Err(CredentialError::Http(format!("managed identity HTTP {status}")));
        }

        let token = parse_token_response(response, "managed identity").await?;
        tracing::debug!(resource, expires_on = %token.expires_on(), "Acquired managed identity token");
        Ok(token)
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, CredentialError> {
    Url::parse(raw).map_err(|e| CredentialError::Config(format!("identity endpoint '{raw}': {e}")))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::credentials::test_support::mock_server_pipeline;
    use httpmock::prelude::*;

    fn options() -> CredentialOptions {
        CredentialOptions {
            authority_host: None,
            pipeline: Some(mock_server_pipeline()),
        }
    }

    #[test]
    fn detects_app_service_from_environment() {
        let credential = ManagedIdentityCredential::from_lookup(
            |name| match name {
                IDENTITY_ENDPOINT => Some("http://localhost:4141/msi/token".into()),
                IDENTITY_HEADER => Some("hdr".into()),
                _ => None,
            },
            None,
            options(),
        )
        .unwrap();
        assert_eq!(credential.endpoint().as_str(), "http://localhost:4141/msi/token");
    }

    #[test]
    fn falls_back_to_imds() {
        let credential = ManagedIdentityCredential::from_lookup(|_| None, None, options()).unwrap();
        assert_eq!(credential.endpoint().as_str(), IMDS_ENDPOINT);
    }

    #[tokio::test]
    async fn app_service_request_shape() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/msi/token")
                .query_param("api-version", APP_SERVICE_API_VERSION)
                .query_param("resource", "https://vault.example.net")
                .query_param("client_id", "user-assigned")
                .header("x-identity-header", "hdr-secret");
            then.status(200).json_body(serde_json::json!({
                "access_token": "mi-token",
                "expires_on": "4102444800",
                "token_type": "Bearer"
            }));
        });

        let credential = ManagedIdentityCredential::app_service(
            Url::parse(&server.url("/msi/token")).unwrap(),
            SecretString::new("hdr-secret"),
            options(),
        )
        .unwrap()
        .with_client_id("user-assigned");

        let token = credential
            .get_token(&["https://vault.example.net/.default"])
            .await
            .unwrap();

        mock.assert();
        assert_eq!(token.secret().expose(), "mi-token");
        assert_eq!(token.expires_on().unix_timestamp(), 4_102_444_800);
    }

    #[tokio::test]
    async fn imds_sends_metadata_header() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/metadata/identity/oauth2/token")
                .query_param("api-version", IMDS_API_VERSION)
                .header("metadata", "true");
            then.status(200).json_body(serde_json::json!({
                "access_token": "imds-token",
                "expires_in": "3599"
            }));
        });

        let credential = ManagedIdentityCredential::imds(
            Url::parse(&server.url("/metadata/identity/oauth2/token")).unwrap(),
            options(),
        )
        .unwrap();
        let token = credential.get_token(&["https://storage.example.net"]).await.unwrap();

        mock.assert();
        assert_eq!(token.secret().expose(), "imds-token");
    }

    #[tokio::test]
    async fn imds_without_identity_is_unavailable() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET);
            then.status(400).body(r#"{"error":"invalid_request"}"#);
        });

        let credential =
            ManagedIdentityCredential::imds(Url::parse(&server.url("/token")).unwrap(), options())
                .unwrap();
        let err = credential.get_token(&["scope"]).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_unavailable() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let credential = ManagedIdentityCredential::imds(
            Url::parse(&format!("http://127.0.0.1:{port}/token")).unwrap(),
            options(),
        )
        .unwrap();

        let err = credential.get_token(&["scope"]).await.unwrap_err();
        assert!(err.is_unavailable(), "{err}");
    }

    fn imds_at(server: &MockServer) -> ManagedIdentityCredential {
        let endpoint = Url::parse(&server.url("/metadata/identity/oauth2/token")).unwrap();
        ManagedIdentityCredential::imds(
            endpoint,
            CredentialOptions {
                authority_host: None,
                pipeline: None,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn silent_imds_gives_up_quickly() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/metadata/identity/oauth2/token");
            then.status(200).delay(Duration::from_secs(3));
        });

        let started = std::time::Instant::now();
        let err = imds_at(&server)
            .get_token(&["https://vault.example.net/.default"])
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::Unavailable(_)), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(2));
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn imds_request_is_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/metadata/identity/oauth2/token");
            then.status(503);
        });

        let err = imds_at(&server)
            .get_token(&["https://vault.example.net/.default"])
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::Http(_)), "{err:?}");
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn multiple_scopes_rejected() {
        let credential = ManagedIdentityCredential::from_lookup(|_| None, None, options()).unwrap();
        let err = credential.get_token(&["a", "b"]).await.unwrap_err();
        assert!(matches!(err, CredentialError::Config(_)));
    }
}
