use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use nimbus_http::{Pipeline, Request};
use url::Url;
use zeroize::Zeroizing;

use super::{CredentialOptions, fetch_token, join_scopes, token_pipeline};
use crate::credential::TokenCredential;
use crate::error::CredentialError;
use crate::secret::SecretString;
use crate::token::AccessToken;

pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// OAuth2 client-credentials grant against
/// `{authority_host}/{tenant_id}/oauth2/v2.0/token`.
///
/// Credentials are sent as form fields; `scope` is the space-joined scope
/// list.
#[derive(Debug, Clone)]
pub struct ClientSecretCredential {
    pipeline: Pipeline,
    token_endpoint: Url,
    client_id: String,
    client_secret: SecretString,
}

impl ClientSecretCredential {
    /// # Errors
    /// Returns [`CredentialError::Config`] for an invalid tenant id, client
    /// id, or authority host.
    pub fn new(
        tenant_id: &str,
        client_id: impl Into<String>,
        client_secret: SecretString,
        options: CredentialOptions,
    ) -> Result<Self, CredentialError> {
        let client_id = client_id.into();
        if client_id.trim().is_empty() {
            return Err(CredentialError::Config("client_id must not be empty".into()));
        }
        if client_secret.is_empty() {
            return Err(CredentialError::Config("client_secret must not be empty".into()));
        }
        validate_tenant_id(tenant_id)?;

        let authority = match options.authority_host {
            Some(url) => url,
            None => Url::parse(DEFAULT_AUTHORITY_HOST)
                .map_err(|e| CredentialError::Config(format!("authority host: {e}")))?,
        };
        let token_endpoint = token_endpoint(&authority, tenant_id)?;

        let pipeline = match options.pipeline {
            Some(pipeline) => pipeline,
            None => token_pipeline(false, Duration::from_secs(30), 3)?,
        };

        Ok(Self {
            pipeline,
            token_endpoint,
            client_id,
            client_secret,
        })
    }

    #[must_use]
    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        let scope = join_scopes(scopes)?;
        let secret = Zeroizing::new(self.client_secret.expose().to_owned());
        let fields = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", secret.as_str()),
            ("scope", scope.as_str()),
        ];

        let request = Request::new(Method::POST, self.token_endpoint.clone())
            .with_form(fields.as_slice())
            .map_err(|_| CredentialError::Config("token request could not be encoded".into()))?;

        let token = fetch_token(&self.pipeline, request, "client secret token").await?;
        tracing::debug!(
            client_id = %self.client_id,
            scope = %scope,
            expires_on = %token.expires_on(),
            "Acquired token with client secret"
        );
        Ok(token)
    }
}

fn validate_tenant_id(tenant_id: &str) -> Result<(), CredentialError> {
    let valid = !tenant_id.is_empty()
        && tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(CredentialError::Config(format!("invalid tenant id '{tenant_id}'")))
    }
}

fn token_endpoint(authority: &Url, tenant_id: &str) -> Result<Url, CredentialError> {
    let base = authority.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}/{tenant_id}/oauth2/v2.0/token"))
        .map_err(|e| CredentialError::Config(format!("token endpoint: {e}")))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::credentials::test_support::{mock_server_pipeline, token_json};
    use httpmock::prelude::*;

    fn credential(server: &MockServer) -> ClientSecretCredential {
        ClientSecretCredential::new(
            "contoso",
            "app-id",
            SecretString::new("s3cr3t"),
            CredentialOptions {
                authority_host: Some(Url::parse(&server.base_url()).unwrap()),
                pipeline: Some(mock_server_pipeline()),
            },
        )
        .unwrap()
    }

    #[test]
    fn builds_token_endpoint() {
        let credential = ClientSecretCredential::new(
            "contoso",
            "app-id",
            SecretString::new("s3cr3t"),
            CredentialOptions {
                authority_host: Some(Url::parse("https://login.example.com/").unwrap()),
                pipeline: Some(mock_server_pipeline()),
            },
        )
        .unwrap();
        assert_eq!(
            credential.token_endpoint().as_str(),
            "https://login.example.com/contoso/oauth2/v2.0/token"
        );
    }

    #[test]
    fn rejects_invalid_tenant() {
        let err = ClientSecretCredential::new(
            "../evil",
            "app-id",
            SecretString::new("s3cr3t"),
            CredentialOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CredentialError::Config(_)));
    }

    #[test]
    fn debug_hides_secret() {
        let credential = ClientSecretCredential::new(
            "contoso",
            "app-id",
            SecretString::new("s3cr3t"),
            CredentialOptions {
                authority_host: None,
                pipeline: Some(mock_server_pipeline()),
            },
        )
        .unwrap();
        assert!(!format!("{credential:?}").contains("s3cr3t"));
    }

    #[tokio::test]
    async fn posts_client_credentials_form() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/contoso/oauth2/v2.0/token")
                .form_urlencoded_tuple("grant_type", "client_credentials")
                .form_urlencoded_tuple("client_id", "app-id")
                .form_urlencoded_tuple("client_secret", "s3cr3t")
                .form_urlencoded_tuple("scope", "api://svc/.default offline");
            then.status(200)
                .header("content-type", "application/json")
                .body(token_json("tok-1", 3600));
        });

        let token = credential(&server)
            .get_token(&["api://svc/.default", "offline"])
            .await
            .unwrap();

        mock.assert();
        assert_eq!(token.secret().expose(), "tok-1");
        assert!(!token.expires_within(Duration::from_secs(3000)));
    }

    #[tokio::test]
    async fn rejected_secret_is_http_error_without_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/contoso/oauth2/v2.0/token");
            then.status(401)
                .body(r#"{"error":"invalid_client","error_description":"echo s3cr3t"}"#);
        });

        let err = credential(&server).get_token(&["scope"]).await.unwrap_err();

        assert!(matches!(err, CredentialError::Http(_)));
        assert!(err.to_string().contains("401"));
        assert!(!err.to_string().contains("s3cr3t"));
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/contoso/oauth2/v2.0/token");
            then.status(200).body("not json");
        });

        let err = credential(&server).get_token(&["scope"]).await.unwrap_err();
        assert!(matches!(err, CredentialError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn empty_scopes_rejected_without_io() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST);
            then.status(200);
        });

        let err = credential(&server).get_token(&[]).await.unwrap_err();

        assert!(matches!(err, CredentialError::Config(_)));
        mock.assert_calls(0);
    }
}
