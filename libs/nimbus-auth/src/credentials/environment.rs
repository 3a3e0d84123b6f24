use async_trait::async_trait;
use url::Url;

use super::{ClientSecretCredential, CredentialOptions};
use crate::credential::TokenCredential;
use crate::error::CredentialError;
use crate::secret::SecretString;
use crate::token::AccessToken;

pub const AZURE_TENANT_ID: &str = "AZURE_TENANT_ID";
pub const AZURE_CLIENT_ID: &str = "AZURE_CLIENT_ID";
pub const AZURE_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
pub const AZURE_AUTHORITY_HOST: &str = "AZURE_AUTHORITY_HOST";

/// Client secret credential configured through environment variables.
///
/// Missing variables are not a construction error: the credential then
/// reports [`CredentialError::Unavailable`] so a chain can move on.
#[derive(Debug, Clone)]
pub struct EnvironmentCredential {
    inner: Result<ClientSecretCredential, CredentialError>,
}

impl EnvironmentCredential {
    #[must_use]
    pub fn new(options: CredentialOptions) -> Self {
        Self::from_lookup(|name| std::env::var(name).ok(), options)
    }

    /// Read the variables through `lookup` instead of the process environment.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, options: CredentialOptions) -> Self {
        let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let tenant = read(AZURE_TENANT_ID);
        let client = read(AZURE_CLIENT_ID);
        let secret = read(AZURE_CLIENT_SECRET);

        let inner = match (tenant, client, secret) {
            (Some(tenant), Some(client), Some(secret)) => {
                resolve_authority(read(AZURE_AUTHORITY_HOST), options).and_then(|options| {
                    ClientSecretCredential::new(&tenant, client, SecretString::new(secret), options)
                })
            }
            (tenant, client, secret) => {
                let missing: Vec<&str> = [
                    (AZURE_TENANT_ID, tenant.is_none()),
                    (AZURE_CLIENT_ID, client.is_none()),
                    (AZURE_CLIENT_SECRET, secret.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, absent)| absent.then_some(name))
                .collect();
                Err(CredentialError::Unavailable(format!(
                    "environment variables not set: {}",
                    missing.join(", ")
                )))
            }
        };
        Self { inner }
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.inner.is_ok()
    }
}

fn resolve_authority(
    from_env: Option<String>,
    mut options: CredentialOptions,
) -> Result<CredentialOptions, CredentialError> {
    if options.authority_host.is_none()
        && let Some(raw) = from_env
    {
        let url = Url::parse(&raw)
            .map_err(|e| CredentialError::Config(format!("{AZURE_AUTHORITY_HOST}: {e}")))?;
        options.authority_host = Some(url);
    }
    Ok(options)
}

#[async_trait]
impl TokenCredential for EnvironmentCredential {
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        match &self.inner {
            Ok(credential) => credential.get_token(scopes).await,
            Err(err) => Err(err.clone()),
        }
    }
}
