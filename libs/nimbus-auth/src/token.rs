use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use time::OffsetDateTime;

use crate::error::CredentialError;
use crate::secret::SecretString;

/// A bearer token and the instant it stops being valid.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    token: SecretString,
    expires_on: OffsetDateTime,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: OffsetDateTime) -> Self {
        Self {
            token: SecretString::new(token),
            expires_on,
        }
    }

    /// Token valid for `lifetime` from now.
    pub fn expiring_in(token: impl Into<String>, lifetime: Duration) -> Self {
        Self::new(token, OffsetDateTime::now_utc() + lifetime)
    }

    #[must_use]
    pub fn secret(&self) -> &SecretString {
        &self.token
    }

    #[must_use]
    pub fn expires_on(&self) -> OffsetDateTime {
        self.expires_on
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_on <= OffsetDateTime::now_utc()
    }

    /// Whether the token expires within `margin` from now.
    #[must_use]
    pub fn expires_within(&self, margin: Duration) -> bool {
        self.expires_on <= OffsetDateTime::now_utc() + margin
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &self.token)
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Identity endpoint token response.
///
/// Deserialize-only so the access token cannot end up in serialized output.
/// Managed identity endpoints send `expires_in` / `expires_on` as strings.
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<NumberOrString>,
    #[serde(default)]
    pub expires_on: Option<NumberOrString>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum NumberOrString {
    Number(i64),
    Text(String),
}

impl NumberOrString {
    fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl TokenResponse {
    /// Convert into an [`AccessToken`]; `default_ttl` applies when the
    /// response carries no lifetime.
    pub(crate) fn into_access_token(
        self,
        default_ttl: Duration,
    ) -> Result<AccessToken, CredentialError> {
        if let Some(tt) = &self.token_type
            && !tt.eq_ignore_ascii_case("bearer")
        {
            return Err(CredentialError::UnsupportedTokenType(tt.clone()));
        }
        if self.access_token.is_empty() {
            return Err(CredentialError::InvalidResponse("empty access_token".into()));
        }

        let expires_on = if let Some(on) = self.expires_on.as_ref().and_then(NumberOrString::as_i64) {
            OffsetDateTime::from_unix_timestamp(on)
                .map_err(|e| CredentialError::InvalidResponse(format!("expires_on: {e}")))?
        } else if let Some(value) = &self.expires_in {
            let secs = value
                .as_i64()
                .and_then(|n| u64::try_from(n).ok())
                .ok_or_else(|| CredentialError::InvalidResponse("invalid expires_in".into()))?;
            OffsetDateTime::now_utc() + Duration::from_secs(secs)
        } else {
            OffsetDateTime::now_utc() + default_ttl
        };

        Ok(AccessToken::new(self.access_token, expires_on))
    }
}
