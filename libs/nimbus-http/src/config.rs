use crate::error::HttpError;
use figment::Figment;
use figment::providers::Env;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

/// Default User-Agent string for HTTP requests
pub const DEFAULT_USER_AGENT: &str = concat!("nimbus-http/", env!("CARGO_PKG_VERSION"));

/// Status codes retried by default.
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Conditions that trigger a retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RetryTrigger {
    /// Transport-level errors (connection refused, DNS failure, reset, etc.)
    TransportError,
    /// Request attempt timeout
    Timeout,
    /// Specific HTTP status code
    Status(u16),
    /// Error that is never retryable (authentication, protocol, deadline)
    NonRetryable,
}

impl RetryTrigger {
    /// HTTP 429 Too Many Requests
    pub const TOO_MANY_REQUESTS: Self = Self::Status(429);
    /// HTTP 503 Service Unavailable
    pub const SERVICE_UNAVAILABLE: Self = Self::Status(503);

    /// Map an error onto the trigger it represents.
    ///
    /// Only [`HttpError::is_transient`] errors map to a retryable trigger.
    #[must_use]
    pub fn from_error(err: &HttpError) -> Self {
        match err {
            _ if !err.is_transient() => Self::NonRetryable,
            HttpError::Timeout(_) => Self::Timeout,
            _ => Self::TransportError,
        }
    }
}

/// Exponential backoff configuration for retries
///
/// Computes delay as: `min(initial * multiplier^attempt, max)` with optional jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Initial backoff duration
    pub initial: Duration,

    /// Maximum backoff duration
    pub max: Duration,

    /// Backoff multiplier for exponential growth (default: 2.0)
    pub multiplier: f64,

    /// Add a random 0-25% on top of each delay
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(800),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ExponentialBackoff {
    /// Create backoff with custom initial and max durations
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            ..Default::default()
        }
    }

    /// Create fast backoff for testing (1ms initial, 100ms max, no jitter)
    #[must_use]
    pub fn fast() -> Self {
        Self {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Retry policy configuration.
///
/// `max_retries` counts re-issues after the initial attempt, so the total
/// number of physical attempts is at most `max_retries + 1`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt (0 = no retries)
    pub max_retries: u32,

    /// Backoff strategy configuration
    pub backoff: ExponentialBackoff,

    /// Conditions that cause a retry
    pub retry_on: HashSet<RetryTrigger>,

    /// Always use the computed backoff, even when the service sends `Retry-After`
    pub ignore_retry_after: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let mut retry_on = HashSet::from([RetryTrigger::TransportError, RetryTrigger::Timeout]);
        retry_on.extend(DEFAULT_RETRY_STATUS_CODES.map(RetryTrigger::Status));
        Self {
            max_retries: 3,
            backoff: ExponentialBackoff::default(),
            retry_on,
            ignore_retry_after: false,
        }
    }
}

impl RetryConfig {
    /// Create config with no retries
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Default triggers with the given retry budget and fast, jitter-free backoff.
    #[must_use]
    pub fn fast(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: ExponentialBackoff::fast(),
            ..Default::default()
        }
    }

    /// Whether the given trigger is configured as retryable.
    #[must_use]
    pub fn should_retry(&self, trigger: RetryTrigger) -> bool {
        self.retry_on.contains(&trigger)
    }
}

/// Verbosity of the logging policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// No request logging
    #[default]
    #[serde(alias = "none")]
    None,
    /// Method, URL, status, attempts and elapsed time
    #[serde(alias = "basic")]
    Basic,
    /// `Basic` plus redacted request and response headers
    #[serde(alias = "headers")]
    Headers,
    /// `Headers` plus a preview of request and response bodies
    #[serde(alias = "body")]
    Body,
}

/// Options consumed when a client builds its pipeline.
///
/// Keys are camelCase in configuration sources; snake_case aliases make the
/// same options settable from environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientOptions {
    /// Retries after the initial attempt
    #[serde(alias = "retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Backoff before the first retry; doubles on every further retry
    #[serde(alias = "retry_base_delay", with = "humantime_duration")]
    pub retry_base_delay: Duration,

    /// Upper bound for a single backoff delay
    #[serde(alias = "retry_max_delay", with = "humantime_duration")]
    pub retry_max_delay: Duration,

    /// Response statuses that trigger a retry
    #[serde(alias = "retry_status_codes")]
    pub retry_status_codes: Vec<u16>,

    /// Request logging verbosity
    #[serde(alias = "log_level")]
    pub log_level: LogLevel,

    /// Appended to the default User-Agent
    #[serde(alias = "user_agent_suffix")]
    pub user_agent_suffix: Option<String>,

    /// Prepended to the default User-Agent
    #[serde(alias = "application_id")]
    pub application_id: Option<String>,

    /// Scopes requested by the authentication policy
    #[serde(alias = "credential_scopes")]
    pub credential_scopes: Vec<String>,

    /// Default deadline for a logical operation, applied when the caller's
    /// context carries none
    #[serde(with = "humantime_duration_opt")]
    pub timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        let backoff = ExponentialBackoff::default();
        Self {
            retry_max_attempts: 3,
            retry_base_delay: backoff.initial,
            retry_max_delay: backoff.max,
            retry_status_codes: DEFAULT_RETRY_STATUS_CODES.to_vec(),
            log_level: LogLevel::None,
            user_agent_suffix: None,
            application_id: None,
            credential_scopes: Vec::new(),
            timeout: None,
        }
    }
}

impl ClientOptions {
    /// Extract options from a figment.
    ///
    /// # Errors
    /// Returns `HttpError::Config` if extraction or validation fails.
    pub fn from_figment(figment: &Figment) -> Result<Self, HttpError> {
        let options: Self = figment
            .extract()
            .map_err(|e| HttpError::Config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Read options from environment variables with the given prefix,
    /// e.g. `NIMBUS_RETRY_MAX_ATTEMPTS=5` with prefix `NIMBUS_`.
    ///
    /// # Errors
    /// Returns `HttpError::Config` if a variable cannot be parsed.
    pub fn from_env(prefix: &str) -> Result<Self, HttpError> {
        Self::from_figment(&Figment::from(Env::prefixed(prefix)))
    }

    /// Check self-consistency.
    ///
    /// # Errors
    /// Returns `HttpError::Config` for an invalid user agent fragment or an
    /// inverted backoff range.
    pub fn validate(&self) -> Result<(), HttpError> {
        if self.retry_base_delay > self.retry_max_delay {
            return Err(HttpError::Config(format!(
                "retryBaseDelay ({:?}) exceeds retryMaxDelay ({:?})",
                self.retry_base_delay, self.retry_max_delay
            )));
        }
        if let Some(timeout) = self.timeout
            && timeout.is_zero()
        {
            return Err(HttpError::Config("timeout must be non-zero".into()));
        }
        http::HeaderValue::from_str(&self.user_agent())?;
        Ok(())
    }

    /// Retry configuration derived from these options.
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        let mut retry_on = HashSet::from([RetryTrigger::TransportError, RetryTrigger::Timeout]);
        retry_on.extend(
            self.retry_status_codes
                .iter()
                .copied()
                .map(RetryTrigger::Status),
        );
        RetryConfig {
            max_retries: self.retry_max_attempts,
            backoff: ExponentialBackoff::new(self.retry_base_delay, self.retry_max_delay),
            retry_on,
            ignore_retry_after: false,
        }
    }

    /// Full User-Agent: `[application_id ]nimbus-http/<ver> (<os>)[ suffix]`.
    #[must_use]
    pub fn user_agent(&self) -> String {
        let mut ua = String::new();
        if let Some(app) = self.application_id.as_deref().filter(|s| !s.is_empty()) {
            ua.push_str(app);
            ua.push(' ');
        }
        ua.push_str(DEFAULT_USER_AGENT);
        ua.push_str(" (");
        ua.push_str(std::env::consts::OS);
        ua.push(')');
        if let Some(suffix) = self.user_agent_suffix.as_deref().filter(|s| !s.is_empty()) {
            ua.push(' ');
            ua.push_str(suffix);
        }
        ua
    }
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

mod humantime_duration_opt {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|raw| humantime::parse_duration(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}
