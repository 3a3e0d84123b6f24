use crate::config::{ExponentialBackoff, RetryConfig, RetryTrigger};
use crate::context::Context;
use crate::error::HttpError;
use crate::policy::{Next, Policy};
use crate::request::Request;
use crate::response::{Response, read_body_limited};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

/// Bytes read from a retried response so its connection can be reused.
const RETRY_DRAIN_LIMIT: usize = 64 * 1024;

/// Re-issues the downstream call on transient faults and retryable statuses.
///
/// The delay before retry `n` is the exponential backoff for `n`, replaced by
/// the server's retry hint when that is longer, and never past the context
/// deadline. The response or error returned to earlier policies carries the
/// number of physical attempts.
///
/// A request whose body is single-use is not retried once the transport has
/// read it; the original outcome is returned instead.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = calculate_backoff(&self.config.backoff, attempt);
        match retry_after {
            Some(hint) if !self.config.ignore_retry_after && hint > backoff => hint,
            _ => backoff,
        }
    }
}

#[async_trait]
impl Policy for RetryPolicy {
    async fn send(
        &self,
        ctx: &mut Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> Result<Response, HttpError> {
        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 && ctx.is_expired() {
                return Err(HttpError::DeadlineExceeded(ctx.timeout().unwrap_or_default()));
            }
            ctx.set_attempt(attempt);
            let result = next.run(ctx, request).await;
            let attempts = attempt + 1;

            let (trigger, retry_after) = match &result {
                Ok(response) => (
                    RetryTrigger::Status(response.status().as_u16()),
                    response.retry_after(),
                ),
                Err(err) => (RetryTrigger::from_error(err), None),
            };
            if !self.config.should_retry(trigger) || attempt >= self.config.max_retries {
                return finish(result, attempts);
            }
            if !request.is_replayable() && request.body().has_been_read() {
                tracing::debug!(
                    attempts,
                    trigger = ?trigger,
                    method = %request.method(),
                    "Not retrying: single-use request body was already sent"
                );
                return finish(result, attempts);
            }

            let mut delay = self.delay_for(attempt, retry_after);
            if let Some(remaining) = ctx.remaining() {
                if remaining.is_zero() {
                    let timeout = ctx.timeout().unwrap_or_default();
                    return Err(HttpError::DeadlineExceeded(timeout));
                }
                delay = delay.min(remaining);
            }

            match result {
                Ok(response) => {
                    tracing::debug!(
                        retry = attempts,
                        max_retries = self.config.max_retries,
                        status = response.status().as_u16(),
                        method = %request.method(),
                        host = request.url().host_str().unwrap_or_default(),
                        backoff_ms = delay.as_millis(),
                        retry_after_used = retry_after.is_some_and(|hint| hint >= delay),
                        "Retrying request after status code"
                    );
                    drain(response).await;
                }
                Err(err) => {
                    tracing::debug!(
                        retry = attempts,
                        max_retries = self.config.max_retries,
                        error = %err,
                        method = %request.method(),
                        host = request.url().host_str().unwrap_or_default(),
                        backoff_ms = delay.as_millis(),
                        "Retrying request after error"
                    );
                }
            }

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn finish(result: Result<Response, HttpError>, attempts: u32) -> Result<Response, HttpError> {
    match result {
        Ok(mut response) => {
            response.set_attempts(attempts);
            Ok(response)
        }
        Err(err) if attempts > 1 => Err(HttpError::RetriesExhausted {
            attempts,
            source: Box::new(err),
        }),
        Err(err) => Err(err),
    }
}

/// Read a discarded response so the connection can return to the pool.
async fn drain(mut response: Response) {
    if response.is_buffered() {
        return;
    }
    if let Ok(body) = response.take_body()
        && let Err(e) = read_body_limited(body, RETRY_DRAIN_LIMIT).await
    {
        tracing::debug!(
            error = %e,
            "Failed to drain response body before retry; connection may not be reused"
        );
    }
}

/// Backoff before retry number `attempt + 1`: `min(initial * multiplier^attempt, max)`
/// plus up to 25% jitter, capped at `max`.
///
/// NaN, infinite or negative settings fall back to safe values instead of panicking.
#[must_use]
pub fn calculate_backoff(backoff: &ExponentialBackoff, attempt: u32) -> Duration {
    // beyond a day is not a retry delay
    const MAX_BACKOFF_SECS: f64 = 86400.0;

    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);

    let multiplier = if backoff.multiplier.is_finite() && backoff.multiplier >= 0.0 {
        backoff.multiplier
    } else {
        1.0
    };
    let initial_secs = backoff.initial.as_secs_f64();
    let max_secs = backoff.max.as_secs_f64().min(MAX_BACKOFF_SECS);

    let base = initial_secs * multiplier.powi(exponent);
    let clamped = if base.is_finite() {
        base.min(max_secs).max(0.0)
    } else {
        max_secs
    };
    let duration = Duration::from_secs_f64(clamped);

    let duration = if backoff.jitter {
        let jitter_factor = rand::rng().random_range(0.0..=0.25);
        duration + duration.mul_f64(jitter_factor)
    } else {
        duration
    };

    duration.min(Duration::from_secs_f64(max_secs))
}
