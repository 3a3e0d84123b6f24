use crate::config::LogLevel;
use crate::context::Context;
use crate::error::HttpError;
use crate::policy::{Next, Policy};
use crate::policies::RequestId;
use crate::request::Request;
use crate::response::Response;
use crate::security::{ERROR_BODY_PREVIEW_LIMIT, redacted_headers, sanitized_url};
use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use std::time::Instant;

/// Logs each logical call once, after retries have settled.
///
/// Sensitive header values are never logged. At [`LogLevel::Body`] the
/// start of the response body is previewed with [`Response::peek`]; the
/// caller reads the full body afterwards, with the same limits and errors as
/// at any other level.
#[derive(Debug, Clone, Copy)]
pub struct LoggingPolicy {
    level: LogLevel,
}

impl LoggingPolicy {
    #[must_use]
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }

    #[must_use]
    pub fn level(&self) -> LogLevel {
        self.level
    }
}

#[async_trait]
impl Policy for LoggingPolicy {
    async fn send(
        &self,
        ctx: &mut Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> Result<Response, HttpError> {
        if self.level == LogLevel::None {
            return next.run(ctx, request).await;
        }

        let method = request.method().clone();
        let url = sanitized_url(request.url());
        if self.level >= LogLevel::Headers {
            tracing::debug!(
                method = %method,
                url = %url,
                headers = %render_headers(request.headers()),
                "HTTP request headers"
            );
        }
        if self.level >= LogLevel::Body
            && let Some(body) = request.body().as_bytes()
        {
            tracing::debug!(method = %method, url = %url, body = %preview(body), "HTTP request body");
        }

        let started = Instant::now();
        let result = next.run(ctx, request).await;
        let elapsed_ms = started.elapsed().as_millis();
        let request_id = ctx
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_default();

        match result {
            Ok(mut response) => {
                tracing::info!(
                    method = %method,
                    url = %url,
                    status = response.status().as_u16(),
                    attempts = response.attempts(),
                    elapsed_ms,
                    request_id = %request_id,
                    "HTTP request completed"
                );
                if self.level >= LogLevel::Headers {
                    tracing::debug!(
                        status = response.status().as_u16(),
                        headers = %render_headers(response.headers()),
                        "HTTP response headers"
                    );
                }
                if self.level >= LogLevel::Body {
                    let status = response.status().as_u16();
                    let head = response.peek(ERROR_BODY_PREVIEW_LIMIT).await;
                    tracing::debug!(
                        status,
                        body = %preview(&head),
                        "HTTP response body"
                    );
                }
                Ok(response)
            }
            Err(err) => {
                tracing::warn!(
                    method = %method,
                    url = %url,
                    error = %err,
                    attempts = err.attempts().unwrap_or(1),
                    elapsed_ms,
                    request_id = %request_id,
                    "HTTP request failed"
                );
                Err(err)
            }
        }
    }
}

fn render_headers(headers: &HeaderMap) -> String {
    redacted_headers(headers)
        .into_iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn preview(body: &Bytes) -> String {
    let end = body.len().min(ERROR_BODY_PREVIEW_LIMIT);
    String::from_utf8_lossy(&body[..end]).into_owned()
}
