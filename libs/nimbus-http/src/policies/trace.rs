use crate::context::Context;
use crate::error::HttpError;
use crate::policy::{Next, Policy};
use crate::request::Request;
use crate::response::Response;
use crate::security::sanitized_url;
use async_trait::async_trait;
use tracing::{Instrument, Level};

/// Opens an `outgoing_http` client span around the rest of the chain.
///
/// Records `http.method`, `http.url` (query stripped), `otel.kind = "client"`,
/// then `http.status_code` and `error` once the chain returns. With the `otel`
/// feature, W3C trace context is injected into the request headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPolicy;

#[async_trait]
impl Policy for TracingPolicy {
    async fn send(
        &self,
        ctx: &mut Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> Result<Response, HttpError> {
        let span = tracing::span!(
            Level::INFO, "outgoing_http",
            http.method = %request.method(),
            http.url = %sanitized_url(request.url()),
            otel.kind = "client",
            http.status_code = tracing::field::Empty,
            error = tracing::field::Empty,
        );
        span.in_scope(|| crate::otel::inject_current_span(request.headers_mut()));

        let result = next.run(ctx, request).instrument(span.clone()).await;

        match &result {
            Ok(response) => {
                span.record("http.status_code", response.status().as_u16());
                if response.status().is_client_error() || response.status().is_server_error() {
                    span.record("error", true);
                }
            }
            Err(_) => {
                span.record("error", true);
            }
        }
        span.in_scope(|| tracing::debug!("Outgoing exchange finished"));
        result
    }
}
