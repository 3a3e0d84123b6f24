use crate::config::{ClientOptions, RetryConfig};
use crate::context::Context;
use crate::error::HttpError;
use crate::policies::{LoggingPolicy, RequestIdPolicy, RetryPolicy, TracingPolicy, UserAgentPolicy};
use crate::policy::{Next, Policy};
use crate::request::Request;
use crate::response::Response;
use crate::transport::{HttpTransport, Transport};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Immutable chain of policies ending in a transport.
///
/// Built once per client and shared by every operation the client issues;
/// cloning is cheap. Policies run in registration order on the way in and in
/// reverse order on the way out.
#[derive(Clone)]
pub struct Pipeline {
    policies: Arc<[Arc<dyn Policy>]>,
    transport: Arc<dyn Transport>,
    default_timeout: Option<Duration>,
}

impl Pipeline {
    /// Compose `policies` in the given order over `transport`.
    #[must_use]
    pub fn new(policies: Vec<Arc<dyn Policy>>, transport: Arc<dyn Transport>) -> Self {
        Self {
            policies: policies.into(),
            transport,
            default_timeout: None,
        }
    }

    /// Standard pipeline builder for the given options.
    #[must_use]
    pub fn builder(options: ClientOptions) -> PipelineBuilder {
        PipelineBuilder::new(options)
    }

    /// Deadline applied to operations whose context has none.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    #[must_use]
    pub fn policies(&self) -> &[Arc<dyn Policy>] {
        &self.policies
    }

    /// Run one logical operation through the chain.
    ///
    /// Every HTTP status is returned as `Ok`; use
    /// [`Response::error_for_status`] to turn 4xx/5xx into an error. When the
    /// context carries a deadline, its expiry aborts the in-flight exchange.
    ///
    /// # Errors
    /// Returns the first error no policy recovered from, or
    /// `HttpError::DeadlineExceeded` when the deadline passes.
    pub async fn send(&self, ctx: &mut Context, request: &mut Request) -> Result<Response, HttpError> {
        ctx.ensure_timeout(self.default_timeout);
        let next = Next::new(&self.policies, self.transport.as_ref());

        match (ctx.deadline(), ctx.timeout()) {
            (Some(deadline), Some(timeout)) => {
                if ctx.is_expired() {
                    return Err(HttpError::DeadlineExceeded(timeout));
                }
                tokio::time::timeout_at(deadline, next.run(ctx, request))
                    .await
                    .unwrap_or(Err(HttpError::DeadlineExceeded(timeout)))
            }
            _ => next.run(ctx, request).await,
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("policies", &self.policies)
            .field("transport", &self.transport)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

/// Assembles the standard policy order:
///
/// ```text
/// per-call… → UserAgent → RequestId → Tracing → Authentication? → Logging → Retry → per-retry… → Transport
/// ```
///
/// Header-stamping policies run before authentication so the token is
/// attached to the final header set. Logging sits outside retry and sees one
/// logical call; per-retry policies run once per physical attempt.
#[must_use]
pub struct PipelineBuilder {
    options: ClientOptions,
    per_call: Vec<Arc<dyn Policy>>,
    per_retry: Vec<Arc<dyn Policy>>,
    authentication: Option<Arc<dyn Policy>>,
    retry: Option<RetryConfig>,
    transport: Option<Arc<dyn Transport>>,
}

impl PipelineBuilder {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            per_call: Vec::new(),
            per_retry: Vec::new(),
            authentication: None,
            retry: None,
            transport: None,
        }
    }

    /// Options the pipeline is built from, e.g. for the authentication
    /// policy's scopes.
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Policy run once per logical call, before the built-in ones.
    pub fn per_call(mut self, policy: Arc<dyn Policy>) -> Self {
        self.per_call.push(policy);
        self
    }

    /// Policy run once per physical attempt, inside retry.
    pub fn per_retry(mut self, policy: Arc<dyn Policy>) -> Self {
        self.per_retry.push(policy);
        self
    }

    /// Authentication policy, placed after the header-stamping policies.
    pub fn authentication(mut self, policy: Arc<dyn Policy>) -> Self {
        self.authentication = Some(policy);
        self
    }

    /// Override the retry configuration derived from the options.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Transport to use instead of the default HTTPS transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// # Errors
    /// Returns `HttpError::Config` / `InvalidHeaderValue` for invalid options,
    /// or `HttpError::Tls` if the default transport cannot be built.
    pub fn build(self) -> Result<Pipeline, HttpError> {
        self.options.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };
        let retry = self.retry.unwrap_or_else(|| self.options.retry_config());

        let mut policies = self.per_call;
        policies.push(Arc::new(UserAgentPolicy::try_new(self.options.user_agent())?));
        policies.push(Arc::new(RequestIdPolicy));
        policies.push(Arc::new(TracingPolicy));
        if let Some(auth) = self.authentication {
            policies.push(auth);
        }
        policies.push(Arc::new(LoggingPolicy::new(self.options.log_level)));
        policies.push(Arc::new(RetryPolicy::new(retry)));
        policies.extend(self.per_retry);

        Ok(Pipeline::new(policies, transport).with_default_timeout(self.options.timeout))
    }
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("options", &self.options)
            .field("per_call", &self.per_call)
            .field("per_retry", &self.per_retry)
            .field("authentication", &self.authentication)
            .field("retry", &self.retry)
            .field("transport", &self.transport)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::ExponentialBackoff;
    use crate::error::ErrorKind;
    use crate::mock::{MockReply, MockResponse, MockTransport};
    use crate::policies::CLIENT_REQUEST_ID;
    use async_trait::async_trait;
    use http::StatusCode;
    use http::header::USER_AGENT;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts how often it runs.
    #[derive(Debug, Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl Policy for Counting {
        async fn send(
            &self,
            ctx: &mut Context,
            request: &mut Request,
            next: Next<'_>,
        ) -> Result<Response, HttpError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            next.run(ctx, request).await
        }
    }

    fn fast_options() -> ClientOptions {
        let backoff = ExponentialBackoff::fast();
        ClientOptions {
            retry_base_delay: backoff.initial,
            retry_max_delay: backoff.max,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_builder_standard_order() {
        let per_call = Arc::new(Counting::default());
        let per_retry = Arc::new(Counting::default());
        let transport = Arc::new(
            MockTransport::new()
                .with_status(StatusCode::SERVICE_UNAVAILABLE)
                .with_status(StatusCode::OK),
        );

        let pipeline = Pipeline::builder(fast_options())
            .per_call(per_call.clone())
            .per_retry(per_retry.clone())
            .transport(transport.clone())
            .build()
            .unwrap();
        assert_eq!(pipeline.policies().len(), 7);

        let mut request = Request::get("https://example.com").unwrap();
        let response = pipeline
            .send(&mut Context::new(), &mut request)
            .await
            .unwrap();

        assert_eq!(response.attempts(), 2);
        assert_eq!(per_call.0.load(Ordering::SeqCst), 1);
        assert_eq!(per_retry.0.load(Ordering::SeqCst), 2);

        let sent = transport.requests();
        assert!(sent[0].headers.contains_key(USER_AGENT));
        assert!(sent[0].headers.contains_key(&CLIENT_REQUEST_ID));
    }

    #[tokio::test]
    async fn test_builder_rejects_invalid_options() {
        let options = ClientOptions {
            user_agent_suffix: Some("bad\u{7f}".into()),
            ..Default::default()
        };
        let err = Pipeline::builder(options)
            .transport(Arc::new(MockTransport::new()))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_in_flight_exchange() {
        let transport = Arc::new(MockTransport::new().with_response(
            MockResponse::ok().with_delay(Duration::from_secs(30)),
        ));
        let pipeline = Pipeline::new(Vec::new(), transport.clone());
        let mut ctx = Context::new().with_timeout(Duration::from_secs(1));
        let mut request = Request::get("https://example.com").unwrap();

        let err = pipeline.send(&mut ctx, &mut request).await.unwrap_err();

        assert!(matches!(err, HttpError::DeadlineExceeded(d) if d == Duration::from_secs(1)));
        assert_eq!(err.kind(), ErrorKind::TransportFault);

        // shared pipeline is still usable
        transport.push(MockReply::Response(MockResponse::ok()));
        let mut request = Request::get("https://example.com").unwrap();
        let response = pipeline
            .send(&mut Context::new(), &mut request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_timeout_from_options() {
        let transport = Arc::new(MockTransport::new().with_response(
            MockResponse::ok().with_delay(Duration::from_secs(30)),
        ));
        let options = ClientOptions {
            timeout: Some(Duration::from_secs(5)),
            retry_max_attempts: 0,
            ..fast_options()
        };
        let pipeline = Pipeline::builder(options)
            .transport(transport)
            .build()
            .unwrap();

        let mut request = Request::get("https://example.com").unwrap();
        let err = pipeline
            .send(&mut Context::new(), &mut request)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::DeadlineExceeded(_)));
    }

    #[tokio::test]
    async fn test_concurrent_operations_share_pipeline() {
        let transport = Arc::new(
            MockTransport::new().with_fallback(MockReply::Response(MockResponse::ok())),
        );
        let pipeline = Pipeline::builder(fast_options())
            .transport(transport.clone())
            .build()
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let pipeline = pipeline.clone();
            handles.push(tokio::spawn(async move {
                let mut request = Request::get(&format!("https://example.com/{i}")).unwrap();
                pipeline.send(&mut Context::new(), &mut request).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().status(), StatusCode::OK);
        }
        assert_eq!(transport.call_count(), 16);
    }
}
