use crate::context::Context;
use crate::error::HttpError;
use crate::policy::{Next, Policy};
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use http::HeaderValue;
use http::header::USER_AGENT;

/// Adds a `User-Agent` header to requests that do not carry one.
#[derive(Debug, Clone)]
pub struct UserAgentPolicy {
    user_agent: HeaderValue,
}

impl UserAgentPolicy {
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if the string is not a valid header value.
    pub fn try_new(user_agent: impl AsRef<str>) -> Result<Self, HttpError> {
        let user_agent = HeaderValue::from_str(user_agent.as_ref())?;
        Ok(Self { user_agent })
    }

    #[must_use]
    pub fn user_agent(&self) -> &HeaderValue {
        &self.user_agent
    }
}

#[async_trait]
impl Policy for UserAgentPolicy {
    async fn send(
        &self,
        ctx: &mut Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> Result<Response, HttpError> {
        if !request.headers().contains_key(USER_AGENT) {
            request
                .headers_mut()
                .insert(USER_AGENT, self.user_agent.clone());
        }
        next.run(ctx, request).await
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::ClientOptions;
    use crate::mock::MockTransport;
    use crate::pipeline::Pipeline;
    use http::StatusCode;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_adds_user_agent() {
        let options = ClientOptions {
            user_agent_suffix: Some("svc/2.1".into()),
            ..Default::default()
        };
        let transport = Arc::new(MockTransport::new().with_status(StatusCode::OK));
        let policy = UserAgentPolicy::try_new(options.user_agent()).unwrap();
        let pipeline = Pipeline::new(vec![Arc::new(policy)], transport.clone());

        let mut request = Request::get("https://example.com").unwrap();
        pipeline.send(&mut Context::new(), &mut request).await.unwrap();

        let sent = &transport.requests()[0];
        let ua = sent.headers.get(USER_AGENT).unwrap().to_str().unwrap();
        assert!(ua.starts_with("nimbus-http/"));
        assert!(ua.ends_with(" svc/2.1"));
    }

    #[tokio::test]
    async fn test_preserves_caller_user_agent() {
        let transport = Arc::new(MockTransport::new().with_status(StatusCode::OK));
        let policy = UserAgentPolicy::try_new("default/1.0").unwrap();
        let pipeline = Pipeline::new(vec![Arc::new(policy)], transport.clone());

        let mut request = Request::get("https://example.com")
            .unwrap()
            .with_header("user-agent", "custom/9.9")
            .unwrap();
        pipeline.send(&mut Context::new(), &mut request).await.unwrap();

        assert_eq!(
            transport.requests()[0].headers.get(USER_AGENT).unwrap(),
            "custom/9.9"
        );
    }

    #[test]
    fn test_invalid_user_agent_rejected() {
        let err = UserAgentPolicy::try_new("bad\nagent").unwrap_err();
        assert!(matches!(err, HttpError::InvalidHeaderValue(_)));
    }
}
