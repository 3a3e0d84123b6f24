//! Scripted in-memory transport for tests.
//!
//! Replies are served in the order they were queued; every physical call is
//! counted and its request recorded.

use crate::context::Context;
use crate::error::{BoxError, HttpError};
use crate::request::{Request, TransportBody};
use crate::response::Response;
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

/// Canned response served by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub delay: Option<Duration>,
    /// Serve the body as a stream instead of in memory
    pub streaming: bool,
    pub max_body_size: Option<usize>,
}

impl MockResponse {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            delay: None,
            streaming: false,
            max_body_size: None,
        }
    }

    #[must_use]
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// Response with a JSON body and content type.
    #[must_use]
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        Self::new(status)
            .with_header("content-type", "application/json")
            .with_body(value.to_string())
    }

    /// Add a header.
    ///
    /// # Panics
    /// Panics if the name is not lowercase or either part is invalid.
    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.append(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serve the body as a single-use stream, like a real transport.
    #[must_use]
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Limit applied when the caller reads the body.
    #[must_use]
    pub fn with_max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = Some(limit);
        self
    }

    /// Wait this long (on the tokio clock) before replying.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// One scripted outcome of a physical call.
#[derive(Debug, Clone)]
pub enum MockReply {
    Response(MockResponse),
    /// Connection-level failure
    TransportError(String),
    /// Attempt timeout
    Timeout(Duration),
}

impl MockReply {
    fn into_result(self) -> Result<MockResponse, HttpError> {
        match self {
            Self::Response(response) => Ok(response),
            Self::TransportError(message) => Err(HttpError::transport(message)),
            Self::Timeout(after) => Err(HttpError::Timeout(after)),
        }
    }
}

/// What the transport saw for one physical call.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// `Context::attempt()` at the time of the call
    pub attempt: u32,
}

/// Transport that serves queued replies.
///
/// When the queue is empty the fallback reply is used; without a fallback the
/// call fails with a transport error.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<MockReply>>,
    fallback: Option<MockReply>,
    requests: Mutex<Vec<RecordedRequest>>,
    calls: AtomicUsize,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response.
    #[must_use]
    pub fn with_response(self, response: MockResponse) -> Self {
        self.push(MockReply::Response(response));
        self
    }

    /// Queue an empty response with `status`.
    #[must_use]
    pub fn with_status(self, status: StatusCode) -> Self {
        self.with_response(MockResponse::new(status))
    }

    /// Queue a JSON response.
    #[must_use]
    pub fn with_json(self, status: StatusCode, value: &serde_json::Value) -> Self {
        self.with_response(MockResponse::json(status, value))
    }

    /// Queue a connection failure.
    #[must_use]
    pub fn with_transport_error(self, message: &str) -> Self {
        self.push(MockReply::TransportError(message.to_owned()));
        self
    }

    /// Reply used once the queue is exhausted.
    #[must_use]
    pub fn with_fallback(mut self, reply: MockReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// Queue a reply on a shared transport.
    pub fn push(&self, reply: MockReply) {
        self.script.lock().push_back(reply);
    }

    /// Number of physical calls made so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests seen so far, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    fn next_reply(&self) -> Option<MockReply> {
        self.script
            .lock()
            .pop_front()
            .or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, ctx: &Context, request: &mut Request) -> Result<Response, HttpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let body = match request.body_mut().take_for_send()? {
            TransportBody::Empty => Bytes::new(),
            TransportBody::Bytes(bytes) => bytes,
            TransportBody::Stream(stream) => {
                let chunks: Vec<Bytes> = stream.try_collect().await.map_err(HttpError::Transport)?;
                Bytes::from(chunks.concat())
            }
        };
        self.requests.lock().push(RecordedRequest {
            method: request.method().clone(),
            url: request.url().clone(),
            headers: request.headers().clone(),
            body,
            attempt: ctx.attempt(),
        });

        let reply = self
            .next_reply()
            .ok_or_else(|| HttpError::transport("mock transport script exhausted"))?;
        let scripted = reply.into_result()?;
        if let Some(delay) = scripted.delay {
            tokio::time::sleep(delay).await;
        }
        let mut response = if scripted.streaming {
            let body = Full::new(scripted.body)
                .map_err(|never: Infallible| -> BoxError { match never {} })
                .boxed();
            Response::new(scripted.status, scripted.headers, body)
        } else {
            Response::from_bytes(scripted.status, scripted.headers, scripted.body)
        };
        if let Some(limit) = scripted.max_body_size {
            response = response.with_max_body_size(limit);
        }
        Ok(response.with_request_info(request.info()))
    }
}
