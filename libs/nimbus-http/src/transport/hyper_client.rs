use super::Transport;
use crate::context::Context;
use crate::error::{BoxError, HttpError, InvalidUriKind};
use crate::request::{Request, TransportBody};
use crate::response::{Response, ResponseBody};
use crate::security::DEFAULT_MAX_BODY_SIZE;
use crate::tls::{self, TlsRoots};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body::Frame;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::convert::Infallible;
use std::fmt;
use std::time::Duration;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneSyncService;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;

type OutboundBody = UnsyncBoxBody<Bytes, BoxError>;

type InnerService =
    BoxCloneSyncService<http::Request<OutboundBody>, http::Response<ResponseBody>, HttpError>;

/// Builder for [`HttpTransport`].
#[derive(Debug, Clone)]
#[must_use]
pub struct HttpTransportBuilder {
    attempt_timeout: Duration,
    max_body_size: usize,
    allow_insecure_http: bool,
    tls_roots: TlsRoots,
    pool_idle_timeout: Option<Duration>,
    pool_max_idle_per_host: usize,
}

impl Default for HttpTransportBuilder {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(30),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            allow_insecure_http: false,
            tls_roots: TlsRoots::default(),
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl HttpTransportBuilder {
    /// Timeout for a single physical exchange (default 30s).
    ///
    /// The operation deadline in [`Context`] bounds all attempts together.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Limit applied when response bodies are read into memory.
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Allow plain `http://` URLs. For local mock servers only.
    pub fn allow_insecure_http(mut self) -> Self {
        self.allow_insecure_http = true;
        self
    }

    pub fn tls_roots(mut self, roots: TlsRoots) -> Self {
        self.tls_roots = roots;
        self
    }

    /// Idle pooled connections are closed after this long; `None` keeps them.
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    /// Build the transport.
    ///
    /// Request flow (outer to inner): Timeout → Decompression → hyper client.
    ///
    /// # Errors
    /// Returns `HttpError::Tls` if root certificates cannot be loaded.
    pub fn build(self) -> Result<HttpTransport, HttpError> {
        if self.allow_insecure_http {
            tracing::warn!("insecure HTTP enabled; use only for testing with mock servers");
        }

        let https = tls::https_connector(self.tls_roots, self.allow_insecure_http)?;

        let mut client_builder = Client::builder(TokioExecutor::new());
        // pool_timer is required for pool_idle_timeout to take effect
        client_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .http2_only(false);
        if let Some(idle) = self.pool_idle_timeout {
            client_builder.pool_idle_timeout(idle);
        }
        let hyper_client = client_builder.build::<_, OutboundBody>(https);

        let timeout = self.attempt_timeout;
        let service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(timeout))
            .layer(DecompressionLayer::new())
            .service(hyper_client)
            .map_response(box_response_body)
            .map_err(move |e: tower::BoxError| map_tower_error(e, timeout));

        Ok(HttpTransport {
            service: BoxCloneSyncService::new(service),
            max_body_size: self.max_body_size,
            attempt_timeout: timeout,
        })
    }
}

/// Transport backed by a pooled hyper client over rustls.
///
/// Response bodies are decompressed transparently (gzip, br, deflate) and
/// streamed; the size limit applies to decompressed bytes when read.
#[derive(Clone)]
pub struct HttpTransport {
    service: InnerService,
    max_body_size: usize,
    attempt_timeout: Duration,
}

impl HttpTransport {
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::default()
    }

    /// HTTPS-only transport with default settings.
    ///
    /// # Errors
    /// Returns `HttpError::Tls` if root certificates cannot be loaded.
    pub fn new() -> Result<Self, HttpError> {
        Self::builder().build()
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("max_body_size", &self.max_body_size)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, _ctx: &Context, request: &mut Request) -> Result<Response, HttpError> {
        let outbound = to_http_request(request)?;
        let response = dispatch(self.service.clone(), outbound).await?;
        let (parts, body) = response.into_parts();
        Ok(Response::new(parts.status, parts.headers, body)
            .with_max_body_size(self.max_body_size)
            .with_request_info(request.info()))
    }
}

fn to_http_request(request: &mut Request) -> Result<http::Request<OutboundBody>, HttpError> {
    let uri = http::Uri::try_from(request.url().as_str()).map_err(|e| HttpError::InvalidUri {
        url: request.url().to_string(),
        kind: InvalidUriKind::ParseError,
        reason: e.to_string(),
    })?;

    let body: OutboundBody = match request.body_mut().take_for_send()? {
        TransportBody::Empty => Empty::<Bytes>::new().map_err(never_error).boxed_unsync(),
        TransportBody::Bytes(bytes) => Full::new(bytes).map_err(never_error).boxed_unsync(),
        TransportBody::Stream(stream) => {
            StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync()
        }
    };

    let mut outbound = http::Request::new(body);
    *outbound.method_mut() = request.method().clone();
    *outbound.uri_mut() = uri;
    *outbound.headers_mut() = request.headers().clone();
    Ok(outbound)
}

/// Box the oneshot future outside the `async_trait` body so its `Send` bound is
/// checked against concrete types (avoids a higher-ranked lifetime inference error).
fn dispatch(
    service: InnerService,
    request: http::Request<OutboundBody>,
) -> std::pin::Pin<
    Box<dyn std::future::Future<Output = Result<http::Response<ResponseBody>, HttpError>> + Send>,
> {
    Box::pin(service.oneshot(request))
}

fn never_error(never: Infallible) -> BoxError {
    match never {}
}

fn box_response_body<B>(response: http::Response<B>) -> http::Response<ResponseBody>
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    let (parts, body) = response.into_parts();
    http::Response::from_parts(parts, body.map_err(Into::into).boxed())
}

/// Preserve typed errors boxed by tower middleware before falling back to `Transport`.
fn map_tower_error(err: tower::BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) => match other.downcast::<hyper_util::client::legacy::Error>() {
            Ok(client_err) => HttpError::from(*client_err),
            Err(other) => HttpError::Transport(other),
        },
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use httpmock::prelude::*;
    use serde_json::json;

    fn test_transport() -> HttpTransport {
        HttpTransport::builder()
            .allow_insecure_http()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_streams_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/items");
            then.status(200).json_body(json!({"items": [1, 2]}));
        });

        let transport = test_transport();
        let mut request = Request::get(&server.url("/items")).unwrap();
        let response = transport.send(&Context::new(), &mut request).await.unwrap();

        mock.assert();
        assert_eq!(response.status(), http::StatusCode::OK);
        assert!(!response.is_buffered());
        assert_eq!(response.request_info().unwrap().url.path(), "/items");
        let value: serde_json::Value = response.json().await.unwrap();
        assert_eq!(value["items"], json!([1, 2]));
    }

    #[tokio::test]
    async fn test_post_form_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/submit")
                .header("content-type", "application/x-www-form-urlencoded")
                .body("key1=value1&key2=value2");
            then.status(204);
        });

        let transport = test_transport();
        let mut request = Request::post(&server.url("/submit"))
            .unwrap()
            .with_form(&[("key1", "value1"), ("key2", "value2")])
            .unwrap();
        let response = transport.send(&Context::new(), &mut request).await.unwrap();

        mock.assert();
        assert_eq!(response.status(), http::StatusCode::NO_CONTENT);
        assert!(request.body().has_been_read());
    }

    #[tokio::test]
    async fn test_stream_body_sent_once() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PUT).path("/blob").body("hello world");
            then.status(201);
        });

        let chunks = futures_util::stream::iter(vec![
            Ok::<_, BoxError>(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]);
        let transport = test_transport();
        let mut request = Request::parse(http::Method::PUT, &server.url("/blob"))
            .unwrap()
            .with_stream(chunks);

        let response = transport.send(&Context::new(), &mut request).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::CREATED);
        mock.assert();

        let err = transport
            .send(&Context::new(), &mut request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConsumerContractViolation);
    }

    #[tokio::test]
    async fn test_error_status_is_ok_response() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/missing");
            then.status(404).body("not here");
        });

        let transport = test_transport();
        let mut request = Request::get(&server.url("/missing")).unwrap();
        let response = transport.send(&Context::new(), &mut request).await.unwrap();
        let err = response.checked_bytes().await.unwrap_err();

        assert_eq!(err.status(), Some(http::StatusCode::NOT_FOUND));
        assert!(err.to_string().contains("not here"));
    }

    #[tokio::test]
    async fn test_body_size_limit() {
        let server = MockServer::start();
        let large_body = "x".repeat(64 * 1024);
        let _m = server.mock(|when, then| {
            when.method(GET).path("/large");
            then.status(200).body(&large_body);
        });

        let transport = HttpTransport::builder()
            .allow_insecure_http()
            .max_body_size(1024)
            .build()
            .unwrap();
        let mut request = Request::get(&server.url("/large")).unwrap();
        let result = transport
            .send(&Context::new(), &mut request)
            .await
            .unwrap()
            .bytes()
            .await;

        assert!(matches!(result, Err(HttpError::BodyTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/slow");
            then.status(200).delay(Duration::from_millis(500));
        });

        let transport = HttpTransport::builder()
            .allow_insecure_http()
            .attempt_timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let mut request = Request::get(&server.url("/slow")).unwrap();
        let err = transport
            .send(&Context::new(), &mut request)
            .await
            .unwrap_err();

        assert!(matches!(err, HttpError::Timeout(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_https_only_rejects_http() {
        let transport = HttpTransport::new().unwrap();
        let mut request = Request::get("http://127.0.0.1:1/").unwrap();
        let err = transport
            .send(&Context::new(), &mut request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFault);
    }
}
