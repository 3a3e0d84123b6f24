#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP request pipeline for service clients.
//!
//! A client issues every operation through a [`Pipeline`]: an immutable chain
//! of [`Policy`] stages that ends in a [`Transport`]. The standard chain,
//! assembled by [`PipelineBuilder`], is
//!
//! ```text
//! per-call… → UserAgent → RequestId → Tracing → Authentication? → Logging → Retry → per-retry… → Transport
//! ```
//!
//! The default transport is hyper over rustls with:
//! - HTTPS only unless explicitly allowed
//! - Connection pooling
//! - Per-attempt timeouts
//! - Transparent response decompression (gzip, brotli, deflate)
//! - Response body size limits applied to decompressed bytes
//!
//! Every HTTP status is returned as `Ok`; callers decide what is an error
//! with [`Response::error_for_status`].
//!
//! # Example
//!
//! ```ignore
//! use nimbus_http::{ClientOptions, Context, Pipeline, Request};
//! use std::time::Duration;
//!
//! let pipeline = Pipeline::builder(ClientOptions::default()).build()?;
//!
//! let mut ctx = Context::new().with_timeout(Duration::from_secs(10));
//! let mut request = Request::get("https://api.example.com/items")?;
//! let items: serde_json::Value = pipeline
//!     .send(&mut ctx, &mut request)
//!     .await?
//!     .error_for_status()?
//!     .json()
//!     .await?;
//! ```
//!
//! # OpenTelemetry
//!
//! With the `otel` feature the tracing policy injects W3C `traceparent`
//! headers from the current span.

mod config;
mod context;
mod error;
mod pipeline;
mod policy;
mod request;
mod response;

pub mod otel;
pub mod policies;
pub mod security;
pub mod tls;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use config::{
    ClientOptions, DEFAULT_RETRY_STATUS_CODES, DEFAULT_USER_AGENT, ExponentialBackoff, LogLevel,
    RetryConfig, RetryTrigger,
};
pub use context::Context;
pub use error::{BoxError, ErrorKind, HttpError, InvalidUriKind};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use policy::{Next, Policy};
pub use request::{ByteStream, Request, RequestBody, RequestInfo, TransportBody, parse_url};
pub use response::{
    RETRY_AFTER_MS, Response, ResponseBody, X_MS_RETRY_AFTER_MS, parse_retry_after,
    read_body_limited,
};
pub use tls::TlsRoots;
pub use transport::{HttpTransport, HttpTransportBuilder, Transport};

/// Re-exported so policy implementors need not depend on `async-trait` directly.
pub use async_trait::async_trait;
