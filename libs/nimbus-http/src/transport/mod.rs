//! Terminal stage of the pipeline: one physical network exchange per call.

mod hyper_client;

pub use hyper_client::{HttpTransport, HttpTransportBuilder};

use crate::context::Context;
use crate::error::HttpError;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use std::fmt;

/// Performs a single physical exchange for a request.
///
/// A transport takes the request body with
/// [`RequestBody::take_for_send`](crate::RequestBody::take_for_send) so the
/// retry policy can tell whether a single-use body has been read. Connection
/// and timeout faults are returned as `HttpError::Transport` / `Timeout`;
/// every HTTP status, including 4xx/5xx, is returned as `Ok`.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn send(&self, ctx: &Context, request: &mut Request) -> Result<Response, HttpError>;
}
