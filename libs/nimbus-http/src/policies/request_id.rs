use crate::context::Context;
use crate::error::HttpError;
use crate::policy::{Next, Policy};
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use http::HeaderValue;
use http::header::HeaderName;
use uuid::Uuid;

/// Correlation header sent with every request.
pub const CLIENT_REQUEST_ID: HeaderName = HeaderName::from_static("x-ms-client-request-id");

/// Client request id of the current operation, stored in the [`Context`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Stamps each logical operation with a client request id.
///
/// Runs outside the retry policy, so every attempt of one operation carries
/// the same id. A caller-supplied id is kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdPolicy;

#[async_trait]
impl Policy for RequestIdPolicy {
    async fn send(
        &self,
        ctx: &mut Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> Result<Response, HttpError> {
        let existing = request
            .headers()
            .get(&CLIENT_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let id = match existing {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                request
                    .headers_mut()
                    .insert(CLIENT_REQUEST_ID, HeaderValue::try_from(id.as_str())?);
                id
            }
        };
        ctx.insert(RequestId(id));
        next.run(ctx, request).await
    }
}
