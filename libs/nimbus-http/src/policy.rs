use crate::context::Context;
use crate::error::HttpError;
use crate::request::Request;
use crate::response::Response;
use crate::transport::Transport;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// One stage of the request pipeline.
///
/// A policy may edit the request, then either delegate to the rest of the
/// chain through `next` or short-circuit with its own response or error. The
/// response it returns may be inspected or rewritten on the way out.
///
/// Policies are shared by every operation issued through a pipeline and must
/// not keep references to a request or response past a single `send`.
#[async_trait]
pub trait Policy: Send + Sync + fmt::Debug {
    async fn send(
        &self,
        ctx: &mut Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> Result<Response, HttpError>;
}

/// Capability to invoke the remainder of the chain.
///
/// `Next` is `Copy`, so nothing stops a policy from running the rest of the
/// chain more than once. Most policies call [`run`](Self::run) exactly once.
/// Re-invoking is reserved for policies that replay the request: the retry
/// policy on a retryable outcome, and bearer authentication resending once
/// after a `401`. Both check [`Request::is_replayable`] first, since each
/// run may send the body again.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    policies: &'a [Arc<dyn Policy>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    pub(crate) fn new(policies: &'a [Arc<dyn Policy>], transport: &'a dyn Transport) -> Self {
        Self {
            policies,
            transport,
        }
    }

    /// Run the next policy, or the transport when no policies remain.
    ///
    /// # Errors
    /// Returns whatever the downstream stage fails with.
    pub async fn run(self, ctx: &mut Context, request: &mut Request) -> Result<Response, HttpError> {
        match self.policies.split_first() {
            Some((policy, rest)) => {
                policy
                    .send(ctx, request, Next::new(rest, self.transport))
                    .await
            }
            None => self.transport.send(ctx, request).await,
        }
    }

    /// Number of policies left before the transport.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.policies.len()
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("policies", &self.policies)
            .field("transport", &self.transport)
            .finish()
    }
}
