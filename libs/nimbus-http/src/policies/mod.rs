//! Built-in pipeline policies
//!
//! ## Available Policies
//!
//! - [`UserAgentPolicy`] - Adds a User-Agent header when absent
//! - [`RequestIdPolicy`] - Stamps a client request id shared by all attempts
//! - [`TracingPolicy`] - Opens an `outgoing_http` client span
//! - [`LoggingPolicy`] - Logs the logical call with redacted headers
//! - [`RetryPolicy`] - Retries with exponential backoff and jitter

mod logging;
mod request_id;
mod retry;
mod trace;
mod user_agent;

pub use logging::LoggingPolicy;
pub use request_id::{CLIENT_REQUEST_ID, RequestId, RequestIdPolicy};
pub use retry::{RetryPolicy, calculate_backoff};
pub use trace::TracingPolicy;
pub use user_agent::UserAgentPolicy;
