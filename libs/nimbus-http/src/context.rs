use std::time::Duration;
use tokio::time::Instant;

/// Per-call context carried alongside a [`Request`](crate::Request) through the pipeline.
///
/// Holds a typed extension bag for cross-cutting values (trace span, request
/// id, caller-specific markers), the deadline of the logical operation, and
/// the number of the physical attempt currently in flight.
///
/// A context belongs to exactly one logical operation and is never shared
/// between concurrent operations.
#[derive(Debug, Default, Clone)]
pub struct Context {
    extensions: http::Extensions,
    deadline: Option<(Instant, Duration)>,
    attempt: u32,
}

impl Context {
    /// Create an empty context with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a deadline `timeout` from now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some((Instant::now() + timeout, timeout));
        self
    }

    /// Set an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some((deadline, deadline.saturating_duration_since(Instant::now())));
        self
    }

    /// Insert a typed value, returning the previous value of that type.
    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.extensions.insert(value)
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with_value<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.extensions.insert(value);
        self
    }

    /// Get a typed value.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }

    /// Remove a typed value.
    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions.remove::<T>()
    }

    /// Deadline instant, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.map(|(at, _)| at)
    }

    /// The timeout the deadline was created from.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.deadline.map(|(_, timeout)| timeout)
    }

    /// Time left before the deadline; `None` if there is no deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|(at, _)| at.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has already passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Zero-based number of the physical attempt in flight.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the current attempt is a retry.
    #[must_use]
    pub fn is_retry(&self) -> bool {
        self.attempt > 0
    }

    pub(crate) fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    pub(crate) fn ensure_timeout(&mut self, timeout: Option<Duration>) {
        if self.deadline.is_none()
            && let Some(timeout) = timeout
        {
            self.deadline = Some((Instant::now() + timeout, timeout));
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Marker(&'static str);

    #[test]
    fn test_typed_values() {
        let mut ctx = Context::new().with_value(Marker("a"));
        assert_eq!(ctx.get::<Marker>(), Some(&Marker("a")));
        assert_eq!(ctx.insert(Marker("b")), Some(Marker("a")));
        assert_eq!(ctx.remove::<Marker>(), Some(Marker("b")));
        assert!(ctx.get::<Marker>().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_tracking() {
        let ctx = Context::new().with_timeout(Duration::from_secs(5));
        assert!(!ctx.is_expired());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
        assert_eq!(ctx.timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_ensure_timeout_keeps_caller_deadline() {
        let mut ctx = Context::new().with_timeout(Duration::from_secs(1));
        ctx.ensure_timeout(Some(Duration::from_secs(60)));
        assert_eq!(ctx.timeout(), Some(Duration::from_secs(1)));

        let mut ctx = Context::new();
        ctx.ensure_timeout(Some(Duration::from_secs(60)));
        assert_eq!(ctx.timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_attempt_counter() {
        let mut ctx = Context::new();
        assert!(!ctx.is_retry());
        ctx.set_attempt(2);
        assert!(ctx.is_retry());
        assert_eq!(ctx.attempt(), 2);
    }
}
