//! W3C trace-context propagation for outgoing requests.
//!
//! With the `otel` feature the current span's context is injected through the
//! global OpenTelemetry propagator; without it injection is a no-op.

use http::HeaderMap;

/// W3C Trace Context header name
pub const TRACEPARENT: &str = "traceparent";

#[cfg(feature = "otel")]
mod imp {
    use http::{HeaderMap, HeaderName, HeaderValue};
    use opentelemetry::global;
    use opentelemetry::propagation::Injector;
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    struct HeadersInjector<'a>(&'a mut HeaderMap);

    impl Injector for HeadersInjector<'_> {
        fn set(&mut self, key: &str, value: String) {
            if let (Ok(name), Ok(val)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                self.0.insert(name, val);
            }
        }
    }

    pub fn inject_current_span(headers: &mut HeaderMap) {
        let cx = tracing::Span::current().context();
        global::get_text_map_propagator(|propagator| {
            propagator.inject_context(&cx, &mut HeadersInjector(headers));
        });
    }
}

#[cfg(not(feature = "otel"))]
mod imp {
    use http::HeaderMap;

    pub fn inject_current_span(_headers: &mut HeaderMap) {}
}

/// Inject the current span's trace context into `headers`.
pub fn inject_current_span(headers: &mut HeaderMap) {
    imp::inject_current_span(headers);
}

/// Trace id from a `traceparent` header (`00-{trace_id}-{span_id}-{flags}`).
#[must_use]
pub fn trace_id(headers: &HeaderMap) -> Option<&str> {
    let traceparent = headers.get(TRACEPARENT)?.to_str().ok()?;
    let mut parts = traceparent.split('-');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("00"), Some(trace_id), Some(_), Some(_)) => Some(trace_id),
        _ => None,
    }
}
