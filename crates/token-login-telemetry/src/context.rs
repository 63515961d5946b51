//! Per-request context for correlating diagnostics.

use chrono::{DateTime, Utc};

/// Context carried through the handling of one inbound protocol request.
///
/// Only the method name and request id are recorded; payloads never enter
/// diagnostics.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Protocol method being handled.
    pub method: String,
    /// Request id assigned by the sender.
    pub request_id: String,
    /// When handling started.
    pub started_at: DateTime<Utc>,
}

impl RequestContext {
    /// Create a new request context.
    #[must_use]
    pub fn new(method: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            request_id: request_id.into(),
            started_at: Utc::now(),
        }
    }

    /// Elapsed time in milliseconds since handling started.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        // Utc::now() >= self.started_at by construction
        #[allow(clippy::arithmetic_side_effects)]
        let elapsed = Utc::now() - self.started_at;
        elapsed.num_milliseconds()
    }

    /// Create a tracing span for this request.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::debug_span!(
            "request",
            method = %self.method,
            request_id = %self.request_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_fields() {
        let ctx = RequestContext::new("Initialize", "abc");
        assert_eq!(ctx.method, "Initialize");
        assert_eq!(ctx.request_id, "abc");
        assert!(ctx.elapsed_ms() >= 0);
    }
}
