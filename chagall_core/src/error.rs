use thiserror::Error;

/// Error type for gateway operations.
///
/// `Clone` is required so a failed batch group can deliver the same error to
/// every fragment it contains; source errors that are not `Clone`
/// (`reqwest`, `serde_json`) are captured as their display strings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The wrapped client does not implement this capability. Absorbed by
    /// the adapter and mapped to a benign default, never shown to callers.
    #[error("operation not supported by the wrapped client")]
    Unsupported,

    /// Error reported by the backend itself, carried verbatim.
    #[error("backend error: {0}")]
    Backend(String),

    /// Transport-level failure from the HTTP client.
    #[error("transport error: {0}")]
    Http(String),

    /// Payload (de)serialization failure.
    #[error("serialization error: {0}")]
    Json(String),

    /// Per-attempt deadline exceeded.
    #[error("operation timed out")]
    Timeout,

    /// The batch queue is at capacity; the fragment was not enqueued.
    #[error("batch queue is full")]
    BatchFull,

    /// The gateway was stopped while work was still queued.
    #[error("gateway is shut down")]
    Shutdown,

    /// A response channel was dropped before settlement.
    #[error("response channel closed")]
    ChannelClosed,
}

impl GatewayError {
    /// Whether a failed attempt with this error should consume a retry and
    /// be attempted again, or surface immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Backend(_) | GatewayError::Http(_) | GatewayError::Timeout
        )
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Json(err.to_string())
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(GatewayError::Backend("boom".into()).is_transient());
        assert!(GatewayError::Http("reset".into()).is_transient());
        assert!(GatewayError::Timeout.is_transient());
        assert!(!GatewayError::BatchFull.is_transient());
        assert!(!GatewayError::Shutdown.is_transient());
        assert!(!GatewayError::Unsupported.is_transient());
    }
}
