//! Error types for Beacon operations.
//!
//! The taxonomy mirrors how failures are handled downstream: only
//! `ServerRejected` is eligible for the persisted retry queues, everything
//! else is surfaced, logged, and dropped.

use thiserror::Error;

/// Result type alias for Beacon operations.
pub type BeaconResult<T> = Result<T, BeaconError>;

/// Main error type for all Beacon operations.
#[derive(Error, Debug)]
pub enum BeaconError {
    /// The request could not be built (bad URL, unencodable body).
    /// Dropped locally, never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Connectivity failure before the server reached a decision.
    /// Surfaced as failure but not queued.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The server answered with a non-2xx status. Queued for retry.
    #[error("server rejected request: status {status}")]
    ServerRejected { status: u16 },

    /// A success-status body failed to decode. Treated as a local,
    /// non-retryable failure.
    #[error("decode failure: {0}")]
    Decode(String),

    /// Persistent store failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl BeaconError {
    /// Build a transport error from any underlying cause.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Build a transport error carrying its source.
    pub fn transport_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether this failure class should be appended to a retry queue.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServerRejected { .. })
    }
}

impl From<serde_json::Error> for BeaconError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_server_rejections_are_retryable() {
        assert!(BeaconError::ServerRejected { status: 500 }.is_retryable());
        assert!(!BeaconError::InvalidRequest("bad url".into()).is_retryable());
        assert!(!BeaconError::transport("offline").is_retryable());
        assert!(!BeaconError::Decode("truncated body".into()).is_retryable());
        assert!(!BeaconError::Storage("disk full".into()).is_retryable());
    }

    #[test]
    fn test_display_includes_status() {
        let err = BeaconError::ServerRejected { status: 503 };
        assert!(err.to_string().contains("503"));
    }
}
