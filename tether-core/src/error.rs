//! Global error types for the Tether client layer.
//!
//! Every failure the HTTP client, refresh coordinator and socket manager can
//! surface is folded into a single `TetherError` enum so callers match on one
//! taxonomy regardless of which channel produced it.

use std::time::Duration;

use thiserror::Error;

/// Convenience type alias for Results using TetherError.
pub type TetherResult<T> = Result<T, TetherError>;

/// Unified error type covering all error categories in Tether.
#[derive(Error, Debug)]
pub enum TetherError {
    // -- Transport taxonomy --
    /// An operation exceeded its deadline.
    #[error("{operation} timed out after {}ms", elapsed.as_millis())]
    Timeout {
        /// What timed out ("GET /users", "refresh", "socket request #4").
        operation: String,
        /// How long the operation ran before it was abandoned.
        elapsed: Duration,
    },

    /// Transport-level failure: no response was received.
    #[error("network error: {0}")]
    Network(String),

    /// A response was received with a failing status.
    #[error("http error (status {status}): {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body as text.
        body: String,
    },

    /// Token refresh failed or no refresh token was available.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A socket frame could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    // -- Socket --
    /// A correlated send was attempted while the socket is not open.
    #[error("socket is not connected")]
    NotConnected,

    /// The socket dropped while a correlated request was waiting.
    #[error("socket disconnected")]
    SocketDisconnected,

    /// The server answered a correlated request with an error.
    #[error("server rejected request: {0}")]
    Remote(String),

    // -- Configuration --
    /// Failed to load or parse configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Storage / IO --
    /// Key-value store read or write failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TetherError {
    /// Build a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a caller-side retry policy may retry this error.
    ///
    /// Network failures and timeouts are always retryable; HTTP errors only
    /// when their status appears in `retryable_statuses`.
    pub fn is_retryable(&self, retryable_statuses: &[u16]) -> bool {
        match self {
            Self::Network(_) | Self::Timeout { .. } => true,
            Self::Http { status, .. } => retryable_statuses.contains(status),
            _ => false,
        }
    }

    /// Whether this error means the session can no longer be authenticated.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<serde_json::Error> for TetherError {
    fn from(e: serde_json::Error) -> Self {
        TetherError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for TetherError {
    fn from(e: toml::de::Error) -> Self {
        TetherError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_includes_elapsed() {
        let err = TetherError::timeout("GET /users", Duration::from_millis(1500));
        assert_eq!(err.to_string(), "GET /users timed out after 1500ms");
    }

    #[test]
    fn test_retryable_classification() {
        let statuses = [502, 503];
        assert!(TetherError::Network("reset".into()).is_retryable(&statuses));
        assert!(TetherError::timeout("x", Duration::ZERO).is_retryable(&statuses));
        assert!(TetherError::Http { status: 503, body: String::new() }.is_retryable(&statuses));
        assert!(!TetherError::Http { status: 400, body: String::new() }.is_retryable(&statuses));
        assert!(!TetherError::Auth("expired".into()).is_retryable(&statuses));
    }

    #[test]
    fn test_status_accessor() {
        let err = TetherError::Http { status: 404, body: "missing".into() };
        assert_eq!(err.status(), Some(404));
        assert_eq!(TetherError::NotConnected.status(), None);
    }

    #[test]
    fn test_config_error_display() {
        let err = TetherError::Config("bad value".to_string());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }
}
