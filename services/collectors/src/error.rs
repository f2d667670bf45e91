//! Error types for the collector service

use pv_types::Venue;
use thiserror::Error;

/// Result type alias for collector operations.
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Main error type for collector operations.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Connection could not be established
    #[error("connection failed for venue {venue}: {reason}")]
    ConnectionFailed {
        /// The venue that failed to connect
        venue: Venue,
        /// Reason for the failure
        reason: String,
    },

    /// Connect or handshake exceeded its deadline
    #[error("connection timeout for venue {venue} after {timeout_ms}ms")]
    ConnectionTimeout {
        /// The venue that timed out
        venue: Venue,
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// The server closed the connection
    #[error("connection closed for venue {venue}: {reason:?}")]
    ConnectionClosed {
        /// The venue whose connection was closed
        venue: Venue,
        /// Optional close reason
        reason: Option<String>,
    },

    /// A frame could not be interpreted
    #[error("parse error for venue {venue}: {message} - {error}")]
    ParseError {
        /// The venue that produced the frame
        venue: Venue,
        /// What was being parsed
        message: String,
        /// Underlying error message
        error: String,
    },

    /// A handshake step (bullet token, welcome, subscribe ack) failed
    #[error("handshake failed for venue {venue}: {reason}")]
    HandshakeFailed {
        /// The venue being connected
        venue: Venue,
        /// Which step failed
        reason: String,
    },

    /// Reconnect circuit breaker is in cooldown
    #[error("reconnect circuit breaker open for venue {venue}")]
    CircuitBreakerOpen {
        /// The venue whose breaker is open
        venue: Venue,
    },

    /// Reconnect budget exhausted; collector stays down
    #[error("maximum reconnection attempts ({max_attempts}) exceeded for venue {venue}")]
    MaxReconnectAttemptsExceeded {
        /// The venue that failed to reconnect
        venue: Venue,
        /// Attempts that were tried
        max_attempts: u32,
    },

    /// Venue log append failed
    #[error("venue log append failed: {0}")]
    LogAppend(#[from] pv_types::CoreError),

    /// WebSocket transport error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP error during a handshake request
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error in a control message
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error in collector settings
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CollectorError {
    /// Whether the connection loop should try again after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CollectorError::ConnectionFailed { .. }
                | CollectorError::ConnectionTimeout { .. }
                | CollectorError::ConnectionClosed { .. }
                | CollectorError::HandshakeFailed { .. }
                | CollectorError::WebSocket(_)
                | CollectorError::Http(_)
                | CollectorError::LogAppend(_)
        )
    }
}
