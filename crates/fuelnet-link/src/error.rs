//! # Link Error Types
//!
//! Error types for the socket protocol.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Link Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  MalformedFrame         │ │
//! │  │  ConfigLoad     │  │  Disconnected   │  │  UnexpectedRecord       │ │
//! │  │  ConfigSave     │  │  WriteFailed    │  │  SerializationFailed    │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Admission     │  │     Store       │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Unregistered   │  │  StoreFailed    │  │  ChannelError           │ │
//! │  │  RegTimeout     │  │                 │  │  ShuttingDown           │ │
//! │  │  HbTimeout      │  │                 │  │  Domain (core rules)    │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No variant is fatal to a node: every peer fault is absorbed by the task
//! that owns that peer.

use fuelnet_core::{CoreError, PumpId};
use thiserror::Error;

/// Result type alias for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Link error type covering every protocol failure.
#[derive(Debug, Error)]
pub enum LinkError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid node configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Failed to open a reliable-channel session.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer closed the reliable channel.
    #[error("Peer disconnected")]
    Disconnected,

    /// Timed out waiting on the peer.
    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    /// A write to a peer failed. Never retried at this layer.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Socket-level I/O error (bind, datagram send, ...).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// A record could not be decoded. Dropped and logged, never fatal.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// A well-formed record arrived where another kind was required.
    #[error("Unexpected record: expected {expected}, got {actual}")]
    UnexpectedRecord { expected: String, actual: String },

    /// Failed to serialize a record.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// The peer answered with an error record.
    #[error("Rejected by peer ({code}): {message}")]
    Rejected { code: String, message: String },

    // =========================================================================
    // Admission / Liveness Errors
    // =========================================================================
    /// Registration for an identifier the record store does not know.
    #[error("Pump {0} is not registered")]
    UnregisteredPump(PumpId),

    /// Station registration for an identifier the enterprise does not know.
    #[error("Station {0} is not registered")]
    UnregisteredStation(String),

    /// No registration record within the admission window.
    #[error("No registration within {0} seconds")]
    RegistrationTimeout(u64),

    /// No reliable-channel activity within the liveness window.
    #[error("No activity within {0} seconds")]
    HeartbeatTimeout(u64),

    /// Command target is not in the registry. Commands are never queued.
    #[error("Pump {0} is not connected")]
    NotConnected(PumpId),

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// The record store refused or failed an operation.
    #[error("Record store error: {0}")]
    StoreFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// A domain rule was violated (local pump controls).
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// The node is shutting down.
    #[error("Node is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            LinkError::SerializationFailed(err.to_string())
        } else {
            LinkError::MalformedFrame(err.to_string())
        }
    }
}

impl From<toml::de::Error> for LinkError {
    fn from(err: toml::de::Error) -> Self {
        LinkError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for LinkError {
    fn from(err: toml::ser::Error) -> Self {
        LinkError::ConfigSaveFailed(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for LinkError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        LinkError::ChannelError(err.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for LinkError {
    fn from(err: tokio::sync::oneshot::error::RecvError) -> Self {
        LinkError::ChannelError(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl LinkError {
    /// Returns true if a client should simply reconnect and try again.
    ///
    /// ## Retryable Errors
    /// - Connection failures (refused, unreachable)
    /// - Timeouts
    /// - Disconnections and failed writes
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Admission rejections
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LinkError::ConnectionFailed(_)
                | LinkError::Disconnected
                | LinkError::Timeout(_)
                | LinkError::WriteFailed(_)
                | LinkError::Io(_)
        )
    }

    /// Returns true if the peer sent something we could not accept.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            LinkError::MalformedFrame(_)
                | LinkError::UnexpectedRecord { .. }
                | LinkError::SerializationFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(LinkError::ConnectionFailed("refused".into()).is_retryable());
        assert!(LinkError::Disconnected.is_retryable());
        assert!(LinkError::Timeout(10).is_retryable());

        assert!(!LinkError::InvalidConfig("bad".into()).is_retryable());
        assert!(!LinkError::UnregisteredPump(PumpId::new(9)).is_retryable());
        assert!(!LinkError::NotConnected(PumpId::new(9)).is_retryable());
    }

    #[test]
    fn test_heartbeat_timeout_message() {
        let err = LinkError::HeartbeatTimeout(90);
        assert_eq!(err.to_string(), "No activity within 90 seconds");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_json_errors_are_malformed_frames() {
        let err: LinkError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, LinkError::MalformedFrame(_)));
        assert!(err.is_protocol_error());
    }

    #[test]
    fn test_error_display() {
        let err = LinkError::Rejected {
            code: "NOT_REGISTERED".into(),
            message: "unknown pump".into(),
        };
        assert!(err.to_string().contains("NOT_REGISTERED"));
        assert_eq!(
            LinkError::UnregisteredPump(PumpId::new(4)).to_string(),
            "Pump 4 is not registered"
        );
    }
}
