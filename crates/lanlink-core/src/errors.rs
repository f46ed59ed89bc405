//! Error types for the LanLink protocol
//!
//! This module contains all error types used throughout the core and runtime crates:
//! transport errors, media device errors, call state transition errors, and the main
//! LanError type that unifies them all.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Specific transport error types
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection to {target} timed out after {duration_ms}ms")]
    ConnectionTimeout { target: String, duration_ms: u64 },
    #[error("Connection failed to {target}: {reason}")]
    ConnectionFailed { target: String, reason: String },
    #[error("Handshake with {target} failed: {reason}")]
    HandshakeFailure { target: String, reason: String },
    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },
    #[error("Connection to {target} closed unexpectedly")]
    ConnectionClosed { target: String },
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// Reasons local audio capture could not be acquired
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("Microphone permission denied")]
    PermissionDenied,
    #[error("No microphone detected")]
    NotFound,
    #[error("Microphone is busy or unavailable")]
    DeviceBusy,
    #[error("Failed to access microphone: {0}")]
    Other(String),
}

/// Invalid call state transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid call transition from {from} on {trigger}")]
pub struct StateTransitionError {
    pub from: String,
    pub trigger: String,
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error type for the LanLink subsystem
#[derive(Debug, thiserror::Error)]
pub enum LanError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Peer not found: {peer_id}")]
    PeerNotFound { peer_id: String },

    #[error("Invalid payload: {reason}")]
    InvalidPayload { reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(#[from] DeviceError),

    #[error("Busy: a call with {peer_id} is already active")]
    Busy { peer_id: String },

    #[error("LAN subsystem stopped")]
    Stopped,

    #[error("LAN subsystem not started")]
    NotStarted,

    #[error("Not a regular file: {path}")]
    NotAFile { path: String },

    #[error("Signaling error: {reason}")]
    Signaling { reason: String },

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl LanError {
    /// Create an invalid payload error with a reason
    pub fn invalid_payload<T: Into<String>>(reason: T) -> Self {
        LanError::InvalidPayload {
            reason: reason.into(),
        }
    }

    /// Create an invalid input error with a reason
    pub fn invalid_input<T: Into<String>>(reason: T) -> Self {
        LanError::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Create a peer not found error
    pub fn peer_not_found<P: Into<String>>(peer_id: P) -> Self {
        LanError::PeerNotFound {
            peer_id: peer_id.into(),
        }
    }

    /// Create a signaling error with a reason
    pub fn signaling<T: Into<String>>(reason: T) -> Self {
        LanError::Signaling {
            reason: reason.into(),
        }
    }

    /// Create a connection timeout error
    pub fn connection_timeout<T: Into<String>>(target: T, duration_ms: u64) -> Self {
        LanError::Transport(TransportError::ConnectionTimeout {
            target: target.into(),
            duration_ms,
        })
    }

    /// Create a connection failed error
    pub fn connection_failed<T: Into<String>, R: Into<String>>(target: T, reason: R) -> Self {
        LanError::Transport(TransportError::ConnectionFailed {
            target: target.into(),
            reason: reason.into(),
        })
    }

    /// Create a handshake failure error
    pub fn handshake_failed<T: Into<String>, R: Into<String>>(target: T, reason: R) -> Self {
        LanError::Transport(TransportError::HandshakeFailure {
            target: target.into(),
            reason: reason.into(),
        })
    }

    /// Create an operation timeout error
    pub fn timeout<T: Into<String>>(operation: T, duration_ms: u64) -> Self {
        LanError::Transport(TransportError::Timeout {
            operation: operation.into(),
            duration_ms,
        })
    }

    /// Whether this error is a connect or response timeout
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            LanError::Transport(TransportError::Timeout { .. })
                | LanError::Transport(TransportError::ConnectionTimeout { .. })
        )
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, LanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        assert!(LanError::timeout("ping", 5000).is_timeout());
        assert!(LanError::connection_timeout("10.0.0.2:4000", 5000).is_timeout());
        assert!(!LanError::Stopped.is_timeout());
        assert!(!LanError::handshake_failed("10.0.0.2:4000", "app mismatch").is_timeout());
    }

    #[test]
    fn test_device_error_wraps() {
        let err: LanError = DeviceError::PermissionDenied.into();
        assert!(matches!(
            err,
            LanError::DeviceUnavailable(DeviceError::PermissionDenied)
        ));
        assert_eq!(
            err.to_string(),
            "Audio device unavailable: Microphone permission denied"
        );
    }
}
