//! Error types for the PairChat core
//!
//! Transport-level failures never escape the Connection Manager as fatal
//! errors. They are converted to lifecycle events, one-shot error
//! notifications, or a silent teardown. `ChatError` is the shared vocabulary
//! for all of those paths.

use std::io;

use crate::platform::Capability;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors produced by the PairChat core
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Missing capability: {capability}")]
    CapabilityDenied { capability: Capability },

    #[error("Transfer failed: {0}")]
    TransferFailed(#[source] io::Error),

    #[error("{0}")]
    ConnectionInterrupted(String),

    #[error("Starting discovery failed")]
    DiscoveryStartFailed,

    #[error("Attempted connection with an unbonded peer: {address}")]
    UnbondedPeerConnection { address: String },

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Invalid message text: {0}")]
    InvalidText(#[from] std::str::Utf8Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Radio error: {0}")]
    Radio(String),
}

impl ChatError {
    /// Message used when an outbound connect fails
    pub const CONNECTION_INTERRUPTED: &'static str = "Connection was interrupted";

    /// The outbound-connect failure surfaced to consumers
    pub fn connection_interrupted() -> Self {
        Self::ConnectionInterrupted(Self::CONNECTION_INTERRUPTED.to_string())
    }

    /// Whether this error ends a transport session
    pub fn is_transfer_failure(&self) -> bool {
        matches!(
            self,
            Self::TransferFailed(_) | Self::FrameTooLarge { .. } | Self::InvalidText(_)
        )
    }
}

impl From<io::Error> for ChatError {
    fn from(err: io::Error) -> Self {
        ChatError::TransferFailed(err)
    }
}

/// Result type for PairChat core operations
pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_interrupted_message() {
        let err = ChatError::connection_interrupted();
        assert_eq!(err.to_string(), "Connection was interrupted");
        assert!(!err.is_transfer_failure());
    }

    #[test]
    fn test_io_errors_become_transfer_failures() {
        let err: ChatError = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert!(err.is_transfer_failure());
        assert!(err.to_string().contains("gone"));
    }
}
