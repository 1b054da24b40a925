//! Error types for the MeetMesh signaling core

use thiserror::Error;

use crate::peer::LinkState;

/// Result type alias for MeetMesh core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while coordinating peer connections
#[derive(Debug, Error)]
pub enum Error {
    /// A session description or ICE candidate was rejected by the transport.
    /// Fatal to the affected PeerLink only.
    #[error("Transport setup failed for peer {participant_id}: {reason}")]
    TransportSetupFailed {
        /// Remote participant whose link failed
        participant_id: String,
        /// Failure reason reported by the transport
        reason: String,
    },

    /// A PeerLink did not reach Connected within the connect timeout
    #[error("Peer {participant_id} unreachable after {timeout_ms}ms")]
    PeerUnreachable {
        /// Remote participant that never connected
        participant_id: String,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// Camera, microphone or screen capture could not be acquired
    #[error("Capture device error: {0}")]
    CaptureDevice(String),

    /// Signaling relay error (join or publish failed)
    #[error("Relay error: {0}")]
    Relay(String),

    /// A PeerLink was asked to move between incompatible states
    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state
        from: LinkState,
        /// Requested state
        to: LinkState,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Refused to create a link because the configured peer limit was reached
    #[error("Peer limit of {0} reached")]
    PeerLimitExceeded(u32),

    /// The manager actor is no longer running
    #[error("Peer connection manager is closed")]
    ManagerClosed,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a transport failure on one peer
    pub fn transport(participant_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::TransportSetupFailed {
            participant_id: participant_id.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error only affects a single PeerLink
    pub fn is_peer_scoped(&self) -> bool {
        matches!(
            self,
            Self::TransportSetupFailed { .. }
                | Self::PeerUnreachable { .. }
                | Self::InvalidStateTransition { .. }
        )
    }
}
