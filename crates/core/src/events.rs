//! Events emitted by the peer connection manager
//!
//! These flow from the manager actor to the embedding application (UI state,
//! join/leave sounds, recording) without the application touching link state.

use crate::media::MediaStream;
use crate::peer::LinkState;
use crate::roster::ParticipantRef;

/// Notification from a running [`PeerConnectionManager`](crate::peer::PeerConnectionManager)
#[derive(Debug, Clone)]
pub enum MeshEvent {
    /// A participant appeared in the roster after the local join
    ParticipantJoined {
        participant: ParticipantRef,
    },

    /// A participant left the roster
    ParticipantLeft {
        participant_id: String,
    },

    /// A PeerLink changed state
    PeerStateChanged {
        participant_id: String,
        state: LinkState,
    },

    /// A remote participant's stream gained a track
    RemoteStream {
        participant_id: String,
        user_id: String,
        stream: MediaStream,
    },

    /// A PeerLink never reached Connected and was torn down. Not retried.
    PeerUnreachable {
        participant_id: String,
        timeout_ms: u64,
    },

    /// A PeerLink failed (description or candidate rejected, transport failure)
    PeerFailed {
        participant_id: String,
        reason: String,
    },

    /// Outgoing video switched to screen capture
    ScreenShareStarted,

    /// Screen capture ended and the camera track was restored
    ScreenShareEnded,

    /// Screen capture could not be acquired
    ScreenShareFailed {
        reason: String,
    },
}

impl MeshEvent {
    pub fn participant_joined(participant: ParticipantRef) -> Self {
        Self::ParticipantJoined { participant }
    }

    pub fn participant_left(participant_id: impl Into<String>) -> Self {
        Self::ParticipantLeft {
            participant_id: participant_id.into(),
        }
    }

    pub fn peer_state_changed(participant_id: impl Into<String>, state: LinkState) -> Self {
        Self::PeerStateChanged {
            participant_id: participant_id.into(),
            state,
        }
    }

    pub fn peer_unreachable(participant_id: impl Into<String>, timeout_ms: u64) -> Self {
        Self::PeerUnreachable {
            participant_id: participant_id.into(),
            timeout_ms,
        }
    }

    pub fn peer_failed(participant_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PeerFailed {
            participant_id: participant_id.into(),
            reason: reason.into(),
        }
    }

    /// Event name for logging/debugging
    pub fn name(&self) -> &'static str {
        match self {
            Self::ParticipantJoined { .. } => "participant_joined",
            Self::ParticipantLeft { .. } => "participant_left",
            Self::PeerStateChanged { .. } => "peer_state_changed",
            Self::RemoteStream { .. } => "remote_stream",
            Self::PeerUnreachable { .. } => "peer_unreachable",
            Self::PeerFailed { .. } => "peer_failed",
            Self::ScreenShareStarted => "screen_share_started",
            Self::ScreenShareEnded => "screen_share_ended",
            Self::ScreenShareFailed { .. } => "screen_share_failed",
        }
    }

    /// Remote participant this event concerns, if any
    pub fn participant_id(&self) -> Option<&str> {
        match self {
            Self::ParticipantJoined { participant } => Some(&participant.participant_id),
            Self::ParticipantLeft { participant_id }
            | Self::PeerStateChanged { participant_id, .. }
            | Self::RemoteStream { participant_id, .. }
            | Self::PeerUnreachable { participant_id, .. }
            | Self::PeerFailed { participant_id, .. } => Some(participant_id),
            Self::ScreenShareStarted | Self::ScreenShareEnded | Self::ScreenShareFailed { .. } => {
                None
            }
        }
    }
}
