//! Peer transport abstraction
//!
//! A [`PeerTransport`] is one lower-level peer connection: it negotiates
//! session descriptions, applies ICE candidates and carries tracks. The media
//! stack itself lives behind this trait; PeerLinks only orchestrate it.
//!
//! Transport-internal concurrency (ICE gathering, connectivity checks,
//! encoding) surfaces as [`TransportEvent`]s pushed into the owning link's
//! event queue, never as direct callbacks into link state.

#[cfg(any(test, feature = "mock-transport"))]
pub mod mock;

use crate::media::MediaTrack;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which half of the offer/answer exchange a description is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description (SDP) with its role in the exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// An ICE candidate in the browser's `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(
        candidate: impl Into<String>,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    ) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid,
            sdp_mline_index,
            username_fragment: None,
        }
    }
}

/// Connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Asynchronous notifications from a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A local ICE candidate was gathered and should be sent to the remote
    IceCandidate(IceCandidate),
    /// The transport's connection state changed
    StateChanged(TransportState),
    /// The remote started sending a track
    TrackReceived(MediaTrack),
}

/// Sender half a transport uses to report [`TransportEvent`]s
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Outcome of swapping an outgoing track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackReplacement {
    /// The sender now transmits the new track; no renegotiation needed
    InPlace,
    /// The transport could not swap in place; a new offer/answer round is required
    NeedsRenegotiation,
}

/// One bidirectional peer connection
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Start sending a local track
    async fn add_track(&self, track: &MediaTrack) -> Result<()>;

    /// Swap the outgoing track of `track.kind()` for `track`
    async fn replace_track(&self, track: &MediaTrack) -> Result<TrackReplacement>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Discard an unanswered local offer (offer collision)
    async fn rollback_local_description(&self) -> Result<()>;

    /// Apply a remote ICE candidate. Requires a remote description.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Release the connection and its media resources
    async fn close(&self) -> Result<()>;
}

/// Creates one [`PeerTransport`] per PeerLink
#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    /// Create a transport for `remote_participant_id`, reporting events on `events`
    async fn create(
        &self,
        remote_participant_id: &str,
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerTransport>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_description_wire_format() {
        let offer = SessionDescription::offer("v=0");
        let json = serde_json::to_value(&offer).unwrap();
        assert_eq!(json, serde_json::json!({"type": "offer", "sdp": "v=0"}));
    }

    #[test]
    fn test_ice_candidate_wire_format() {
        let json = serde_json::json!({
            "candidate": "candidate:1 1 udp 2122260223 10.0.0.1 50000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0
        });
        let candidate: IceCandidate = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert_eq!(serde_json::to_value(&candidate).unwrap(), json);
    }
}
