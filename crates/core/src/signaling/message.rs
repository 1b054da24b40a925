//! Signaling messages exchanged over the relay
//!
//! Messages are addressed to a user, not to a connection. A participant that
//! owns several PeerLinks routes an inbound message by its embedded
//! `from` participant id.

use crate::transport::{IceCandidate, SessionDescription};
use crate::Result;
use serde::{Deserialize, Serialize};

/// Addressing header plus payload, `{from, fromUserId, to, toParticipantId?, data}` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope<T> {
    /// Sender's participant id (one per session join / browser tab)
    #[serde(rename = "from")]
    pub from_participant_id: String,

    /// Sender's user id
    pub from_user_id: String,

    /// Recipient's user id
    #[serde(rename = "to")]
    pub to_user_id: String,

    /// Recipient's participant id, when the sender knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_participant_id: Option<String>,

    pub data: T,
}

/// The three kinds of negotiation metadata carried by the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum SignalingMessage {
    Offer(SignalEnvelope<SessionDescription>),
    Answer(SignalEnvelope<SessionDescription>),
    IceCandidate(SignalEnvelope<IceCandidate>),
}

impl SignalingMessage {
    /// Relay event name (`offer`, `answer`, `ice-candidate`)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::IceCandidate(_) => "ice-candidate",
        }
    }

    pub fn from_participant_id(&self) -> &str {
        match self {
            Self::Offer(e) | Self::Answer(e) => &e.from_participant_id,
            Self::IceCandidate(e) => &e.from_participant_id,
        }
    }

    pub fn from_user_id(&self) -> &str {
        match self {
            Self::Offer(e) | Self::Answer(e) => &e.from_user_id,
            Self::IceCandidate(e) => &e.from_user_id,
        }
    }

    pub fn to_user_id(&self) -> &str {
        match self {
            Self::Offer(e) | Self::Answer(e) => &e.to_user_id,
            Self::IceCandidate(e) => &e.to_user_id,
        }
    }

    pub fn to_participant_id(&self) -> Option<&str> {
        match self {
            Self::Offer(e) | Self::Answer(e) => e.to_participant_id.as_deref(),
            Self::IceCandidate(e) => e.to_participant_id.as_deref(),
        }
    }

    /// Whether this message is meant for the given local participant.
    ///
    /// The user id must match; the participant id must match when present.
    pub fn is_addressed_to(&self, user_id: &str, participant_id: &str) -> bool {
        self.to_user_id() == user_id
            && self
                .to_participant_id()
                .map_or(true, |target| target == participant_id)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
