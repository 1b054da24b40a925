//! WebSocket relay frames
//!
//! JSON text frames spoken between relay clients and the relay server.

use super::SignalingMessage;
use crate::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    /// Client subscribes to a session channel
    Join { session: String },
    /// Server acknowledges a join
    Joined { session: String },
    /// Signaling message fanned out to the rest of the session
    Broadcast { message: SignalingMessage },
    /// Client leaves its session channel
    Leave,
    /// Server-side problem with the last frame
    Error { message: String },
}

impl RelayFrame {
    pub fn join(session: impl Into<String>) -> Self {
        Self::Join {
            session: session.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
