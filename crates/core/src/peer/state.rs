//! PeerLink negotiation states

use std::fmt;

/// Which side of the first offer/answer exchange a link is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkRole {
    /// Sends the first offer (the newcomer)
    Initiator,
    /// Answers the first offer
    Responder,
}

/// Negotiation state of one PeerLink
///
/// Initiator path: `Idle → OfferCreated → RemoteDescriptionSet → Connected`.
/// Responder path: `Idle → OfferReceived → AnswerCreated → Connected`.
/// Any state may move to `Closed`. A connected link re-enters `OfferCreated`
/// or `OfferReceived` while renegotiating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkState {
    #[default]
    Idle,
    OfferCreated,
    OfferReceived,
    AnswerCreated,
    RemoteDescriptionSet,
    Connected,
    Closed,
}

impl LinkState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: LinkState) -> bool {
        use LinkState::*;

        if next == Closed {
            return *self != Closed;
        }

        matches!(
            (self, next),
            (Idle, OfferCreated)
                | (Idle, OfferReceived)
                // Offer collision: the polite side rolls back and answers
                | (OfferCreated, OfferReceived)
                | (OfferCreated, RemoteDescriptionSet)
                | (OfferReceived, AnswerCreated)
                | (AnswerCreated, Connected)
                | (RemoteDescriptionSet, Connected)
                // Renegotiation before or after the transport came up
                | (AnswerCreated, OfferCreated)
                | (AnswerCreated, OfferReceived)
                | (RemoteDescriptionSet, OfferCreated)
                | (RemoteDescriptionSet, OfferReceived)
                | (Connected, OfferCreated)
                | (Connected, OfferReceived)
        )
    }

    /// A local offer is outstanding
    pub fn is_offer_pending(&self) -> bool {
        matches!(self, LinkState::OfferCreated)
    }

    /// Offer/answer finished; the link can start a new negotiation round
    pub fn is_stable(&self) -> bool {
        matches!(
            self,
            LinkState::AnswerCreated | LinkState::RemoteDescriptionSet | LinkState::Connected
        )
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, LinkState::Closed)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Idle => "idle",
            LinkState::OfferCreated => "offer-created",
            LinkState::OfferReceived => "offer-received",
            LinkState::AnswerCreated => "answer-created",
            LinkState::RemoteDescriptionSet => "remote-description-set",
            LinkState::Connected => "connected",
            LinkState::Closed => "closed",
        };
        f.write_str(s)
    }
}
