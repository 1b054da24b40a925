//! PeerLink: one negotiated connection to one remote participant
//!
//! A link owns its transport and drives the offer/answer/candidate exchange
//! for that pair. All methods are called from the link's driver task, one at
//! a time, so no two signaling events for the same link ever interleave.
//!
//! Remote ICE candidates that arrive before the remote description is set
//! are buffered and applied in arrival order once it is.

use super::driver::{LinkInput, LinkReport, LinkReportKind};
use super::manager::LocalParticipant;
use super::state::{LinkRole, LinkState};
use crate::media::{MediaStream, MediaTrack, OutgoingTrackSet};
use crate::signaling::{RelayPublisher, SignalEnvelope, SignalingMessage};
use crate::transport::{
    IceCandidate, PeerTransport, SessionDescription, TrackReplacement, TransportEvent,
    TransportState,
};
use crate::{Error, Result};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Everything a link needs besides its transport
pub(crate) struct LinkSetup {
    pub local: Arc<LocalParticipant>,
    pub remote_participant_id: String,
    pub remote_user_id: String,
    pub role: LinkRole,
    pub generation: u64,
    pub outgoing: OutgoingTrackSet,
    pub publisher: Arc<dyn RelayPublisher>,
    pub reports: mpsc::UnboundedSender<LinkReport>,
}

pub(crate) struct PeerLink {
    local: Arc<LocalParticipant>,
    remote_participant_id: String,
    remote_user_id: String,
    role: LinkRole,
    generation: u64,
    state: LinkState,

    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    pending_candidates: VecDeque<IceCandidate>,
    applied_candidates: HashSet<IceCandidate>,

    outgoing: OutgoingTrackSet,
    tracks_attached: bool,
    remote_stream: MediaStream,

    transport: Arc<dyn PeerTransport>,
    publisher: Arc<dyn RelayPublisher>,
    reports: mpsc::UnboundedSender<LinkReport>,

    transport_connected: bool,
    ever_connected: bool,
    renegotiation_pending: bool,
}

impl PeerLink {
    pub fn new(setup: LinkSetup, transport: Arc<dyn PeerTransport>) -> Self {
        let remote_stream = MediaStream::new(format!("remote-{}", setup.remote_participant_id));
        Self {
            local: setup.local,
            remote_participant_id: setup.remote_participant_id,
            remote_user_id: setup.remote_user_id,
            role: setup.role,
            generation: setup.generation,
            state: LinkState::Idle,
            local_description: None,
            remote_description: None,
            pending_candidates: VecDeque::new(),
            applied_candidates: HashSet::new(),
            outgoing: setup.outgoing,
            tracks_attached: false,
            remote_stream,
            transport,
            publisher: setup.publisher,
            reports: setup.reports,
            transport_connected: false,
            ever_connected: false,
            renegotiation_pending: false,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn role(&self) -> LinkRole {
        self.role
    }

    /// Whether the link has reached Connected at least once
    pub fn ever_connected(&self) -> bool {
        self.ever_connected
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Attach local tracks, create and publish the first offer
    pub async fn start_as_initiator(&mut self) -> Result<()> {
        info!(
            participant_id = %self.remote_participant_id,
            "Initiating connection to {}", self.remote_user_id
        );
        self.attach_tracks().await?;
        self.send_offer().await
    }

    pub async fn handle_input(&mut self, input: LinkInput) -> Result<()> {
        match input {
            LinkInput::Signal(message) => self.on_signal(message).await,
            LinkInput::ReplaceTrack(track) => self.replace_outgoing_track(track).await,
        }
    }

    async fn on_signal(&mut self, message: SignalingMessage) -> Result<()> {
        match message {
            SignalingMessage::Offer(envelope) => self.accept_offer(envelope.data).await,
            SignalingMessage::Answer(envelope) => self.accept_answer(envelope.data).await,
            SignalingMessage::IceCandidate(envelope) => {
                self.add_remote_candidate(envelope.data).await
            }
        }
    }

    /// Handle a remote offer: first offer of a responder, a renegotiation
    /// offer, or a collision with our own outstanding offer.
    pub async fn accept_offer(&mut self, offer: SessionDescription) -> Result<()> {
        if self.state.is_offer_pending() {
            if self.local.participant_id < self.remote_participant_id {
                info!(
                    participant_id = %self.remote_participant_id,
                    "Offer collision, rolling back local offer and answering"
                );
                self.transport.rollback_local_description().await?;
                self.local_description = None;
                if self.remote_description.is_some() {
                    // Our rolled-back offer carried a track change; send it again
                    // once this round settles
                    self.renegotiation_pending = true;
                } else {
                    self.role = LinkRole::Responder;
                    self.report(LinkReportKind::RoleChanged(LinkRole::Responder));
                }
            } else {
                info!(
                    participant_id = %self.remote_participant_id,
                    "Offer collision, ignoring remote offer and keeping ours"
                );
                return Ok(());
            }
        } else if self.remote_description.as_ref() == Some(&offer) {
            debug!(
                participant_id = %self.remote_participant_id,
                "Ignoring duplicate offer"
            );
            return Ok(());
        }

        self.transition(LinkState::OfferReceived)?;
        self.attach_tracks().await?;

        self.transport.set_remote_description(offer.clone()).await?;
        self.remote_description = Some(offer);
        self.flush_pending_candidates().await?;

        let answer = self.transport.create_answer().await?;
        self.transport.set_local_description(answer.clone()).await?;
        self.local_description = Some(answer.clone());
        self.transition(LinkState::AnswerCreated)?;

        let envelope = self.envelope(answer);
        self.publish(SignalingMessage::Answer(envelope)).await;

        self.on_negotiation_settled().await
    }

    /// Handle the answer to our outstanding offer
    pub async fn accept_answer(&mut self, answer: SessionDescription) -> Result<()> {
        if !self.state.is_offer_pending() {
            info!(
                participant_id = %self.remote_participant_id,
                state = %self.state,
                "Ignoring answer with no outstanding offer"
            );
            return Ok(());
        }

        self.transport.set_remote_description(answer.clone()).await?;
        self.remote_description = Some(answer);
        self.transition(LinkState::RemoteDescriptionSet)?;
        self.flush_pending_candidates().await?;

        self.on_negotiation_settled().await
    }

    /// Apply a remote candidate, or buffer it until a remote description exists
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if self.applied_candidates.contains(&candidate) {
            debug!(
                participant_id = %self.remote_participant_id,
                "Ignoring already applied candidate"
            );
            return Ok(());
        }

        if self.remote_description.is_none() {
            if !self.pending_candidates.contains(&candidate) {
                self.pending_candidates.push_back(candidate);
            }
            debug!(
                participant_id = %self.remote_participant_id,
                pending = self.pending_candidates.len(),
                "Buffered candidate until remote description is set"
            );
            return Ok(());
        }

        self.apply_candidate(candidate).await
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        self.transport.add_ice_candidate(candidate.clone()).await?;
        self.applied_candidates.insert(candidate);
        Ok(())
    }

    async fn flush_pending_candidates(&mut self) -> Result<()> {
        if !self.pending_candidates.is_empty() {
            debug!(
                participant_id = %self.remote_participant_id,
                "Applying {} buffered candidates",
                self.pending_candidates.len()
            );
        }
        while let Some(candidate) = self.pending_candidates.pop_front() {
            if self.applied_candidates.contains(&candidate) {
                continue;
            }
            self.apply_candidate(candidate).await?;
        }
        Ok(())
    }

    /// React to something the transport reported
    pub async fn on_transport_event(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::IceCandidate(candidate) => {
                let envelope = self.envelope(candidate);
                self.publish(SignalingMessage::IceCandidate(envelope)).await;
                Ok(())
            }
            TransportEvent::StateChanged(state) => self.on_transport_state(state),
            TransportEvent::TrackReceived(track) => {
                if self.remote_stream.add_track(track) {
                    self.report(LinkReportKind::RemoteStream(self.remote_stream.clone()));
                }
                Ok(())
            }
        }
    }

    fn on_transport_state(&mut self, state: TransportState) -> Result<()> {
        debug!(
            participant_id = %self.remote_participant_id,
            "Transport state: {}", state
        );
        match state {
            TransportState::Connected => {
                self.transport_connected = true;
                if self.state.is_stable() {
                    self.transition(LinkState::Connected)?;
                }
                Ok(())
            }
            TransportState::Disconnected => {
                warn!(
                    participant_id = %self.remote_participant_id,
                    "Transport disconnected, waiting for it to recover"
                );
                self.transport_connected = false;
                Ok(())
            }
            TransportState::Failed => Err(Error::transport(
                self.remote_participant_id.clone(),
                "transport failed",
            )),
            TransportState::Closed => Err(Error::transport(
                self.remote_participant_id.clone(),
                "transport closed by remote",
            )),
            TransportState::New | TransportState::Connecting => Ok(()),
        }
    }

    /// Swap the outgoing track of `track.kind()`
    ///
    /// Uses in-place replacement when the transport supports it; otherwise
    /// runs a new offer/answer round.
    pub async fn replace_outgoing_track(&mut self, track: MediaTrack) -> Result<()> {
        if self
            .outgoing
            .get(track.kind())
            .is_some_and(|current| current.same_track(&track))
        {
            return Ok(());
        }
        self.outgoing.replace(track.clone());

        if !self.tracks_attached {
            // Picked up by attach_tracks when negotiation starts
            return Ok(());
        }

        match self.transport.replace_track(&track).await? {
            TrackReplacement::InPlace => {
                debug!(
                    participant_id = %self.remote_participant_id,
                    "Replaced outgoing {} track in place", track.kind()
                );
                Ok(())
            }
            TrackReplacement::NeedsRenegotiation => {
                info!(
                    participant_id = %self.remote_participant_id,
                    "Outgoing {} track change requires renegotiation", track.kind()
                );
                self.renegotiate().await
            }
        }
    }

    /// Start a new offer/answer round, or defer it until the current one settles
    pub async fn renegotiate(&mut self) -> Result<()> {
        if !self.state.is_stable() {
            debug!(
                participant_id = %self.remote_participant_id,
                state = %self.state,
                "Deferring renegotiation"
            );
            self.renegotiation_pending = true;
            return Ok(());
        }
        self.send_offer().await
    }

    async fn on_negotiation_settled(&mut self) -> Result<()> {
        if self.transport_connected {
            self.transition(LinkState::Connected)?;
        }
        if self.renegotiation_pending {
            self.renegotiation_pending = false;
            self.send_offer().await?;
        }
        Ok(())
    }

    async fn send_offer(&mut self) -> Result<()> {
        let offer = self.transport.create_offer().await?;
        self.transport.set_local_description(offer.clone()).await?;
        self.local_description = Some(offer.clone());
        self.transition(LinkState::OfferCreated)?;

        let envelope = self.envelope(offer);
        self.publish(SignalingMessage::Offer(envelope)).await;
        Ok(())
    }

    async fn attach_tracks(&mut self) -> Result<()> {
        if self.tracks_attached {
            return Ok(());
        }
        for track in self.outgoing.tracks() {
            self.transport.add_track(track).await?;
        }
        self.tracks_attached = true;
        Ok(())
    }

    fn transition(&mut self, next: LinkState) -> Result<()> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.state,
                to: next,
            });
        }

        debug!(
            participant_id = %self.remote_participant_id,
            "{} -> {}", self.state, next
        );
        self.state = next;
        if next == LinkState::Connected {
            self.ever_connected = true;
        }
        self.report(LinkReportKind::StateChanged(next));
        Ok(())
    }

    /// Close the transport. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state.is_closed() {
            return;
        }
        let _ = self.transition(LinkState::Closed);
        self.pending_candidates.clear();
        if let Err(e) = self.transport.close().await {
            warn!(
                participant_id = %self.remote_participant_id,
                "Error closing transport: {}", e
            );
        }
    }

    fn envelope<T>(&self, data: T) -> SignalEnvelope<T> {
        SignalEnvelope {
            from_participant_id: self.local.participant_id.clone(),
            from_user_id: self.local.user_id.clone(),
            to_user_id: self.remote_user_id.clone(),
            to_participant_id: Some(self.remote_participant_id.clone()),
            data,
        }
    }

    /// Relay delivery is best effort; failures are logged, not retried
    async fn publish(&self, message: SignalingMessage) {
        let kind = message.kind();
        if let Err(e) = self.publisher.publish(message).await {
            warn!(
                participant_id = %self.remote_participant_id,
                "Failed to publish {}: {}", kind, e
            );
        }
    }

    fn report(&self, kind: LinkReportKind) {
        let _ = self.reports.send(LinkReport {
            participant_id: self.remote_participant_id.clone(),
            generation: self.generation,
            kind,
        });
    }
}
