//! Recording transport for tests and simulations
//!
//! [`MockTransport`] behaves like a well-behaved peer connection without any
//! networking: it refuses ICE candidates before a remote description exists,
//! gathers one fake host candidate per local description, and reports
//! Connected once both descriptions are in place. Every call is recorded so
//! tests can assert on ordering.

use super::{
    IceCandidate, PeerTransport, PeerTransportFactory, SdpKind, SessionDescription,
    TrackReplacement, TransportEvent, TransportEventSender, TransportState,
};
use crate::media::{MediaTrack, TrackKind};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Knobs for [`MockTransport`] behavior
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Support in-place track replacement (otherwise request renegotiation)
    pub in_place_replacement: bool,
    /// Report Connected as soon as both descriptions are set
    pub auto_connect: bool,
    /// Reject every remote description
    pub reject_remote_description: bool,
    /// Local candidates gathered per local description
    pub local_candidates: usize,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            in_place_replacement: true,
            auto_connect: true,
            reject_remote_description: false,
            local_candidates: 1,
        }
    }
}

/// Everything a [`MockTransport`] has been asked to do
#[derive(Debug, Clone, Default)]
pub struct MockRecord {
    pub local_description: Option<SessionDescription>,
    pub remote_description: Option<SessionDescription>,
    pub applied_candidates: Vec<IceCandidate>,
    /// Tracks currently bound to senders, one per kind
    pub senders: Vec<MediaTrack>,
    pub offers_created: usize,
    pub answers_created: usize,
    pub in_place_replacements: usize,
    pub rollbacks: usize,
    pub connected: bool,
    pub closed: bool,
}

/// A fake peer connection
pub struct MockTransport {
    remote_participant_id: String,
    behavior: MockBehavior,
    events: TransportEventSender,
    record: Mutex<MockRecord>,
}

impl MockTransport {
    pub fn new(
        remote_participant_id: impl Into<String>,
        behavior: MockBehavior,
        events: TransportEventSender,
    ) -> Self {
        Self {
            remote_participant_id: remote_participant_id.into(),
            behavior,
            events,
            record: Mutex::new(MockRecord::default()),
        }
    }

    pub fn remote_participant_id(&self) -> &str {
        &self.remote_participant_id
    }

    /// Copy of the call record
    pub fn record(&self) -> MockRecord {
        self.record.lock().clone()
    }

    /// The track currently bound to the video sender
    pub fn video_sender(&self) -> Option<MediaTrack> {
        self.record
            .lock()
            .senders
            .iter()
            .find(|t| t.kind() == TrackKind::Video)
            .cloned()
    }

    /// Push a transport event as if the media stack produced it
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn fail(&self, reason: &str) -> Error {
        Error::transport(self.remote_participant_id.clone(), reason)
    }

    fn ensure_open(&self, record: &MockRecord) -> Result<()> {
        if record.closed {
            return Err(self.fail("transport closed"));
        }
        Ok(())
    }

    fn maybe_connect(&self, record: &mut MockRecord) {
        if self.behavior.auto_connect
            && !record.connected
            && record.local_description.is_some()
            && record.remote_description.is_some()
        {
            record.connected = true;
            self.emit(TransportEvent::StateChanged(TransportState::Connected));
            for kind in [TrackKind::Audio, TrackKind::Video] {
                self.emit(TransportEvent::TrackReceived(MediaTrack::remote(
                    format!("{}-{}", self.remote_participant_id, kind),
                    kind,
                )));
            }
        }
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn add_track(&self, track: &MediaTrack) -> Result<()> {
        let mut record = self.record.lock();
        self.ensure_open(&record)?;
        record.senders.retain(|t| t.kind() != track.kind());
        record.senders.push(track.clone());
        Ok(())
    }

    async fn replace_track(&self, track: &MediaTrack) -> Result<TrackReplacement> {
        let mut record = self.record.lock();
        self.ensure_open(&record)?;

        let had_sender = record.senders.iter().any(|t| t.kind() == track.kind());
        record.senders.retain(|t| t.kind() != track.kind());
        record.senders.push(track.clone());

        if had_sender && self.behavior.in_place_replacement {
            record.in_place_replacements += 1;
            Ok(TrackReplacement::InPlace)
        } else {
            Ok(TrackReplacement::NeedsRenegotiation)
        }
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut record = self.record.lock();
        self.ensure_open(&record)?;
        record.offers_created += 1;
        Ok(SessionDescription::offer(format!(
            "v=0 mock-offer to={} n={}",
            self.remote_participant_id, record.offers_created
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut record = self.record.lock();
        self.ensure_open(&record)?;
        if record.remote_description.as_ref().map(|d| d.kind) != Some(SdpKind::Offer) {
            return Err(self.fail("cannot create answer without a remote offer"));
        }
        record.answers_created += 1;
        Ok(SessionDescription::answer(format!(
            "v=0 mock-answer to={} n={}",
            self.remote_participant_id, record.answers_created
        )))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let mut record = self.record.lock();
        self.ensure_open(&record)?;
        record.local_description = Some(description);

        for n in 0..self.behavior.local_candidates {
            self.emit(TransportEvent::IceCandidate(IceCandidate::new(
                format!(
                    "candidate:{} 1 udp 2122260223 10.0.0.{} {} typ host",
                    n + 1,
                    n + 1,
                    50000 + n
                ),
                Some("0".to_string()),
                Some(0),
            )));
        }

        self.maybe_connect(&mut record);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let mut record = self.record.lock();
        self.ensure_open(&record)?;
        if self.behavior.reject_remote_description {
            return Err(self.fail("remote description rejected"));
        }
        record.remote_description = Some(description);
        self.maybe_connect(&mut record);
        Ok(())
    }

    async fn rollback_local_description(&self) -> Result<()> {
        let mut record = self.record.lock();
        self.ensure_open(&record)?;
        record.local_description = None;
        record.rollbacks += 1;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut record = self.record.lock();
        self.ensure_open(&record)?;
        if record.remote_description.is_none() {
            return Err(self.fail("ICE candidate applied before remote description"));
        }
        record.applied_candidates.push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record.lock().closed = true;
        Ok(())
    }
}

/// Factory that hands out [`MockTransport`]s and keeps them for inspection
#[derive(Default)]
pub struct MockTransportFactory {
    behavior: MockBehavior,
    created: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Every transport created so far, in creation order
    pub fn transports(&self) -> Vec<Arc<MockTransport>> {
        self.created.lock().clone()
    }

    /// Most recent transport created for `remote_participant_id`
    pub fn transport_for(&self, remote_participant_id: &str) -> Option<Arc<MockTransport>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|t| t.remote_participant_id() == remote_participant_id)
            .cloned()
    }

    /// Total offers created across all transports
    pub fn offers_created(&self) -> usize {
        self.created
            .lock()
            .iter()
            .map(|t| t.record().offers_created)
            .sum()
    }
}

#[async_trait]
impl PeerTransportFactory for MockTransportFactory {
    async fn create(
        &self,
        remote_participant_id: &str,
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerTransport>> {
        let transport = Arc::new(MockTransport::new(
            remote_participant_id,
            self.behavior.clone(),
            events,
        ));
        self.created.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}
