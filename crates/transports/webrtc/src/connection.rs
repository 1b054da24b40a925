//! webrtc-rs peer connections behind the mesh transport traits

use crate::ice::{build_api, rtc_configuration, ApiOptions};
use crate::tracks::{local_sample_track, remote_media_track};
use async_trait::async_trait;
use meetmesh_core::transport::{
    IceCandidate, SdpKind, SessionDescription, TrackReplacement, TransportEvent,
    TransportEventSender, TransportState,
};
use meetmesh_core::{
    Error, MediaTrack, MeshConfig, PeerTransport, PeerTransportFactory, Result, TrackKind,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::API;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Creates one [`WebRtcPeerTransport`] per PeerLink from a shared API
pub struct WebRtcTransportFactory {
    api: Arc<API>,
    rtc_config: RTCConfiguration,
}

impl WebRtcTransportFactory {
    pub fn new(config: &MeshConfig) -> Result<Self> {
        Self::with_options(config, ApiOptions::default())
    }

    pub fn with_options(config: &MeshConfig, options: ApiOptions) -> Result<Self> {
        let rtc_config = rtc_configuration(config);
        info!(
            "WebRTC transport factory with {} ICE server(s)",
            rtc_config.ice_servers.len()
        );
        Ok(Self {
            api: Arc::new(build_api(&options)?),
            rtc_config,
        })
    }
}

#[async_trait]
impl PeerTransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        remote_participant_id: &str,
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerTransport>> {
        let transport = WebRtcPeerTransport::new(
            &self.api,
            self.rtc_config.clone(),
            remote_participant_id,
            events,
        )
        .await?;
        Ok(Arc::new(transport))
    }
}

struct SenderSlot {
    track: MediaTrack,
    sample: Arc<TrackLocalStaticSample>,
    sender: Arc<RTCRtpSender>,
}

/// One webrtc-rs peer connection toward a remote participant
///
/// Callbacks from the connection (gathered candidates, state changes, remote
/// tracks) are forwarded as [`TransportEvent`]s; nothing here touches link
/// state directly.
pub struct WebRtcPeerTransport {
    remote_participant_id: String,
    peer_connection: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<TrackKind, SenderSlot>>,
}

impl WebRtcPeerTransport {
    pub async fn new(
        api: &API,
        rtc_config: RTCConfiguration,
        remote_participant_id: &str,
        events: TransportEventSender,
    ) -> Result<Self> {
        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| {
                    Error::transport(
                        remote_participant_id,
                        format!("Failed to create peer connection: {}", e),
                    )
                })?,
        );
        debug!("Created peer connection toward {}", remote_participant_id);

        let transport = Self {
            remote_participant_id: remote_participant_id.to_string(),
            peer_connection,
            senders: Mutex::new(HashMap::new()),
        };
        transport.forward_events(events);
        Ok(transport)
    }

    fn forward_events(&self, events: TransportEventSender) {
        let participant_id = self.remote_participant_id.clone();
        let ice_events = events.clone();
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = ice_events.clone();
                let participant_id = participant_id.clone();
                Box::pin(async move {
                    // None marks the end of gathering
                    let Some(candidate) = candidate else { return };
                    match candidate.to_json() {
                        Ok(init) => {
                            let _ = events.send(TransportEvent::IceCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            }));
                        }
                        Err(e) => warn!(
                            participant_id = %participant_id,
                            "Failed to serialize ICE candidate: {}", e
                        ),
                    }
                })
            }));

        let participant_id = self.remote_participant_id.clone();
        let state_events = events.clone();
        self.peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let events = state_events.clone();
                let participant_id = participant_id.clone();
                Box::pin(async move {
                    debug!(participant_id = %participant_id, "Peer connection state: {}", s);
                    if let Some(state) = transport_state(s) {
                        let _ = events.send(TransportEvent::StateChanged(state));
                    }
                })
            },
        ));

        let participant_id = self.remote_participant_id.clone();
        self.peer_connection
            .on_track(Box::new(move |track, _receiver, _transceiver| {
                let events = events.clone();
                let participant_id = participant_id.clone();
                Box::pin(async move {
                    match remote_media_track(&track) {
                        Some(media) => {
                            debug!(
                                participant_id = %participant_id,
                                "Remote {} track {}", media.kind(), media.id()
                            );
                            let _ = events.send(TransportEvent::TrackReceived(media));
                        }
                        None => debug!(
                            participant_id = %participant_id,
                            "Ignoring remote track of unknown kind"
                        ),
                    }
                })
            }));
    }

    /// Sample track currently sending media of `kind`, for the capture layer to write into
    pub fn sample_track(&self, kind: TrackKind) -> Option<Arc<TrackLocalStaticSample>> {
        self.senders
            .lock()
            .get(&kind)
            .map(|slot| Arc::clone(&slot.sample))
    }

    /// Mesh track bound to the sender of `kind`
    pub fn sending(&self, kind: TrackKind) -> Option<MediaTrack> {
        self.senders.lock().get(&kind).map(|slot| slot.track.clone())
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    fn fail(&self, what: &str, e: impl Display) -> Error {
        Error::transport(
            self.remote_participant_id.clone(),
            format!("{}: {}", what, e),
        )
    }

    fn to_rtc(&self, description: SessionDescription) -> Result<RTCSessionDescription> {
        match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(|e| self.fail("Invalid SDP", e))
    }

    async fn attach(&self, track: &MediaTrack) -> Result<()> {
        let sample = local_sample_track(track);
        let sender = self
            .peer_connection
            .add_track(Arc::clone(&sample) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| self.fail("Failed to add track", e))?;

        // Drain RTCP so the interceptors keep running
        let rtcp_sender = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        self.senders.lock().insert(
            track.kind(),
            SenderSlot {
                track: track.clone(),
                sample,
                sender,
            },
        );
        Ok(())
    }
}

fn transport_state(state: RTCPeerConnectionState) -> Option<TransportState> {
    match state {
        RTCPeerConnectionState::New => Some(TransportState::New),
        RTCPeerConnectionState::Connecting => Some(TransportState::Connecting),
        RTCPeerConnectionState::Connected => Some(TransportState::Connected),
        RTCPeerConnectionState::Disconnected => Some(TransportState::Disconnected),
        RTCPeerConnectionState::Failed => Some(TransportState::Failed),
        RTCPeerConnectionState::Closed => Some(TransportState::Closed),
        _ => None,
    }
}

#[async_trait]
impl PeerTransport for WebRtcPeerTransport {
    async fn add_track(&self, track: &MediaTrack) -> Result<()> {
        if self.senders.lock().contains_key(&track.kind()) {
            self.replace_track(track).await?;
            return Ok(());
        }
        self.attach(track).await
    }

    async fn replace_track(&self, track: &MediaTrack) -> Result<TrackReplacement> {
        let existing = self
            .senders
            .lock()
            .get(&track.kind())
            .map(|slot| Arc::clone(&slot.sender));

        let Some(sender) = existing else {
            self.attach(track).await?;
            return Ok(TrackReplacement::NeedsRenegotiation);
        };

        let sample = local_sample_track(track);
        match sender
            .replace_track(Some(Arc::clone(&sample) as Arc<dyn TrackLocal + Send + Sync>))
            .await
        {
            Ok(()) => {
                self.senders.lock().insert(
                    track.kind(),
                    SenderSlot {
                        track: track.clone(),
                        sample,
                        sender,
                    },
                );
                Ok(TrackReplacement::InPlace)
            }
            Err(e) => {
                warn!(
                    participant_id = %self.remote_participant_id,
                    "In-place {} replacement failed ({}), adding a new sender", track.kind(), e
                );
                self.peer_connection
                    .remove_track(&sender)
                    .await
                    .map_err(|e| self.fail("Failed to remove track", e))?;
                self.senders.lock().remove(&track.kind());
                self.attach(track).await?;
                Ok(TrackReplacement::NeedsRenegotiation)
            }
        }
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| self.fail("Failed to create offer", e))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| self.fail("Failed to create answer", e))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let description = self.to_rtc(description)?;
        self.peer_connection
            .set_local_description(description)
            .await
            .map_err(|e| self.fail("Failed to set local description", e))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let description = self.to_rtc(description)?;
        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| self.fail("Failed to set remote description", e))
    }

    async fn rollback_local_description(&self) -> Result<()> {
        let Some(mut rollback) = self.peer_connection.pending_local_description().await else {
            debug!(
                participant_id = %self.remote_participant_id,
                "No pending local offer to roll back"
            );
            return Ok(());
        };
        rollback.sdp_type = RTCSdpType::Rollback;
        self.peer_connection
            .set_local_description(rollback)
            .await
            .map_err(|e| self.fail("Failed to roll back local offer", e))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(|e| self.fail("Failed to add ICE candidate", e))
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection toward {}", self.remote_participant_id);
        self.senders.lock().clear();
        self.peer_connection
            .close()
            .await
            .map_err(|e| self.fail("Failed to close peer connection", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meetmesh_core::TrackSource;
    use tokio::sync::mpsc;
    use webrtc::peer_connection::signaling_state::RTCSignalingState;

    fn no_ice_servers() -> MeshConfig {
        MeshConfig {
            stun_servers: Vec::new(),
            ..MeshConfig::default()
        }
    }

    async fn transport(remote: &str) -> (WebRtcPeerTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let api = build_api(&ApiOptions::default()).unwrap();
        let transport = WebRtcPeerTransport::new(&api, rtc_configuration(&no_ice_servers()), remote, tx)
            .await
            .unwrap();
        (transport, rx)
    }

    #[test]
    fn test_transport_state_mapping() {
        assert_eq!(
            transport_state(RTCPeerConnectionState::Connected),
            Some(TransportState::Connected)
        );
        assert_eq!(
            transport_state(RTCPeerConnectionState::Failed),
            Some(TransportState::Failed)
        );
        assert_eq!(transport_state(RTCPeerConnectionState::Unspecified), None);
    }

    #[tokio::test]
    async fn test_replace_track_swaps_sender_in_place() {
        let (transport, _events) = transport("b").await;
        let camera = MediaTrack::new(TrackKind::Video, TrackSource::Camera, "camera");
        let screen = MediaTrack::new(TrackKind::Video, TrackSource::Screen, "screen");

        assert_eq!(
            transport.replace_track(&camera).await.unwrap(),
            TrackReplacement::NeedsRenegotiation
        );
        assert_eq!(
            transport.replace_track(&screen).await.unwrap(),
            TrackReplacement::InPlace
        );
        assert_eq!(transport.sending(TrackKind::Video), Some(screen.clone()));
        assert_eq!(
            transport.sample_track(TrackKind::Video).unwrap().id(),
            screen.id()
        );
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_offer_rollback_returns_to_stable() {
        let (transport, _events) = transport("b").await;
        let mic = MediaTrack::new(TrackKind::Audio, TrackSource::Microphone, "mic");
        transport.add_track(&mic).await.unwrap();

        let offer = transport.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        transport.set_local_description(offer).await.unwrap();
        assert_eq!(
            transport.peer_connection().signaling_state(),
            RTCSignalingState::HaveLocalOffer
        );

        transport.rollback_local_description().await.unwrap();
        assert_eq!(
            transport.peer_connection().signaling_state(),
            RTCSignalingState::Stable
        );
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_offer_answer_exchange() {
        let (offerer, _offerer_events) = transport("answerer").await;
        let (answerer, _answerer_events) = transport("offerer").await;
        let mic = MediaTrack::new(TrackKind::Audio, TrackSource::Microphone, "mic");
        offerer.add_track(&mic).await.unwrap();
        answerer.add_track(&mic).await.unwrap();

        let offer = offerer.create_offer().await.unwrap();
        offerer.set_local_description(offer.clone()).await.unwrap();
        answerer.set_remote_description(offer).await.unwrap();

        let answer = answerer.create_answer().await.unwrap();
        assert_eq!(answer.kind, SdpKind::Answer);
        answerer.set_local_description(answer.clone()).await.unwrap();
        offerer.set_remote_description(answer).await.unwrap();

        assert_eq!(
            offerer.peer_connection().signaling_state(),
            RTCSignalingState::Stable
        );
        offerer.close().await.unwrap();
        answerer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_sdp_is_rejected() {
        let (transport, _events) = transport("b").await;
        let result = transport
            .set_remote_description(SessionDescription::offer("not an sdp"))
            .await;
        assert!(matches!(result, Err(Error::TransportSetupFailed { .. })));
    }
}
