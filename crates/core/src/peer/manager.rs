//! PeerConnectionManager: the single actor that owns every PeerLink
//!
//! One manager runs per local participant. It consumes roster updates, relay
//! messages, link reports and API commands on one task, so "which peers am I
//! connected to and why" is only ever decided in one place. Links themselves
//! run on their own driver tasks and talk back through [`LinkReport`]s.

use super::driver::{spawn_link, LinkHandle, LinkInput, LinkReport, LinkReportKind};
use super::link::LinkSetup;
use super::state::{LinkRole, LinkState};
use crate::config::MeshConfig;
use crate::events::MeshEvent;
use crate::media::{
    MediaCaptureSource, MediaStream, MediaTrack, OutgoingTrackSet, TrackKind, TrackSource,
};
use crate::roster::{ParticipantRef, RosterTracker, RosterUpdate};
use crate::signaling::{RelayPublisher, RelaySubscription, SignalingMessage, SignalingRelay};
use crate::transport::PeerTransportFactory;
use crate::{Error, Result};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// The participant this manager acts for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalParticipant {
    pub session_id: String,
    pub participant_id: String,
    pub user_id: String,
    pub display_name: String,
}

impl LocalParticipant {
    pub fn new(
        session_id: impl Into<String>,
        participant_id: impl Into<String>,
        user_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            participant_id: participant_id.into(),
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }

    /// This participant as a roster entry
    pub fn to_participant_ref(&self) -> ParticipantRef {
        ParticipantRef::new(
            self.participant_id.clone(),
            self.user_id.clone(),
            self.display_name.clone(),
        )
    }
}

/// Snapshot of one PeerLink, for diagnostics and UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSummary {
    pub participant_id: String,
    pub user_id: String,
    pub role: LinkRole,
    pub state: LinkState,
}

pub(crate) enum ManagerCommand {
    Roster(RosterUpdate),
    ReplaceVideoTrack(MediaTrack),
    StartScreenShare {
        reply: oneshot::Sender<Result<()>>,
    },
    ScreenShareAcquired {
        result: Result<MediaStream>,
        reply: oneshot::Sender<Result<()>>,
    },
    StopScreenShare,
    ScreenTrackEnded {
        track_id: String,
    },
    SetTrackEnabled {
        kind: TrackKind,
        enabled: bool,
    },
    Links {
        reply: oneshot::Sender<Vec<LinkSummary>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running [`PeerConnectionManager`]
///
/// When every handle is dropped the manager shuts itself down.
#[derive(Clone)]
pub struct ManagerHandle {
    commands: mpsc::Sender<ManagerCommand>,
    local: Arc<LocalParticipant>,
    local_stream: MediaStream,
    closed: Arc<AtomicBool>,
}

impl ManagerHandle {
    async fn send(&self, command: ManagerCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::ManagerClosed)
    }

    pub fn local(&self) -> &LocalParticipant {
        &self.local
    }

    /// The local camera/microphone stream, e.g. for recording
    pub fn local_stream(&self) -> MediaStream {
        self.local_stream.clone()
    }

    pub async fn apply_roster(&self, update: RosterUpdate) -> Result<()> {
        self.send(ManagerCommand::Roster(update)).await
    }

    /// Full roster as published by the roster store
    pub async fn roster_snapshot(&self, participants: Vec<ParticipantRef>) -> Result<()> {
        self.apply_roster(RosterUpdate::Snapshot(participants)).await
    }

    pub async fn participant_joined(&self, participant: ParticipantRef) -> Result<()> {
        self.apply_roster(RosterUpdate::Joined(participant)).await
    }

    /// Tear down the link to `participant_id`. Idempotent.
    pub async fn participant_left(&self, participant_id: impl Into<String>) -> Result<()> {
        self.apply_roster(RosterUpdate::Left(participant_id.into())).await
    }

    /// Send `track` as outgoing video on every PeerLink
    pub async fn replace_outgoing_video_track(&self, track: MediaTrack) -> Result<()> {
        self.send(ManagerCommand::ReplaceVideoTrack(track)).await
    }

    /// Acquire a screen capture and send it instead of the camera.
    ///
    /// The camera comes back automatically when the capture ends.
    pub async fn start_screen_share(&self) -> Result<()> {
        let (reply, result) = oneshot::channel();
        self.send(ManagerCommand::StartScreenShare { reply }).await?;
        result.await.map_err(|_| Error::ManagerClosed)?
    }

    pub async fn stop_screen_share(&self) -> Result<()> {
        self.send(ManagerCommand::StopScreenShare).await
    }

    pub async fn set_audio_enabled(&self, enabled: bool) -> Result<()> {
        self.send(ManagerCommand::SetTrackEnabled {
            kind: TrackKind::Audio,
            enabled,
        })
        .await
    }

    pub async fn set_video_enabled(&self, enabled: bool) -> Result<()> {
        self.send(ManagerCommand::SetTrackEnabled {
            kind: TrackKind::Video,
            enabled,
        })
        .await
    }

    /// Current PeerLinks, ordered by participant id
    pub async fn links(&self) -> Result<Vec<LinkSummary>> {
        let (reply, result) = oneshot::channel();
        self.send(ManagerCommand::Links { reply }).await?;
        result.await.map_err(|_| Error::ManagerClosed)
    }

    /// Close every PeerLink and leave the relay. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        if self
            .commands
            .send(ManagerCommand::Shutdown { reply })
            .await
            .is_ok()
        {
            let _ = done.await;
        }
    }

    /// True once shutdown has released every link and the relay subscription
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct LinkEntry {
    generation: u64,
    user_id: String,
    role: LinkRole,
    state: LinkState,
    handle: LinkHandle,
    task: JoinHandle<()>,
}

/// Owns the PeerLinks of one local participant
pub struct PeerConnectionManager {
    config: MeshConfig,
    local: Arc<LocalParticipant>,
    roster: RosterTracker,

    links: HashMap<String, LinkEntry>,
    /// Link tasks torn down but possibly still closing their transport
    retiring: Vec<JoinHandle<()>>,
    next_generation: u64,

    transports: Arc<dyn PeerTransportFactory>,
    capture: Arc<dyn MediaCaptureSource>,
    publisher: Arc<dyn RelayPublisher>,
    subscription: Option<RelaySubscription>,

    local_stream: MediaStream,
    camera: Option<MediaTrack>,
    screen: Option<MediaTrack>,
    outgoing: OutgoingTrackSet,

    commands: mpsc::Receiver<ManagerCommand>,
    weak_commands: mpsc::WeakSender<ManagerCommand>,
    reports_tx: mpsc::UnboundedSender<LinkReport>,
    reports_rx: mpsc::UnboundedReceiver<LinkReport>,
    events: mpsc::UnboundedSender<MeshEvent>,
    closed: Arc<AtomicBool>,
}

impl PeerConnectionManager {
    /// Join a session: acquire local media, subscribe to the relay and start
    /// the manager task.
    ///
    /// A capture failure aborts the join and is returned as
    /// [`Error::CaptureDevice`].
    pub async fn spawn(
        config: MeshConfig,
        local: LocalParticipant,
        relay: &dyn SignalingRelay,
        transports: Arc<dyn PeerTransportFactory>,
        capture: Arc<dyn MediaCaptureSource>,
    ) -> Result<(ManagerHandle, mpsc::UnboundedReceiver<MeshEvent>)> {
        config.validate()?;

        let local_stream = capture.acquire_local_media().await.map_err(|e| {
            error!("Failed to acquire local media, aborting join: {}", e);
            e
        })?;

        let subscription = match relay.join(&local.session_id).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(
                    "Failed to join relay channel for session {}: {}",
                    local.session_id, e
                );
                local_stream.stop();
                return Err(e);
            }
        };

        info!(
            "Participant {} ({}) joined session {}",
            local.participant_id, local.user_id, local.session_id
        );

        let local = Arc::new(local);
        let (commands_tx, commands_rx) = mpsc::channel(config.command_buffer);
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let manager = Self {
            roster: RosterTracker::new(),
            links: HashMap::new(),
            retiring: Vec::new(),
            next_generation: 0,
            transports,
            capture,
            publisher: subscription.publisher(),
            subscription: Some(subscription),
            camera: local_stream.first_video().cloned(),
            screen: None,
            outgoing: OutgoingTrackSet::from_stream(&local_stream),
            local_stream: local_stream.clone(),
            local: Arc::clone(&local),
            config,
            weak_commands: commands_tx.downgrade(),
            commands: commands_rx,
            reports_tx,
            reports_rx,
            events: events_tx,
            closed: Arc::clone(&closed),
        };

        tokio::spawn(manager.run());

        let handle = ManagerHandle {
            commands: commands_tx,
            local,
            local_stream,
            closed,
        };
        Ok((handle, events_rx))
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ManagerCommand::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All manager handles dropped");
                        self.shutdown().await;
                        break;
                    }
                },
                Some(report) = self.reports_rx.recv() => self.on_link_report(report),
                message = next_relay_message(&mut self.subscription) => match message {
                    Some(message) => self.on_signaling_message(message),
                    None => {
                        warn!("Relay subscription for session {} ended", self.local.session_id);
                        if let Some(subscription) = self.subscription.take() {
                            subscription.leave().await;
                        }
                    }
                },
            }
        }

        // Late commands get ManagerClosed
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let ManagerCommand::ScreenShareAcquired { result, reply } = command {
                release_unclaimed_screen(result);
                let _ = reply.send(Err(Error::ManagerClosed));
            }
        }
    }

    fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Roster(update) => self.on_roster_update(update),
            ManagerCommand::ReplaceVideoTrack(track) => self.replace_outgoing_video_track(track),
            ManagerCommand::StartScreenShare { reply } => self.start_screen_share(reply),
            ManagerCommand::ScreenShareAcquired { result, reply } => {
                self.on_screen_share_acquired(result, reply)
            }
            ManagerCommand::StopScreenShare => {
                if self.screen.is_some() {
                    self.restore_camera();
                } else {
                    debug!("No screen share to stop");
                }
            }
            ManagerCommand::ScreenTrackEnded { track_id } => self.on_screen_track_ended(&track_id),
            ManagerCommand::SetTrackEnabled { kind, enabled } => {
                self.set_track_enabled(kind, enabled)
            }
            ManagerCommand::Links { reply } => {
                let _ = reply.send(self.link_summaries());
            }
            // Handled by the run loop
            ManagerCommand::Shutdown { .. } => {}
        }
    }

    fn on_roster_update(&mut self, update: RosterUpdate) {
        match update {
            RosterUpdate::Snapshot(participants) => self.on_roster_snapshot(participants),
            RosterUpdate::Joined(participant) => {
                if let Some(participant) = self
                    .roster
                    .apply_joined(participant, &self.local.participant_id)
                {
                    info!(
                        participant_id = %participant.participant_id,
                        "{} joined, waiting for their offer", participant.display_name
                    );
                    self.emit(MeshEvent::participant_joined(participant));
                }
            }
            RosterUpdate::Left(participant_id) => self.on_participant_left(&participant_id),
        }
    }

    /// Apply a roster snapshot. On the first snapshot the local participant
    /// is the newcomer and initiates toward everyone already present; later
    /// arrivals initiate toward us.
    fn on_roster_snapshot(&mut self, participants: Vec<ParticipantRef>) {
        let diff = self
            .roster
            .apply_snapshot(participants, &self.local.participant_id);

        for participant_id in &diff.left {
            self.teardown_link(participant_id, "left the roster");
            self.emit(MeshEvent::participant_left(participant_id.clone()));
        }

        for participant in diff.joined {
            if diff.baseline {
                self.create_link(
                    &participant.participant_id,
                    &participant.user_id,
                    LinkRole::Initiator,
                );
            } else {
                debug!(
                    participant_id = %participant.participant_id,
                    "New participant, waiting for their offer"
                );
            }
            self.emit(MeshEvent::participant_joined(participant));
        }
    }

    /// Route one relay message to its PeerLink
    fn on_signaling_message(&mut self, message: SignalingMessage) {
        if !message.is_addressed_to(&self.local.user_id, &self.local.participant_id) {
            trace!("Ignoring {} addressed to {}", message.kind(), message.to_user_id());
            return;
        }

        let from = message.from_participant_id().to_string();
        if from == self.local.participant_id {
            return;
        }

        if let Some(entry) = self.links.get(&from) {
            let kind = message.kind();
            if !entry.handle.send(LinkInput::Signal(message)) {
                debug!(participant_id = %from, "PeerLink is closing, dropped {}", kind);
            }
            return;
        }

        if !matches!(message, SignalingMessage::Offer(_)) {
            info!(
                participant_id = %from,
                "Dropping {} with no PeerLink (late or after teardown)",
                message.kind()
            );
            return;
        }

        if self.roster.has_departed(&from) {
            info!(participant_id = %from, "Dropping offer from departed participant");
            return;
        }

        let from_user_id = message.from_user_id().to_string();
        if self.create_link(&from, &from_user_id, LinkRole::Responder) {
            if let Some(entry) = self.links.get(&from) {
                entry.handle.send(LinkInput::Signal(message));
            }
        }
    }

    /// Tear down the link to a departed participant. Idempotent.
    fn on_participant_left(&mut self, participant_id: &str) {
        let was_present = self.roster.apply_left(participant_id);
        let had_link = self.teardown_link(participant_id, "participant left");

        if was_present || had_link {
            self.emit(MeshEvent::participant_left(participant_id));
        } else {
            debug!(participant_id = %participant_id, "Participant already gone");
        }
    }

    fn create_link(&mut self, participant_id: &str, user_id: &str, role: LinkRole) -> bool {
        if self.links.contains_key(participant_id) {
            debug!(participant_id = %participant_id, "PeerLink already exists");
            return false;
        }

        if self.links.len() >= self.config.max_peers as usize {
            let err = Error::PeerLimitExceeded(self.config.max_peers);
            warn!(participant_id = %participant_id, "Refusing PeerLink: {}", err);
            self.emit(MeshEvent::peer_failed(participant_id, err.to_string()));
            return false;
        }

        self.next_generation += 1;
        let generation = self.next_generation;

        let setup = LinkSetup {
            local: Arc::clone(&self.local),
            remote_participant_id: participant_id.to_string(),
            remote_user_id: user_id.to_string(),
            role,
            generation,
            outgoing: self.outgoing.clone(),
            publisher: Arc::clone(&self.publisher),
            reports: self.reports_tx.clone(),
        };
        let (handle, task) = spawn_link(
            setup,
            Arc::clone(&self.transports),
            self.config.connect_timeout(),
        );

        info!(
            participant_id = %participant_id,
            "Created PeerLink as {:?} (generation {})", role, generation
        );

        self.links.insert(
            participant_id.to_string(),
            LinkEntry {
                generation,
                user_id: user_id.to_string(),
                role,
                state: LinkState::Idle,
                handle,
                task,
            },
        );
        true
    }

    fn teardown_link(&mut self, participant_id: &str, reason: &str) -> bool {
        match self.links.remove(participant_id) {
            Some(entry) => {
                info!(participant_id = %participant_id, "Closing PeerLink: {}", reason);
                entry.handle.shutdown();
                self.retire(entry.task);
                true
            }
            None => false,
        }
    }

    fn retire(&mut self, task: JoinHandle<()>) {
        self.retiring.retain(|t| !t.is_finished());
        self.retiring.push(task);
    }

    fn on_link_report(&mut self, report: LinkReport) {
        let participant_id = report.participant_id;
        let current = self
            .links
            .get(&participant_id)
            .is_some_and(|entry| entry.generation == report.generation);
        if !current {
            trace!(
                participant_id = %participant_id,
                "Ignoring report from closed PeerLink generation {}", report.generation
            );
            return;
        }

        match report.kind {
            LinkReportKind::StateChanged(state) => {
                if let Some(entry) = self.links.get_mut(&participant_id) {
                    entry.state = state;
                }
                self.emit(MeshEvent::peer_state_changed(participant_id, state));
            }
            LinkReportKind::RoleChanged(role) => {
                if let Some(entry) = self.links.get_mut(&participant_id) {
                    debug!(
                        participant_id = %participant_id,
                        "PeerLink role {:?} -> {:?}", entry.role, role
                    );
                    entry.role = role;
                }
            }
            LinkReportKind::RemoteStream(stream) => {
                let user_id = self
                    .links
                    .get(&participant_id)
                    .map(|entry| entry.user_id.clone())
                    .unwrap_or_default();
                self.emit(MeshEvent::RemoteStream {
                    participant_id,
                    user_id,
                    stream,
                });
            }
            LinkReportKind::Unreachable { timeout_ms } => {
                if let Some(entry) = self.links.remove(&participant_id) {
                    self.retire(entry.task);
                }
                warn!(participant_id = %participant_id, "Peer unreachable, not retrying");
                self.emit(MeshEvent::peer_unreachable(participant_id, timeout_ms));
            }
            LinkReportKind::Failed(reason) => {
                if let Some(entry) = self.links.remove(&participant_id) {
                    self.retire(entry.task);
                }
                self.emit(MeshEvent::peer_failed(participant_id, reason));
            }
        }
    }

    /// Send `track` on every PeerLink. Links that cannot swap in place
    /// renegotiate on their own.
    fn replace_outgoing_video_track(&mut self, track: MediaTrack) {
        if track.kind() != TrackKind::Video {
            warn!("Ignoring non-video track {} for video replacement", track.id());
            return;
        }
        if track.source() == TrackSource::Camera {
            self.camera = Some(track.clone());
        }

        self.outgoing.replace(track.clone());
        for (participant_id, entry) in &self.links {
            if !entry.handle.send(LinkInput::ReplaceTrack(track.clone())) {
                debug!(
                    participant_id = %participant_id,
                    "PeerLink is closing, skipped track replacement"
                );
            }
        }
    }

    fn start_screen_share(&mut self, reply: oneshot::Sender<Result<()>>) {
        // Acquisition may wait on a user prompt; keep the actor responsive
        let capture = Arc::clone(&self.capture);
        let commands = self.weak_commands.clone();
        tokio::spawn(async move {
            let result = capture.acquire_screen_media().await;
            let Some(commands) = commands.upgrade() else {
                release_unclaimed_screen(result);
                return;
            };
            if let Err(mpsc::error::SendError(ManagerCommand::ScreenShareAcquired {
                result, ..
            })) = commands
                .send(ManagerCommand::ScreenShareAcquired { result, reply })
                .await
            {
                release_unclaimed_screen(result);
            }
        });
    }

    fn on_screen_share_acquired(
        &mut self,
        result: Result<MediaStream>,
        reply: oneshot::Sender<Result<()>>,
    ) {
        let track = result.and_then(|stream| {
            stream.first_video().cloned().ok_or_else(|| {
                Error::CaptureDevice("screen capture has no video track".to_string())
            })
        });

        match track {
            Ok(track) => {
                if let Some(previous) = self.screen.replace(track.clone()) {
                    previous.stop();
                }
                info!("Screen share started ({})", track.label());
                self.replace_outgoing_video_track(track.clone());
                self.watch_screen_track(track);
                self.emit(MeshEvent::ScreenShareStarted);
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                warn!("Screen share failed: {}", e);
                self.emit(MeshEvent::ScreenShareFailed {
                    reason: e.to_string(),
                });
                let _ = reply.send(Err(e));
            }
        }
    }

    /// Restore the camera when the screen capture ends on its own
    fn watch_screen_track(&self, track: MediaTrack) {
        let commands = self.weak_commands.clone();
        tokio::spawn(async move {
            track.ended().await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands
                    .send(ManagerCommand::ScreenTrackEnded {
                        track_id: track.id().to_string(),
                    })
                    .await;
            }
        });
    }

    fn on_screen_track_ended(&mut self, track_id: &str) {
        if !self.screen.as_ref().is_some_and(|t| t.id() == track_id) {
            trace!("Ignoring end of inactive screen track {}", track_id);
            return;
        }
        self.restore_camera();
    }

    fn restore_camera(&mut self) {
        if let Some(screen) = self.screen.take() {
            screen.stop();
        }

        match self.camera.clone() {
            Some(camera) => {
                info!("Screen share ended, restoring camera");
                self.replace_outgoing_video_track(camera);
            }
            None => warn!("Screen share ended but there is no camera track to restore"),
        }
        self.emit(MeshEvent::ScreenShareEnded);
    }

    fn set_track_enabled(&mut self, kind: TrackKind, enabled: bool) {
        for track in self.local_stream.tracks().iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
        }
        if kind == TrackKind::Video {
            if let Some(camera) = &self.camera {
                camera.set_enabled(enabled);
            }
        }
        debug!("Local {} {}", kind, if enabled { "enabled" } else { "disabled" });
    }

    fn link_summaries(&self) -> Vec<LinkSummary> {
        let mut summaries: Vec<LinkSummary> = self
            .links
            .iter()
            .map(|(participant_id, entry)| LinkSummary {
                participant_id: participant_id.clone(),
                user_id: entry.user_id.clone(),
                role: entry.role,
                state: entry.state,
            })
            .collect();
        summaries.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        summaries
    }

    /// Close every PeerLink, leave the relay and release local media
    async fn shutdown(&mut self) {
        info!(
            "Shutting down peer connection manager for session {} ({} links)",
            self.local.session_id,
            self.links.len()
        );

        let mut tasks: Vec<JoinHandle<()>> = self.retiring.drain(..).collect();
        for (_, entry) in self.links.drain() {
            entry.handle.shutdown();
            tasks.push(entry.task);
        }

        let timeout = self.config.shutdown_timeout();
        if tokio::time::timeout(timeout, join_all(tasks.iter_mut()))
            .await
            .is_err()
        {
            warn!("PeerLinks did not close within {:?}, aborting", timeout);
            for task in &tasks {
                task.abort();
            }
        }

        if let Some(subscription) = self.subscription.take() {
            subscription.leave().await;
        }

        if let Some(screen) = self.screen.take() {
            screen.stop();
        }
        if let Some(camera) = &self.camera {
            camera.stop();
        }
        self.local_stream.stop();

        self.closed.store(true, Ordering::SeqCst);
        info!("Peer connection manager for session {} closed", self.local.session_id);
    }

    fn emit(&self, event: MeshEvent) {
        if self.events.send(event).is_err() {
            trace!("Mesh event receiver dropped");
        }
    }
}

/// Stop a screen capture that arrived after the manager stopped
fn release_unclaimed_screen(result: Result<MediaStream>) {
    if let Ok(stream) = result {
        debug!("Releasing screen capture acquired after shutdown");
        stream.stop();
    }
}

async fn next_relay_message(
    subscription: &mut Option<RelaySubscription>,
) -> Option<SignalingMessage> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
