//! Media track and stream handles
//!
//! A [`MediaTrack`] is a cheap, cloneable handle to one audio or video track.
//! Clones share the enabled flag and the end-of-stream signal, so muting a
//! track is visible to every PeerLink that transmits it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Where a track's media comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
    /// Received from a remote participant
    Remote,
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    source: TrackSource,
    label: String,
    enabled: AtomicBool,
    ended: watch::Sender<bool>,
}

/// Shared handle to a single media track
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    /// Create a track with a fresh random id
    pub fn new(kind: TrackKind, source: TrackSource, label: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), kind, source, label)
    }

    /// Create a track with a known id (e.g. the id reported by a transport)
    pub fn with_id(
        id: impl Into<String>,
        kind: TrackKind,
        source: TrackSource,
        label: impl Into<String>,
    ) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                source,
                label: label.into(),
                enabled: AtomicBool::new(true),
                ended,
            }),
        }
    }

    /// Track received from a remote participant
    pub fn remote(id: impl Into<String>, kind: TrackKind) -> Self {
        Self::with_id(id, kind, TrackSource::Remote, "remote")
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn source(&self) -> TrackSource {
        self.inner.source
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Whether media is currently flowing (false when muted / camera off)
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Mute or unmute. Does not stop capture and does not renegotiate.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    /// End the track. Wakes every [`ended`](Self::ended) waiter.
    pub fn stop(&self) {
        self.inner.ended.send_replace(true);
    }

    pub fn is_ended(&self) -> bool {
        *self.inner.ended.borrow()
    }

    /// Resolves once the track has ended (user revoked capture, window closed,
    /// or [`stop`](Self::stop) was called)
    pub async fn ended(&self) {
        let mut rx = self.inner.ended.subscribe();
        let _ = rx.wait_for(|ended| *ended).await;
    }

    /// Whether both handles refer to the same underlying track
    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for MediaTrack {}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("source", &self.inner.source)
            .field("enabled", &self.is_enabled())
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// A group of tracks captured or received together
#[derive(Debug, Clone, Default)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn with_tracks(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        let mut stream = Self::new(id);
        for track in tracks {
            stream.add_track(track);
        }
        stream
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a track. Returns false if a track with the same id is already present.
    pub fn add_track(&mut self, track: MediaTrack) -> bool {
        if self.tracks.iter().any(|t| t.id() == track.id()) {
            return false;
        }
        self.tracks.push(track);
        true
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn first_audio(&self) -> Option<&MediaTrack> {
        self.audio_tracks().next()
    }

    pub fn first_video(&self) -> Option<&MediaTrack> {
        self.video_tracks().next()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Stop every track in the stream (releases the capture device)
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// The audio and video tracks a PeerLink currently transmits
#[derive(Debug, Clone, Default)]
pub struct OutgoingTrackSet {
    pub audio: Option<MediaTrack>,
    pub video: Option<MediaTrack>,
}

impl OutgoingTrackSet {
    /// First audio and first video track of a captured stream
    pub fn from_stream(stream: &MediaStream) -> Self {
        Self {
            audio: stream.first_audio().cloned(),
            video: stream.first_video().cloned(),
        }
    }

    pub fn tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.audio.iter().chain(self.video.iter())
    }

    pub fn get(&self, kind: TrackKind) -> Option<&MediaTrack> {
        match kind {
            TrackKind::Audio => self.audio.as_ref(),
            TrackKind::Video => self.video.as_ref(),
        }
    }

    /// Swap the track of the given track's kind, returning the previous one
    pub fn replace(&mut self, track: MediaTrack) -> Option<MediaTrack> {
        match track.kind() {
            TrackKind::Audio => self.audio.replace(track),
            TrackKind::Video => self.video.replace(track),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_clones_share_enabled_flag() {
        let track = MediaTrack::new(TrackKind::Audio, TrackSource::Microphone, "mic");
        let clone = track.clone();
        clone.set_enabled(false);
        assert!(!track.is_enabled());
        assert!(track.same_track(&clone));
    }

    #[tokio::test]
    async fn test_ended_wakes_waiters() {
        let track = MediaTrack::new(TrackKind::Video, TrackSource::Screen, "screen");
        let waiter = {
            let track = track.clone();
            tokio::spawn(async move { track.ended().await })
        };

        track.stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
        assert!(track.is_ended());
    }

    #[tokio::test]
    async fn test_ended_after_stop_resolves_immediately() {
        let track = MediaTrack::new(TrackKind::Video, TrackSource::Camera, "cam");
        track.stop();
        tokio::time::timeout(Duration::from_millis(100), track.ended())
            .await
            .expect("already ended");
    }

    #[test]
    fn test_stream_dedups_tracks() {
        let track = MediaTrack::new(TrackKind::Video, TrackSource::Camera, "cam");
        let mut stream = MediaStream::new("local");
        assert!(stream.add_track(track.clone()));
        assert!(!stream.add_track(track));
        assert_eq!(stream.tracks().len(), 1);
    }

    #[test]
    fn test_outgoing_set_replace() {
        let mic = MediaTrack::new(TrackKind::Audio, TrackSource::Microphone, "mic");
        let cam = MediaTrack::new(TrackKind::Video, TrackSource::Camera, "cam");
        let screen = MediaTrack::new(TrackKind::Video, TrackSource::Screen, "screen");
        let stream = MediaStream::with_tracks("local", vec![mic.clone(), cam.clone()]);

        let mut set = OutgoingTrackSet::from_stream(&stream);
        assert_eq!(set.tracks().count(), 2);

        let previous = set.replace(screen.clone());
        assert_eq!(previous, Some(cam));
        assert_eq!(set.get(TrackKind::Video), Some(&screen));
        assert_eq!(set.get(TrackKind::Audio), Some(&mic));
    }
}
