//! Local media capture interface
//!
//! The capture device itself is external. The core only needs a way to
//! acquire the camera/microphone stream once per session and a screen stream
//! on demand; both can fail (permission denied, device busy).

use super::track::{MediaStream, MediaTrack, TrackKind, TrackSource};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Source of local audio/video and screen capture streams
#[async_trait]
pub trait MediaCaptureSource: Send + Sync {
    /// Acquire the camera + microphone stream
    async fn acquire_local_media(&self) -> Result<MediaStream>;

    /// Acquire a screen capture stream (video only)
    async fn acquire_screen_media(&self) -> Result<MediaStream>;
}

/// Capture source that fabricates tracks without touching real devices
///
/// Used by headless participants and tests. Failures can be injected to
/// exercise the permission-denied paths.
#[derive(Default)]
pub struct SyntheticCaptureSource {
    local_failure: Mutex<Option<String>>,
    screen_failure: Mutex<Option<String>>,
    screen_delay: Mutex<Option<Duration>>,
    screen_requests: AtomicUsize,
    screen_acquisitions: AtomicUsize,
    screen_tracks: Mutex<Vec<MediaTrack>>,
}

impl SyntheticCaptureSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `acquire_local_media` calls fail with `reason`
    pub fn fail_local(self, reason: impl Into<String>) -> Self {
        *self.local_failure.lock() = Some(reason.into());
        self
    }

    /// Make `acquire_screen_media` fail with `reason` (or succeed again with `None`)
    pub fn set_screen_failure(&self, reason: Option<String>) {
        *self.screen_failure.lock() = reason;
    }

    /// Hold each screen capture for `delay`, like a picker waiting on the user
    pub fn set_screen_delay(&self, delay: Option<Duration>) {
        *self.screen_delay.lock() = delay;
    }

    /// Number of `acquire_screen_media` calls, including pending and failed ones
    pub fn screen_requests(&self) -> usize {
        self.screen_requests.load(Ordering::Relaxed)
    }

    /// Number of successful screen captures handed out
    pub fn screen_acquisitions(&self) -> usize {
        self.screen_acquisitions.load(Ordering::Relaxed)
    }

    /// Every screen track handed out so far
    pub fn screen_tracks(&self) -> Vec<MediaTrack> {
        self.screen_tracks.lock().clone()
    }
}

#[async_trait]
impl MediaCaptureSource for SyntheticCaptureSource {
    async fn acquire_local_media(&self) -> Result<MediaStream> {
        if let Some(reason) = self.local_failure.lock().clone() {
            return Err(Error::CaptureDevice(reason));
        }

        Ok(MediaStream::with_tracks(
            "local",
            vec![
                MediaTrack::new(TrackKind::Audio, TrackSource::Microphone, "synthetic-mic"),
                MediaTrack::new(TrackKind::Video, TrackSource::Camera, "synthetic-camera"),
            ],
        ))
    }

    async fn acquire_screen_media(&self) -> Result<MediaStream> {
        self.screen_requests.fetch_add(1, Ordering::Relaxed);
        let delay = *self.screen_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(reason) = self.screen_failure.lock().clone() {
            return Err(Error::CaptureDevice(reason));
        }

        let n = self.screen_acquisitions.fetch_add(1, Ordering::Relaxed);
        let track = MediaTrack::new(TrackKind::Video, TrackSource::Screen, "synthetic-screen");
        self.screen_tracks.lock().push(track.clone());
        Ok(MediaStream::with_tracks(format!("screen-{}", n), vec![track]))
    }
}
