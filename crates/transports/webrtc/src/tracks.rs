//! Mapping between mesh media tracks and webrtc-rs tracks

use meetmesh_core::{MediaTrack, TrackKind};
use std::sync::Arc;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

/// Stream id every outgoing track is grouped under
pub const LOCAL_STREAM_ID: &str = "meetmesh-local";

/// Codec used to send tracks of `kind`: Opus 48kHz stereo or VP8
pub fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_string(),
            clock_rate: 90000,
            ..Default::default()
        },
    }
}

/// Sample track that carries `track`'s media. The capture layer writes
/// samples into it; the id matches the mesh track id.
pub fn local_sample_track(track: &MediaTrack) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        codec_for(track.kind()),
        track.id().to_string(),
        LOCAL_STREAM_ID.to_string(),
    ))
}

pub fn track_kind(codec_type: RTPCodecType) -> Option<TrackKind> {
    match codec_type {
        RTPCodecType::Audio => Some(TrackKind::Audio),
        RTPCodecType::Video => Some(TrackKind::Video),
        _ => None,
    }
}

/// Mesh handle for a track the remote started sending
pub fn remote_media_track(track: &TrackRemote) -> Option<MediaTrack> {
    track_kind(track.kind()).map(|kind| MediaTrack::remote(track.id(), kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use meetmesh_core::TrackSource;
    use webrtc::track::track_local::TrackLocal;

    #[test]
    fn test_codec_per_kind() {
        assert_eq!(codec_for(TrackKind::Audio).mime_type, MIME_TYPE_OPUS);
        assert_eq!(codec_for(TrackKind::Video).mime_type, MIME_TYPE_VP8);
        assert_eq!(codec_for(TrackKind::Video).clock_rate, 90000);
    }

    #[test]
    fn test_local_sample_track_keeps_track_id() {
        let camera = MediaTrack::new(TrackKind::Video, TrackSource::Camera, "camera");
        let sample = local_sample_track(&camera);
        assert_eq!(sample.id(), camera.id());
        assert_eq!(sample.stream_id(), LOCAL_STREAM_ID);
        assert_eq!(sample.kind(), RTPCodecType::Video);
    }

    #[test]
    fn test_unknown_codec_type_has_no_kind() {
        assert_eq!(track_kind(RTPCodecType::Unspecified), None);
        assert_eq!(track_kind(RTPCodecType::Audio), Some(TrackKind::Audio));
    }
}
