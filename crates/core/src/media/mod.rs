//! Media track handles and the capture interface

pub mod capture;
pub mod track;

pub use capture::{MediaCaptureSource, SyntheticCaptureSource};
pub use track::{MediaStream, MediaTrack, OutgoingTrackSet, TrackKind, TrackSource};
