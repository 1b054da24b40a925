//! Signaling and peer-connection lifecycle coordinator for MeetMesh sessions
//!
//! Participants in one session exchange audio/video directly with each
//! other. A relay carries only negotiation metadata (offers, answers, ICE
//! candidates); this crate decides which peers must be connected and drives
//! each pair's negotiation to completion.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Roster store ──► ManagerHandle ──► PeerConnectionManager │
//! │                                      (one actor task)     │
//! │  SignalingRelay ◄──────── publish ───┐   │ fan-out        │
//! │        │ subscription (one/session)  │   ▼                │
//! │        └─────────────────────────► PeerLink tasks         │
//! │                                      │  (one per peer)    │
//! │                                      ▼                    │
//! │                               PeerTransport (media)       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use meetmesh_core::media::SyntheticCaptureSource;
//! use meetmesh_core::signaling::LocalRelay;
//! use meetmesh_core::transport::mock::MockTransportFactory;
//! use meetmesh_core::{LocalParticipant, MeshConfig, ParticipantRef, PeerConnectionManager};
//! use std::sync::Arc;
//!
//! # async fn example() -> meetmesh_core::Result<()> {
//! let relay = LocalRelay::default();
//! let (manager, mut events) = PeerConnectionManager::spawn(
//!     MeshConfig::default(),
//!     LocalParticipant::new("session-1", "part-b", "user-b", "Bea"),
//!     &relay,
//!     Arc::new(MockTransportFactory::new()),
//!     Arc::new(SyntheticCaptureSource::new()),
//! )
//! .await?;
//!
//! // The first snapshot is the join baseline: we initiate toward "part-a"
//! manager
//!     .roster_snapshot(vec![
//!         ParticipantRef::new("part-a", "user-a", "Ada"),
//!         ParticipantRef::new("part-b", "user-b", "Bea"),
//!     ])
//!     .await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{}", event.name());
//! }
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod peer;
pub mod roster;
pub mod signaling;
pub mod transport;

pub use config::{MeshConfig, TurnServer};
pub use error::{Error, Result};
pub use events::MeshEvent;
pub use media::{MediaCaptureSource, MediaStream, MediaTrack, TrackKind, TrackSource};
pub use peer::{
    LinkRole, LinkState, LinkSummary, LocalParticipant, ManagerHandle, PeerConnectionManager,
};
pub use roster::{ParticipantRef, RosterUpdate};
pub use signaling::{SignalingMessage, SignalingRelay};
pub use transport::{PeerTransport, PeerTransportFactory};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
