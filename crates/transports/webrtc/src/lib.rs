//! WebRTC peer transport for MeetMesh
//!
//! Implements [`meetmesh_core::PeerTransport`] on top of webrtc-rs, so a
//! [`PeerConnectionManager`](meetmesh_core::PeerConnectionManager) can drive
//! real peer connections: SDP offer/answer, trickle ICE, Opus/VP8 senders
//! with in-place track replacement, and offer rollback on collisions.
//!
//! # Example
//!
//! ```no_run
//! use meetmesh_core::media::SyntheticCaptureSource;
//! use meetmesh_core::signaling::LocalRelay;
//! use meetmesh_core::{LocalParticipant, MeshConfig, PeerConnectionManager};
//! use meetmesh_webrtc::WebRtcTransportFactory;
//! use std::sync::Arc;
//!
//! # async fn example() -> meetmesh_core::Result<()> {
//! let config = MeshConfig::default();
//! let relay = LocalRelay::default();
//! let (manager, _events) = PeerConnectionManager::spawn(
//!     config.clone(),
//!     LocalParticipant::new("session-1", "part-a", "user-a", "Ada"),
//!     &relay,
//!     Arc::new(WebRtcTransportFactory::new(&config)?),
//!     Arc::new(SyntheticCaptureSource::new()),
//! )
//! .await?;
//! # manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod connection;
pub mod ice;
pub mod tracks;

pub use connection::{WebRtcPeerTransport, WebRtcTransportFactory};
pub use ice::ApiOptions;
