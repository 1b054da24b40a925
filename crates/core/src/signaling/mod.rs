//! Signaling messages and relays
//!
//! - [`SignalingMessage`]: offer / answer / ice-candidate envelopes
//! - [`SignalingRelay`]: session-scoped pub/sub abstraction
//! - [`LocalRelay`]: in-process relay
//! - `WebSocketRelay`: client for the relay server (`ws-relay` feature)

pub mod frame;
pub mod local;
pub mod message;
pub mod relay;

#[cfg(feature = "ws-relay")]
pub mod websocket;

pub use frame::RelayFrame;
pub use local::LocalRelay;
pub use message::{SignalEnvelope, SignalingMessage};
pub use relay::{RelayPublisher, RelaySubscription, SignalingRelay};

#[cfg(feature = "ws-relay")]
pub use websocket::WebSocketRelay;
