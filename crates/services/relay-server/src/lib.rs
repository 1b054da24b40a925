//! WebSocket signaling relay for MeetMesh
//!
//! Clients join a session channel and broadcast offers, answers and ICE
//! candidates to everyone else in it. Addressing is left to the clients:
//! each participant filters broadcasts by user and participant id.

#![warn(clippy::all)]

pub mod handler;
pub mod server;

pub use handler::{handle_connection, SharedState};
pub use server::{RelayServer, DEFAULT_MAX_SESSIONS};
