//! PeerLinks and the manager that owns them
//!
//! - [`PeerConnectionManager`]: per-participant actor, spawned with
//!   [`PeerConnectionManager::spawn`] and driven through a [`ManagerHandle`]
//! - `PeerLink`: offer/answer/candidate state machine for one remote participant
//! - [`LinkState`] / [`LinkRole`]: negotiation states and sides

mod driver;
mod link;
pub mod manager;
pub mod state;

pub use manager::{LinkSummary, LocalParticipant, ManagerHandle, PeerConnectionManager};
pub use state::{LinkRole, LinkState};
