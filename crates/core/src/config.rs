//! Mesh configuration
//!
//! ICE server lists, peer limits and the timing knobs of the connection
//! lifecycle. Loadable from TOML; every field has a default.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default public STUN servers
pub const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// TURN relay server credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN URL (`turn:` or `turns:`)
    pub url: String,
    /// Username for long-term credentials
    pub username: String,
    /// Credential for long-term credentials
    pub credential: String,
}

/// Configuration for a [`PeerConnectionManager`](crate::peer::PeerConnectionManager)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN servers
    pub turn_servers: Vec<TurnServer>,

    /// Maximum simultaneous PeerLinks
    pub max_peers: u32,

    /// How long a PeerLink may take to reach Connected before it is torn
    /// down and reported as unreachable
    pub connect_timeout_ms: u64,

    /// Capacity of the manager command queue
    pub command_buffer: usize,

    /// How long shutdown waits for links to close their transports
    pub shutdown_timeout_ms: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            turn_servers: Vec::new(),
            max_peers: 16,
            connect_timeout_ms: 30_000,
            command_buffer: 256,
            shutdown_timeout_ms: 3_000,
        }
    }
}

impl MeshConfig {
    /// Parse a configuration from TOML. Missing fields take their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| Error::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::ConfigError(format!(
                    "Invalid STUN server URL '{}': must start with stun: or stuns:",
                    url
                )));
            }
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::ConfigError(format!(
                    "Invalid TURN server URL '{}': must start with turn: or turns:",
                    turn.url
                )));
            }
            if turn.username.is_empty() {
                return Err(Error::ConfigError(format!(
                    "TURN server '{}' requires a username",
                    turn.url
                )));
            }
        }

        if self.max_peers == 0 {
            return Err(Error::ConfigError("max_peers must be > 0".to_string()));
        }

        if self.connect_timeout_ms == 0 {
            return Err(Error::ConfigError(
                "connect_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.command_buffer == 0 {
            return Err(Error::ConfigError("command_buffer must be > 0".to_string()));
        }

        Ok(())
    }

    /// Connect timeout as a [`Duration`]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Shutdown grace period as a [`Duration`]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
