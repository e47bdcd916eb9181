//! Session configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One STUN/TURN server entry in the ICE pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Plain STUN server.
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// TURN server with long-term credentials.
    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

/// Per-session tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// ICE server pool handed to each new peer connection.
    pub ice_servers: Vec<IceServer>,
    /// When `false`, offers and answers are held back until candidate
    /// gathering completes (bounded by `ice_gather_timeout`).
    pub trickle_ice: bool,
    /// Hard stop for the candidate-gathering wait. Empirical constant;
    /// tune per deployment rather than relying on the default.
    pub ice_gather_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::stun("stun:stun.l.google.com:19302")],
            trickle_ice: true,
            ice_gather_timeout: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    pub fn with_ice_server(mut self, server: IceServer) -> Self {
        self.ice_servers.push(server);
        self
    }

    pub fn with_trickle_ice(mut self, trickle: bool) -> Self {
        self.trickle_ice = trickle;
        self
    }

    pub fn with_ice_gather_timeout(mut self, timeout: Duration) -> Self {
        self.ice_gather_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_a_stun_pool_and_trickle_enabled() {
        let config = SessionConfig::default();
        assert!(!config.ice_servers.is_empty());
        assert!(config.trickle_ice);
    }

    #[test]
    fn builder_overrides_apply() {
        let config = SessionConfig::default()
            .with_ice_server(IceServer::turn("turn:turn.example.com", "user", "pass"))
            .with_ice_gather_timeout(Duration::from_secs(8));
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_gather_timeout, Duration::from_secs(8));
        assert_eq!(config.ice_servers[1].username.as_deref(), Some("user"));
    }
}
