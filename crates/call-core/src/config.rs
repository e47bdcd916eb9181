//! Orchestrator configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use webcall_peer_core::{IceServer, SessionConfig};
use webcall_signal_core::CallType;

/// Tuning knobs for the orchestration layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// Per-session peer connection settings.
    pub session: SessionConfig,
    /// Call type used when the caller does not specify one.
    pub default_call_type: CallType,
    /// How long an active call survives a signaling disconnect before it is
    /// ended.
    pub signaling_grace: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            default_call_type: CallType::Audio,
            signaling_grace: Duration::from_secs(10),
        }
    }
}

impl CallConfig {
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_ice_server(mut self, server: IceServer) -> Self {
        self.session = self.session.with_ice_server(server);
        self
    }

    pub fn with_default_call_type(mut self, call_type: CallType) -> Self {
        self.default_call_type = call_type;
        self
    }

    pub fn with_signaling_grace(mut self, grace: Duration) -> Self {
        self.signaling_grace = grace;
        self
    }
}
