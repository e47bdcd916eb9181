//! Adapter seam over the peer connection engine.
//!
//! The session state machine talks to [`PeerLink`] only; the webrtc-rs
//! backend lives in [`crate::rtc`] and scripted doubles in
//! [`crate::testing`].

use crate::config::SessionConfig;
use crate::error::PeerError;
use crate::media::{LocalTrack, TrackKind};
use async_trait::async_trait;
use tokio::sync::mpsc;
use webcall_signal_core::IceCandidatePayload;

/// Connection state reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkConnState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous notifications from a live link.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A locally gathered ICE candidate, ready to be signaled.
    LocalCandidate(IceCandidatePayload),
    /// A remote media track arrived.
    RemoteTrack(TrackKind),
    /// The ICE/connection state changed.
    StateChanged(LinkConnState),
}

/// One live peer connection.
///
/// Exactly one link exists per session; an ICE restart renegotiates over the
/// same link rather than replacing it mid-session.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Register a local track with the connection.
    async fn add_local_track(&self, track: &LocalTrack) -> Result<(), PeerError>;

    /// Create an SDP offer and set it as the local description.
    async fn create_offer(&self, ice_restart: bool) -> Result<String, PeerError>;

    /// Create an SDP answer and set it as the local description.
    async fn create_answer(&self) -> Result<String, PeerError>;

    /// Apply a remote offer.
    async fn set_remote_offer(&self, sdp: &str) -> Result<(), PeerError>;

    /// Apply a remote answer.
    async fn set_remote_answer(&self, sdp: &str) -> Result<(), PeerError>;

    /// Apply a remote ICE candidate. Fails while no remote description is
    /// set; the session queues candidates until then.
    async fn add_remote_candidate(&self, candidate: IceCandidatePayload)
        -> Result<(), PeerError>;

    /// Take the link's event stream. Yields `Some` exactly once.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<LinkEvent>>;

    /// Close the connection. Idempotent.
    async fn close(&self);
}

/// Factory for links, injected into each session.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, config: &SessionConfig) -> Result<Box<dyn PeerLink>, PeerError>;
}
