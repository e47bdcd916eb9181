//! Scripted doubles for the engine seam and media acquisition.
//!
//! Used by this crate's state-machine tests and by the orchestration
//! layer's integration tests; no real network or devices involved.

use crate::config::SessionConfig;
use crate::connection::{LinkConnState, LinkEvent, PeerConnector, PeerLink};
use crate::error::PeerError;
use crate::media::{LocalStream, LocalTrack, MediaSource, TrackKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use webcall_signal_core::{CallType, IceCandidatePayload};

/// Media source that either grants a fake stream or denies permission.
#[derive(Debug, Clone)]
pub struct MockMedia {
    deny: bool,
}

impl MockMedia {
    /// Grants audio (and video for video calls).
    pub fn granting() -> Self {
        Self { deny: false }
    }

    /// Simulates a denied permission prompt.
    pub fn denying() -> Self {
        Self { deny: true }
    }
}

#[async_trait]
impl MediaSource for MockMedia {
    async fn acquire(&self, call_type: CallType) -> Result<LocalStream, PeerError> {
        if self.deny {
            return Err(PeerError::MediaAcquisition("permission denied".into()));
        }
        let mut tracks = vec![LocalTrack::new(TrackKind::Audio)];
        if call_type.has_video() {
            tracks.push(LocalTrack::new(TrackKind::Video));
        }
        Ok(LocalStream::new(tracks))
    }
}

/// Observable state of one mock link.
#[derive(Debug, Clone, Default)]
pub struct MockLinkState {
    pub remote_description: Option<String>,
    pub local_tracks: Vec<TrackKind>,
    pub applied_candidates: Vec<IceCandidatePayload>,
    pub offers_created: u32,
    pub answers_created: u32,
    pub ice_restarts: u32,
    pub closed: bool,
}

/// Test-side handle to a link produced by [`MockConnector`]; drives engine
/// events and inspects what the session did to the link.
#[derive(Clone)]
pub struct MockLinkHandle {
    events: mpsc::UnboundedSender<LinkEvent>,
    state: Arc<Mutex<MockLinkState>>,
}

impl MockLinkHandle {
    /// Deliver a remote media track to the session.
    pub fn push_remote_track(&self, kind: TrackKind) {
        let _ = self.events.send(LinkEvent::RemoteTrack(kind));
    }

    /// Deliver a connection state change to the session.
    pub fn push_state(&self, state: LinkConnState) {
        let _ = self.events.send(LinkEvent::StateChanged(state));
    }

    /// Deliver a locally gathered candidate to the session.
    pub fn push_local_candidate(&self, candidate: IceCandidatePayload) {
        let _ = self.events.send(LinkEvent::LocalCandidate(candidate));
    }

    /// Snapshot of the link's recorded state.
    pub fn state(&self) -> MockLinkState {
        self.state.lock().clone()
    }
}

struct MockLink {
    events: Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
    state: Arc<Mutex<MockLinkState>>,
}

#[async_trait]
impl PeerLink for MockLink {
    async fn add_local_track(&self, track: &LocalTrack) -> Result<(), PeerError> {
        self.state.lock().local_tracks.push(track.kind());
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<String, PeerError> {
        let mut state = self.state.lock();
        state.offers_created += 1;
        if ice_restart {
            state.ice_restarts += 1;
        }
        Ok(format!("mock-offer-{}", state.offers_created))
    }

    async fn create_answer(&self) -> Result<String, PeerError> {
        let mut state = self.state.lock();
        state.answers_created += 1;
        Ok(format!("mock-answer-{}", state.answers_created))
    }

    async fn set_remote_offer(&self, sdp: &str) -> Result<(), PeerError> {
        self.state.lock().remote_description = Some(sdp.to_string());
        Ok(())
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<(), PeerError> {
        self.state.lock().remote_description = Some(sdp.to_string());
        Ok(())
    }

    async fn add_remote_candidate(
        &self,
        candidate: IceCandidatePayload,
    ) -> Result<(), PeerError> {
        let mut state = self.state.lock();
        // Same refusal the real engine gives before negotiation completes.
        if state.remote_description.is_none() {
            return Err(PeerError::Engine("no remote description".into()));
        }
        state.applied_candidates.push(candidate);
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<LinkEvent>> {
        self.events.lock().take()
    }

    async fn close(&self) {
        self.state.lock().closed = true;
    }
}

/// Connector producing scripted links; keeps a handle to every link it made.
#[derive(Clone, Default)]
pub struct MockConnector {
    links: Arc<Mutex<Vec<MockLinkHandle>>>,
    fail_connect: bool,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose `connect` always fails.
    pub fn failing() -> Self {
        Self {
            fail_connect: true,
            ..Self::default()
        }
    }

    /// Handles to every link created so far, oldest first.
    pub fn links(&self) -> Vec<MockLinkHandle> {
        self.links.lock().clone()
    }

    /// Handle to the most recently created link.
    pub fn last_link(&self) -> Option<MockLinkHandle> {
        self.links.lock().last().cloned()
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn connect(&self, _config: &SessionConfig) -> Result<Box<dyn PeerLink>, PeerError> {
        if self.fail_connect {
            return Err(PeerError::Engine("connector offline".into()));
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(MockLinkState::default()));
        self.links.lock().push(MockLinkHandle {
            events: events_tx,
            state: state.clone(),
        });
        Ok(Box::new(MockLink {
            events: Mutex::new(Some(events_rx)),
            state,
        }))
    }
}
