//! The per-call peer session state machine.
//!
//! One [`PeerSession`] covers one call attempt in one room. It owns the peer
//! link and the local media stream, exchanges SDP and candidates over the
//! injected signaling transport, and publishes status and remote-stream
//! changes through watch channels so observers never poll.

use crate::config::SessionConfig;
use crate::connection::{LinkConnState, LinkEvent, PeerConnector, PeerLink};
use crate::error::PeerError;
use crate::media::{LocalStream, MediaSource, RemoteStream, TrackKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use webcall_signal_core::{
    CallType, IceCandidatePayload, RoomId, SignalEvent, SignalingTransport,
};

/// Which side of the call this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Caller,
    Receiver,
}

/// Lifecycle of one call attempt. `Ended` is terminal; a new attempt gets a
/// new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Idle,
    Connecting,
    RingingOutgoing,
    RingingIncoming,
    Connected,
    Ended,
}

impl CallStatus {
    pub fn is_ringing(&self) -> bool {
        matches!(self, CallStatus::RingingOutgoing | CallStatus::RingingIncoming)
    }

    /// True while the attempt is live in any form.
    pub fn in_call(&self) -> bool {
        matches!(
            self,
            CallStatus::Connecting
                | CallStatus::RingingOutgoing
                | CallStatus::RingingIncoming
                | CallStatus::Connected
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Ended)
    }
}

#[derive(Default)]
struct SessionInner {
    link: Option<Box<dyn PeerLink>>,
    local: Option<LocalStream>,
    /// Candidates that arrived before the remote description; replayed in
    /// arrival order once it is set.
    pending_candidates: Vec<IceCandidatePayload>,
    remote_desc_set: bool,
    ice_restarted: bool,
    ended: bool,
    pump: Option<JoinHandle<()>>,
}

/// State machine for one call attempt.
pub struct PeerSession {
    room: RoomId,
    role: Role,
    call_type: CallType,
    transport: Arc<dyn SignalingTransport>,
    connector: Arc<dyn PeerConnector>,
    media: Arc<dyn MediaSource>,
    config: SessionConfig,
    inner: Arc<Mutex<SessionInner>>,
    status: Arc<watch::Sender<CallStatus>>,
    remote: Arc<watch::Sender<Option<RemoteStream>>>,
}

impl PeerSession {
    pub fn new(
        room: RoomId,
        role: Role,
        call_type: CallType,
        transport: Arc<dyn SignalingTransport>,
        connector: Arc<dyn PeerConnector>,
        media: Arc<dyn MediaSource>,
        config: SessionConfig,
    ) -> Self {
        let (status, _) = watch::channel(CallStatus::Idle);
        let (remote, _) = watch::channel(None);
        Self {
            room,
            role,
            call_type,
            transport,
            connector,
            media,
            config,
            inner: Arc::new(Mutex::new(SessionInner::default())),
            status: Arc::new(status),
            remote: Arc::new(remote),
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    /// Watch the call status. The receiver sees every transition.
    pub fn status(&self) -> watch::Receiver<CallStatus> {
        self.status.subscribe()
    }

    pub fn current_status(&self) -> CallStatus {
        *self.status.borrow()
    }

    /// Watch the remote stream. `None` until the first remote track, and
    /// again after teardown.
    pub fn remote_stream(&self) -> watch::Receiver<Option<RemoteStream>> {
        self.remote.subscribe()
    }

    /// Move an idle session into its ringing state, before any media or
    /// link exists.
    pub fn ring(&self) {
        if self.current_status() == CallStatus::Idle {
            let next = match self.role {
                Role::Caller => CallStatus::RingingOutgoing,
                Role::Receiver => CallStatus::RingingIncoming,
            };
            self.set_status(next);
        }
    }

    /// Caller path: acquire media, connect a link, send the offer.
    ///
    /// Invoked once acceptance has been signaled; a second invocation while
    /// the link is live fails with [`PeerError::InvalidState`].
    pub async fn start_call(&self) -> Result<(), PeerError> {
        self.begin_setup("start_call").await?;
        self.setup_media_and_link("start_call").await?;

        let offer = {
            let guard = self.inner.lock().await;
            match guard.link.as_ref() {
                Some(link) => link.create_offer(false).await,
                None => {
                    return Err(PeerError::InvalidState {
                        operation: "start_call",
                        status: CallStatus::Ended,
                    })
                }
            }
        };
        let sdp = match offer {
            Ok(sdp) => sdp,
            Err(e) => {
                self.end_call().await;
                return Err(e);
            }
        };
        if let Err(e) = self
            .transport
            .emit(SignalEvent::Offer {
                room_id: self.room.clone(),
                sdp,
            })
            .await
        {
            self.end_call().await;
            return Err(e.into());
        }
        self.set_status(CallStatus::RingingOutgoing);
        Ok(())
    }

    /// Receiver path: acquire media, connect a link, apply the caller's
    /// offer and send back an answer. Queued candidates are flushed as soon
    /// as the offer is applied.
    pub async fn accept_call(&self, offer_sdp: &str) -> Result<(), PeerError> {
        if offer_sdp.trim().is_empty() {
            return Err(PeerError::InvalidOffer("empty offer".into()));
        }
        self.begin_setup("accept_call").await?;
        self.setup_media_and_link("accept_call").await?;

        let answer = {
            let mut guard = self.inner.lock().await;
            let SessionInner {
                link,
                pending_candidates,
                remote_desc_set,
                ..
            } = &mut *guard;
            match link.as_ref() {
                None => Err(PeerError::InvalidState {
                    operation: "accept_call",
                    status: CallStatus::Ended,
                }),
                Some(link) => match link.set_remote_offer(offer_sdp).await {
                    Err(e) => Err(e),
                    Ok(()) => {
                        *remote_desc_set = true;
                        flush_pending(link.as_ref(), pending_candidates, &self.room).await;
                        link.create_answer().await
                    }
                },
            }
        };
        let sdp = match answer {
            Ok(sdp) => sdp,
            Err(e) => {
                self.end_call().await;
                return Err(e);
            }
        };
        if let Err(e) = self
            .transport
            .emit(SignalEvent::Answer {
                room_id: self.room.clone(),
                sdp,
            })
            .await
        {
            self.end_call().await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Apply a renegotiation offer over the live link (the remote side's
    /// ICE restart) and send back an answer.
    pub async fn handle_renegotiation(&self, offer_sdp: &str) -> Result<(), PeerError> {
        if offer_sdp.trim().is_empty() {
            return Err(PeerError::InvalidOffer("empty offer".into()));
        }
        let answer = {
            let mut guard = self.inner.lock().await;
            if guard.ended {
                return Err(PeerError::InvalidState {
                    operation: "handle_renegotiation",
                    status: CallStatus::Ended,
                });
            }
            let SessionInner {
                link,
                pending_candidates,
                remote_desc_set,
                ..
            } = &mut *guard;
            let Some(link) = link.as_ref() else {
                return Err(PeerError::InvalidState {
                    operation: "handle_renegotiation",
                    status: self.current_status(),
                });
            };
            link.set_remote_offer(offer_sdp).await?;
            *remote_desc_set = true;
            flush_pending(link.as_ref(), pending_candidates, &self.room).await;
            link.create_answer().await?
        };
        self.transport
            .emit(SignalEvent::Answer {
                room_id: self.room.clone(),
                sdp: answer,
            })
            .await?;
        Ok(())
    }

    /// Caller path: apply the receiver's answer and flush queued candidates.
    pub async fn handle_answer(&self, sdp: &str) -> Result<(), PeerError> {
        if sdp.trim().is_empty() {
            return Err(PeerError::InvalidAnswer("empty answer".into()));
        }
        let mut guard = self.inner.lock().await;
        if guard.ended {
            return Err(PeerError::InvalidState {
                operation: "handle_answer",
                status: CallStatus::Ended,
            });
        }
        let SessionInner {
            link,
            pending_candidates,
            remote_desc_set,
            ..
        } = &mut *guard;
        let Some(link) = link.as_ref() else {
            return Err(PeerError::InvalidState {
                operation: "handle_answer",
                status: self.current_status(),
            });
        };
        link.set_remote_answer(sdp).await?;
        *remote_desc_set = true;
        flush_pending(link.as_ref(), pending_candidates, &self.room).await;
        Ok(())
    }

    /// Feed a remote candidate into the link, queueing it until the remote
    /// description is set. Candidates for other rooms are dropped.
    pub async fn handle_remote_candidate(&self, room: &RoomId, candidate: IceCandidatePayload) {
        if room != &self.room {
            tracing::debug!(
                room_id = %room,
                own_room = %self.room,
                "dropping candidate addressed to another room"
            );
            return;
        }
        let mut guard = self.inner.lock().await;
        if guard.ended {
            return;
        }
        if !guard.remote_desc_set || guard.link.is_none() {
            guard.pending_candidates.push(candidate);
            return;
        }
        if let Some(link) = guard.link.as_ref() {
            if let Err(e) = link.add_remote_candidate(candidate).await {
                // One bad candidate must not end the call.
                tracing::warn!(room_id = %self.room, error = %e, "remote candidate rejected");
            }
        }
    }

    /// Local hang-up. Stops media, closes the link, notifies the remote
    /// side exactly once, and marks the session ended. Safe to call in any
    /// state, any number of times.
    pub async fn end_call(&self) {
        if let Some(pump) = teardown(
            &self.inner,
            &self.status,
            &self.remote,
            self.transport.as_ref(),
            &self.room,
            true,
        )
        .await
        {
            pump.abort();
        }
    }

    /// The remote side hung up or rejected; tear down without echoing a
    /// `call:end` back.
    pub async fn handle_remote_end(&self) {
        if let Some(pump) = teardown(
            &self.inner,
            &self.status,
            &self.remote,
            self.transport.as_ref(),
            &self.room,
            false,
        )
        .await
        {
            pump.abort();
        }
    }

    /// Flip the microphone; returns the new muted state. `false` when no
    /// audio track exists yet.
    pub async fn toggle_audio(&self) -> bool {
        self.toggle_track(TrackKind::Audio).await
    }

    /// Flip the camera; returns the new camera-off state.
    pub async fn toggle_video(&self) -> bool {
        self.toggle_track(TrackKind::Video).await
    }

    async fn toggle_track(&self, kind: TrackKind) -> bool {
        let guard = self.inner.lock().await;
        match guard.local.as_ref() {
            Some(stream) => {
                let disabled = stream.toggle(kind);
                tracing::debug!(room_id = %self.room, track = %kind, disabled, "track toggled");
                disabled
            }
            None => false,
        }
    }

    /// Shared preamble for `start_call` / `accept_call`: refuse reentry,
    /// then move into `Connecting`.
    async fn begin_setup(&self, operation: &'static str) -> Result<(), PeerError> {
        let guard = self.inner.lock().await;
        if guard.ended || guard.link.is_some() {
            return Err(PeerError::InvalidState {
                operation,
                status: self.current_status(),
            });
        }
        drop(guard);
        self.set_status(CallStatus::Connecting);
        Ok(())
    }

    /// Acquire local media and a peer link, register tracks, start the event
    /// pump. The session lock is not held across the awaits so a concurrent
    /// hang-up stays responsive; the `ended` flag is re-checked before the
    /// results are installed.
    async fn setup_media_and_link(&self, operation: &'static str) -> Result<(), PeerError> {
        let local = match self.media.acquire(self.call_type).await {
            Ok(local) => local,
            Err(e) => {
                tracing::warn!(room_id = %self.room, error = %e, "media acquisition failed");
                self.revert_to_idle().await;
                return Err(e);
            }
        };
        let link = match self.connector.connect(&self.config).await {
            Ok(link) => link,
            Err(e) => {
                local.stop_all();
                self.revert_to_idle().await;
                return Err(e);
            }
        };
        for track in local.tracks() {
            if let Err(e) = link.add_local_track(track).await {
                local.stop_all();
                link.close().await;
                self.revert_to_idle().await;
                return Err(e);
            }
        }
        let Some(events) = link.take_events() else {
            local.stop_all();
            link.close().await;
            self.revert_to_idle().await;
            return Err(PeerError::Engine("link event stream already taken".into()));
        };

        let mut guard = self.inner.lock().await;
        if guard.ended {
            // Hang-up raced the setup; release what was acquired.
            drop(guard);
            local.stop_all();
            link.close().await;
            return Err(PeerError::InvalidState {
                operation,
                status: CallStatus::Ended,
            });
        }
        guard.local = Some(local);
        guard.link = Some(link);
        guard.pump = Some(self.spawn_pump(events));
        Ok(())
    }

    async fn revert_to_idle(&self) {
        let guard = self.inner.lock().await;
        if !guard.ended {
            drop(guard);
            self.set_status(CallStatus::Idle);
        }
    }

    fn set_status(&self, next: CallStatus) {
        let prev = *self.status.borrow();
        if prev == next || prev == CallStatus::Ended {
            return;
        }
        tracing::debug!(
            room_id = %self.room,
            from = ?prev,
            to = ?next,
            "call status transition"
        );
        let _ = self.status.send(next);
    }

    /// Drive engine events for the lifetime of the link.
    fn spawn_pump(&self, mut events: mpsc::UnboundedReceiver<LinkEvent>) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let status = self.status.clone();
        let remote = self.remote.clone();
        let transport = self.transport.clone();
        let room = self.room.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    LinkEvent::LocalCandidate(candidate) => {
                        // Trickle ICE: forward in gathering order.
                        if let Err(e) = transport
                            .emit(SignalEvent::IceCandidate {
                                room_id: room.clone(),
                                candidate,
                            })
                            .await
                        {
                            tracing::warn!(room_id = %room, error = %e, "candidate emit failed");
                        }
                    }
                    LinkEvent::RemoteTrack(kind) => {
                        remote.send_modify(|stream| {
                            stream.get_or_insert_with(RemoteStream::default).add_track(kind);
                        });
                        maybe_connected(&status, &room);
                    }
                    LinkEvent::StateChanged(LinkConnState::Connected) => {
                        maybe_connected(&status, &room);
                    }
                    LinkEvent::StateChanged(LinkConnState::Disconnected) => {
                        // Transient; the engine keeps probing and either
                        // recovers or reports Failed.
                        tracing::warn!(room_id = %room, "peer link disconnected");
                    }
                    LinkEvent::StateChanged(LinkConnState::Failed) => {
                        let first_failure = {
                            let mut guard = inner.lock().await;
                            if guard.ended {
                                break;
                            }
                            !std::mem::replace(&mut guard.ice_restarted, true)
                        };
                        if !first_failure {
                            tracing::warn!(
                                room_id = %room,
                                "ice failed again after restart, ending call"
                            );
                            teardown(&inner, &status, &remote, transport.as_ref(), &room, true)
                                .await;
                            break;
                        }
                        tracing::warn!(room_id = %room, "ice failed, attempting one restart");
                        let offer = {
                            let guard = inner.lock().await;
                            match guard.link.as_ref() {
                                Some(link) => link.create_offer(true).await,
                                None => break,
                            }
                        };
                        match offer {
                            Ok(sdp) => {
                                if let Err(e) = transport
                                    .emit(SignalEvent::Offer {
                                        room_id: room.clone(),
                                        sdp,
                                    })
                                    .await
                                {
                                    tracing::warn!(
                                        room_id = %room,
                                        error = %e,
                                        "restart offer emit failed"
                                    );
                                }
                            }
                            Err(e) => {
                                tracing::warn!(
                                    room_id = %room,
                                    error = %e,
                                    "ice restart failed, ending call"
                                );
                                teardown(
                                    &inner,
                                    &status,
                                    &remote,
                                    transport.as_ref(),
                                    &room,
                                    true,
                                )
                                .await;
                                break;
                            }
                        }
                    }
                    LinkEvent::StateChanged(_) => {}
                }
            }
        })
    }
}

/// Replay queued candidates in arrival order. Rejections are logged and
/// skipped.
async fn flush_pending(
    link: &dyn PeerLink,
    pending: &mut Vec<IceCandidatePayload>,
    room: &RoomId,
) {
    for candidate in pending.drain(..) {
        if let Err(e) = link.add_remote_candidate(candidate).await {
            tracing::warn!(room_id = %room, error = %e, "queued candidate rejected");
        }
    }
}

/// Connected is reachable only from a live, not-yet-connected attempt;
/// late engine events after teardown are ignored.
fn maybe_connected(status: &watch::Sender<CallStatus>, room: &RoomId) {
    let current = *status.borrow();
    if matches!(
        current,
        CallStatus::Connecting | CallStatus::RingingOutgoing | CallStatus::RingingIncoming
    ) {
        tracing::info!(room_id = %room, "call connected");
        let _ = status.send(CallStatus::Connected);
    }
}

/// Tear the session down exactly once.
///
/// Returns the pump handle so callers outside the pump can abort it; the
/// pump itself lets the handle drop and exits its loop instead.
async fn teardown(
    inner: &Mutex<SessionInner>,
    status: &watch::Sender<CallStatus>,
    remote: &watch::Sender<Option<RemoteStream>>,
    transport: &dyn SignalingTransport,
    room: &RoomId,
    notify_remote: bool,
) -> Option<JoinHandle<()>> {
    let (link, local, pump) = {
        let mut guard = inner.lock().await;
        if guard.ended {
            return None;
        }
        guard.ended = true;
        guard.pending_candidates.clear();
        (guard.link.take(), guard.local.take(), guard.pump.take())
    };
    if let Some(local) = local {
        local.stop_all();
    }
    if let Some(link) = link {
        link.close().await;
    }
    if notify_remote {
        if let Err(e) = transport
            .emit(SignalEvent::CallEnd {
                room_id: room.clone(),
            })
            .await
        {
            tracing::warn!(room_id = %room, error = %e, "call:end emit failed");
        }
    }
    let _ = remote.send(None);
    if *status.borrow() != CallStatus::Ended {
        tracing::debug!(room_id = %room, "call ended");
        let _ = status.send(CallStatus::Ended);
    }
    pump
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::LocalTrack;
    use crate::testing::{MockConnector, MockLinkHandle, MockMedia};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::time::timeout;
    use webcall_signal_core::{MemoryHub, MemoryTransport};

    /// Media source that keeps clones of every track it hands out, so tests
    /// can observe their stop flags after teardown.
    struct RetainingMedia {
        tracks: Arc<parking_lot::Mutex<Vec<LocalTrack>>>,
    }

    #[async_trait]
    impl MediaSource for RetainingMedia {
        async fn acquire(&self, call_type: CallType) -> Result<LocalStream, PeerError> {
            let mut tracks = vec![LocalTrack::new(TrackKind::Audio)];
            if call_type.has_video() {
                tracks.push(LocalTrack::new(TrackKind::Video));
            }
            self.tracks.lock().extend(tracks.iter().cloned());
            Ok(LocalStream::new(tracks))
        }
    }

    struct Rig {
        _hub: MemoryHub,
        transport: MemoryTransport,
        connector: MockConnector,
        session: PeerSession,
    }

    fn rig(role: Role, media: MockMedia, connector: MockConnector) -> Rig {
        let hub = MemoryHub::new();
        let transport = hub.endpoint("local");
        let _remote = hub.endpoint("remote");
        let session = PeerSession::new(
            RoomId::new("R1"),
            role,
            CallType::Video,
            Arc::new(transport.clone()),
            Arc::new(connector.clone()),
            Arc::new(media),
            SessionConfig::default(),
        );
        Rig {
            _hub: hub,
            transport,
            connector,
            session,
        }
    }

    fn caller_rig() -> Rig {
        rig(Role::Caller, MockMedia::granting(), MockConnector::new())
    }

    fn candidate(line: &str) -> IceCandidatePayload {
        IceCandidatePayload {
            candidate: line.to_string(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }

    async fn wait_status(rx: &mut watch::Receiver<CallStatus>, want: CallStatus) {
        timeout(Duration::from_secs(1), rx.wait_for(|s| *s == want))
            .await
            .expect("timed out waiting for status")
            .expect("status channel closed");
    }

    async fn eventually(check: impl Fn() -> bool) {
        timeout(Duration::from_secs(1), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition never became true");
    }

    fn link(rig: &Rig) -> MockLinkHandle {
        rig.connector.last_link().expect("no link created")
    }

    #[tokio::test]
    async fn start_call_sends_offer_with_local_tracks_and_rings() {
        let rig = caller_rig();
        rig.session.start_call().await.unwrap();

        assert_eq!(rig.session.current_status(), CallStatus::RingingOutgoing);
        let state = link(&rig).state();
        assert_eq!(state.offers_created, 1);
        assert_eq!(state.local_tracks, vec![TrackKind::Audio, TrackKind::Video]);

        let log = rig.transport.sent_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].event_name(), "offer");
    }

    #[tokio::test]
    async fn second_start_call_is_refused_while_link_is_live() {
        let rig = caller_rig();
        rig.session.start_call().await.unwrap();

        let err = rig.session.start_call().await.unwrap_err();
        assert!(matches!(
            err,
            PeerError::InvalidState {
                operation: "start_call",
                ..
            }
        ));
        assert_eq!(rig.connector.links().len(), 1);
    }

    #[tokio::test]
    async fn denied_media_reverts_to_idle_without_creating_a_link() {
        let rig = rig(Role::Caller, MockMedia::denying(), MockConnector::new());
        let err = rig.session.start_call().await.unwrap_err();

        assert!(matches!(err, PeerError::MediaAcquisition(_)));
        assert_eq!(rig.session.current_status(), CallStatus::Idle);
        assert!(rig.connector.links().is_empty());
        assert!(rig.transport.sent_log().is_empty());
    }

    #[tokio::test]
    async fn connector_failure_reverts_to_idle() {
        let rig = rig(Role::Caller, MockMedia::granting(), MockConnector::failing());
        let err = rig.session.start_call().await.unwrap_err();

        assert!(matches!(err, PeerError::Engine(_)));
        assert_eq!(rig.session.current_status(), CallStatus::Idle);
    }

    #[tokio::test]
    async fn early_candidates_are_queued_then_applied_in_order() {
        let rig = caller_rig();
        rig.session.start_call().await.unwrap();

        let room = RoomId::new("R1");
        rig.session
            .handle_remote_candidate(&room, candidate("candidate:1"))
            .await;
        rig.session
            .handle_remote_candidate(&room, candidate("candidate:2"))
            .await;
        assert!(link(&rig).state().applied_candidates.is_empty());

        rig.session.handle_answer("v=0 answer").await.unwrap();
        let applied = link(&rig).state().applied_candidates;
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].candidate, "candidate:1");
        assert_eq!(applied[1].candidate, "candidate:2");

        // Later candidates go straight through.
        rig.session
            .handle_remote_candidate(&room, candidate("candidate:3"))
            .await;
        assert_eq!(link(&rig).state().applied_candidates.len(), 3);
    }

    #[tokio::test]
    async fn candidate_for_another_room_is_dropped() {
        let rig = caller_rig();
        rig.session.start_call().await.unwrap();

        rig.session
            .handle_remote_candidate(&RoomId::new("R2"), candidate("candidate:evil"))
            .await;
        rig.session.handle_answer("v=0 answer").await.unwrap();
        assert!(link(&rig).state().applied_candidates.is_empty());
    }

    #[tokio::test]
    async fn connects_whether_track_or_state_arrives_first() {
        // State change first.
        let rig = caller_rig();
        rig.session.start_call().await.unwrap();
        rig.session.handle_answer("v=0 answer").await.unwrap();
        let mut status = rig.session.status();
        link(&rig).push_state(LinkConnState::Connected);
        wait_status(&mut status, CallStatus::Connected).await;

        // Remote track first.
        let rig = caller_rig();
        rig.session.start_call().await.unwrap();
        rig.session.handle_answer("v=0 answer").await.unwrap();
        let mut status = rig.session.status();
        link(&rig).push_remote_track(TrackKind::Audio);
        wait_status(&mut status, CallStatus::Connected).await;

        let remote = rig.session.remote_stream();
        assert!(remote.borrow().as_ref().unwrap().has_track(TrackKind::Audio));
    }

    #[tokio::test]
    async fn local_candidates_are_forwarded_as_gathered() {
        let rig = caller_rig();
        rig.session.start_call().await.unwrap();

        link(&rig).push_local_candidate(candidate("candidate:local-1"));
        eventually(|| {
            rig.transport
                .sent_log()
                .iter()
                .any(|e| e.event_name() == "ice-candidate")
        })
        .await;
    }

    #[tokio::test]
    async fn end_call_is_idempotent_and_notifies_exactly_once() {
        let rig = caller_rig();
        rig.session.start_call().await.unwrap();

        rig.session.end_call().await;
        rig.session.end_call().await;

        assert_eq!(rig.session.current_status(), CallStatus::Ended);
        assert!(link(&rig).state().closed);
        let ends = rig
            .transport
            .sent_log()
            .iter()
            .filter(|e| e.event_name() == "call:end")
            .count();
        assert_eq!(ends, 1);
        assert!(rig.session.remote_stream().borrow().is_none());
    }

    #[tokio::test]
    async fn end_call_leaves_zero_live_local_tracks() {
        let hub = MemoryHub::new();
        let transport = hub.endpoint("local");
        let _remote = hub.endpoint("remote");
        let handed_out = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let session = PeerSession::new(
            RoomId::new("R1"),
            Role::Caller,
            CallType::Video,
            Arc::new(transport),
            Arc::new(MockConnector::new()),
            Arc::new(RetainingMedia {
                tracks: handed_out.clone(),
            }),
            SessionConfig::default(),
        );
        session.start_call().await.unwrap();
        assert!(handed_out.lock().iter().all(|t| !t.is_stopped()));

        session.end_call().await;
        session.end_call().await;

        let tracks = handed_out.lock();
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().all(|t| t.is_stopped()));
        assert!(tracks.iter().all(|t| !t.is_enabled()));
    }

    #[tokio::test]
    async fn remote_end_tears_down_without_echoing() {
        let rig = caller_rig();
        rig.session.start_call().await.unwrap();

        rig.session.handle_remote_end().await;
        assert_eq!(rig.session.current_status(), CallStatus::Ended);
        assert!(link(&rig).state().closed);
        assert!(rig
            .transport
            .sent_log()
            .iter()
            .all(|e| e.event_name() != "call:end"));
    }

    #[tokio::test]
    async fn ice_failure_restarts_once_then_second_failure_ends_the_call() {
        let rig = caller_rig();
        rig.session.start_call().await.unwrap();
        rig.session.handle_answer("v=0 answer").await.unwrap();

        let mut status = rig.session.status();
        link(&rig).push_state(LinkConnState::Connected);
        wait_status(&mut status, CallStatus::Connected).await;

        link(&rig).push_state(LinkConnState::Failed);
        eventually(|| link(&rig).state().ice_restarts == 1).await;
        eventually(|| {
            rig.transport
                .sent_log()
                .iter()
                .filter(|e| e.event_name() == "offer")
                .count()
                == 2
        })
        .await;

        link(&rig).push_state(LinkConnState::Failed);
        wait_status(&mut status, CallStatus::Ended).await;
        assert_eq!(link(&rig).state().ice_restarts, 1);
        assert!(rig
            .transport
            .sent_log()
            .iter()
            .any(|e| e.event_name() == "call:end"));
    }

    #[tokio::test]
    async fn accept_call_answers_and_flushes_queued_candidates() {
        let rig = rig(Role::Receiver, MockMedia::granting(), MockConnector::new());
        rig.session.ring();
        assert_eq!(rig.session.current_status(), CallStatus::RingingIncoming);

        let room = RoomId::new("R1");
        rig.session
            .handle_remote_candidate(&room, candidate("candidate:early"))
            .await;

        rig.session.accept_call("v=0 offer").await.unwrap();

        let state = link(&rig).state();
        assert_eq!(state.remote_description.as_deref(), Some("v=0 offer"));
        assert_eq!(state.answers_created, 1);
        assert_eq!(state.applied_candidates.len(), 1);
        assert_eq!(state.applied_candidates[0].candidate, "candidate:early");

        let log = rig.transport.sent_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].event_name(), "answer");
    }

    #[tokio::test]
    async fn renegotiation_offer_over_a_live_link_is_answered() {
        let rig = caller_rig();
        rig.session.start_call().await.unwrap();
        rig.session.handle_answer("v=0 answer").await.unwrap();

        rig.session.handle_renegotiation("v=0 restart offer").await.unwrap();
        let state = link(&rig).state();
        assert_eq!(state.remote_description.as_deref(), Some("v=0 restart offer"));
        assert_eq!(state.answers_created, 1);
        let log = rig.transport.sent_log();
        assert_eq!(log.last().map(|e| e.event_name()), Some("answer"));

        // Without a link the renegotiation is refused.
        let idle = caller_rig();
        let err = idle.session.handle_renegotiation("v=0 x").await.unwrap_err();
        assert!(matches!(err, PeerError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn accept_call_rejects_an_empty_offer() {
        let rig = rig(Role::Receiver, MockMedia::granting(), MockConnector::new());
        let err = rig.session.accept_call("  ").await.unwrap_err();
        assert!(matches!(err, PeerError::InvalidOffer(_)));
        assert!(rig.connector.links().is_empty());
    }

    #[tokio::test]
    async fn toggles_report_the_new_disabled_state() {
        let rig = caller_rig();
        // No media yet.
        assert!(!rig.session.toggle_audio().await);

        rig.session.start_call().await.unwrap();
        assert!(rig.session.toggle_audio().await); // muted
        assert!(!rig.session.toggle_audio().await); // unmuted
        assert!(rig.session.toggle_video().await); // camera off
    }

    #[tokio::test]
    async fn operations_after_end_are_refused() {
        let rig = caller_rig();
        rig.session.start_call().await.unwrap();
        rig.session.end_call().await;

        let err = rig.session.start_call().await.unwrap_err();
        assert!(matches!(err, PeerError::InvalidState { .. }));
        let err = rig.session.handle_answer("v=0 answer").await.unwrap_err();
        assert!(matches!(err, PeerError::InvalidState { .. }));
    }
}
