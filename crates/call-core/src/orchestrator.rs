//! The call orchestrator.
//!
//! Routes signaling events to the active peer session, enforces the
//! caller/receiver setup asymmetry, and owns the cross-cutting pieces a
//! session does not: the duration timer, the busy policy, and the
//! signaling-loss grace period.

use crate::config::CallConfig;
use crate::error::CallError;
use crate::timer::CallTimer;
use crate::tones::RingTone;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use webcall_peer_core::{
    CallStatus, MediaSource, PeerConnector, PeerSession, RemoteStream, Role,
};
use webcall_signal_core::{
    CallType, LinkState, PeerId, RoomId, SignalEvent, SignalingTransport,
};

/// An unanswered incoming call, surfaced to the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingCall {
    pub room: RoomId,
    pub from: PeerId,
    pub call_type: CallType,
}

/// The one call slot. A new attempt replaces a finished session; a live one
/// blocks it.
#[derive(Default)]
struct ActiveSlot {
    session: Option<Arc<PeerSession>>,
    mirror: Option<JoinHandle<()>>,
    /// `accept()` ran before the caller's offer arrived.
    accept_armed: bool,
    /// The caller's offer arrived before `accept()` did.
    pending_offer: Option<String>,
    /// Initial offer/answer exchange has happened; later offers are
    /// renegotiations.
    negotiated: bool,
}

struct Shared {
    self_id: PeerId,
    transport: Arc<dyn SignalingTransport>,
    connector: Arc<dyn PeerConnector>,
    media: Arc<dyn MediaSource>,
    config: CallConfig,
    active: Mutex<ActiveSlot>,
    incoming: watch::Sender<Option<IncomingCall>>,
    status: watch::Sender<CallStatus>,
    at_risk: watch::Sender<bool>,
    timer: CallTimer,
}

/// Drives one call at a time over an injected signaling transport.
pub struct CallOrchestrator {
    shared: Arc<Shared>,
    driver: JoinHandle<()>,
}

impl CallOrchestrator {
    /// Everything injected; the event driver starts immediately and is
    /// subscribed before this returns, so no signaling event can be missed.
    pub fn new(
        self_id: impl Into<PeerId>,
        transport: Arc<dyn SignalingTransport>,
        connector: Arc<dyn PeerConnector>,
        media: Arc<dyn MediaSource>,
        config: CallConfig,
    ) -> Self {
        let events = transport.subscribe();
        let link = transport.link_state();
        let (incoming, _) = watch::channel(None);
        let (status, _) = watch::channel(CallStatus::Idle);
        let (at_risk, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            self_id: self_id.into(),
            transport,
            connector,
            media,
            config,
            active: Mutex::new(ActiveSlot::default()),
            incoming,
            status,
            at_risk,
            timer: CallTimer::new(),
        });
        let driver = tokio::spawn(drive(shared.clone(), events, link));
        Self { shared, driver }
    }

    /// Announce an outgoing call. The offer is not created here; it waits
    /// for the receiver's `call:accepted`.
    pub async fn place_call(
        &self,
        room: RoomId,
        callee: impl Into<PeerId>,
        call_type: CallType,
    ) -> Result<(), CallError> {
        let mut slot = self.shared.active.lock().await;
        if slot
            .session
            .as_ref()
            .is_some_and(|s| s.current_status().in_call())
        {
            return Err(CallError::Busy);
        }
        let session = Arc::new(PeerSession::new(
            room.clone(),
            Role::Caller,
            call_type,
            self.shared.transport.clone(),
            self.shared.connector.clone(),
            self.shared.media.clone(),
            self.shared.config.session.clone(),
        ));
        self.shared
            .transport
            .emit(SignalEvent::CallInit {
                room_id: room.clone(),
                from: self.shared.self_id.clone(),
                receiver_id: callee.into(),
                call_type,
            })
            .await?;
        session.ring();
        install_session(&self.shared, &mut slot, session);
        tracing::info!(room_id = %room, "outgoing call placed");
        Ok(())
    }

    /// Outgoing call with the configured default call type.
    pub async fn place_default_call(
        &self,
        room: RoomId,
        callee: impl Into<PeerId>,
    ) -> Result<(), CallError> {
        let call_type = self.shared.config.default_call_type;
        self.place_call(room, callee, call_type).await
    }

    /// Answer the ringing incoming call: signal `call:accepted`, then drive
    /// the offer/answer exchange as soon as the offer is available.
    pub async fn accept(&self) -> Result<(), CallError> {
        let mut slot = self.shared.active.lock().await;
        let session = match slot.session.clone() {
            Some(s)
                if s.role() == Role::Receiver
                    && s.current_status() == CallStatus::RingingIncoming =>
            {
                s
            }
            _ => return Err(CallError::NoIncomingCall),
        };
        self.shared
            .transport
            .emit(SignalEvent::CallAccepted {
                room_id: session.room().clone(),
                call_type: session.call_type(),
            })
            .await?;
        let _ = self.shared.incoming.send(None);
        tracing::info!(room_id = %session.room(), "incoming call accepted");
        if let Some(sdp) = slot.pending_offer.take() {
            slot.negotiated = true;
            drop(slot);
            session.accept_call(&sdp).await?;
        } else {
            slot.accept_armed = true;
        }
        Ok(())
    }

    /// Decline the ringing incoming call before any media exists.
    pub async fn reject(&self) -> Result<(), CallError> {
        let slot = self.shared.active.lock().await;
        let session = match slot.session.clone() {
            Some(s)
                if s.role() == Role::Receiver
                    && s.current_status() == CallStatus::RingingIncoming =>
            {
                s
            }
            _ => return Err(CallError::NoIncomingCall),
        };
        drop(slot);
        self.shared
            .transport
            .emit(SignalEvent::CallRejected {
                room_id: session.room().clone(),
            })
            .await?;
        tracing::info!(room_id = %session.room(), "incoming call rejected");
        // Local decline; the rejection event already told the other side.
        session.handle_remote_end().await;
        let _ = self.shared.incoming.send(None);
        Ok(())
    }

    /// Hang up the active call. Safe in any state, any number of times; the
    /// remote side is notified exactly once.
    pub async fn hang_up(&self) {
        let session = self.shared.active.lock().await.session.clone();
        if let Some(session) = session {
            session.end_call().await;
        }
        let _ = self.shared.incoming.send(None);
    }

    /// Flip the microphone on the active call; returns the new muted state.
    pub async fn toggle_audio(&self) -> bool {
        match self.shared.active.lock().await.session.clone() {
            Some(session) => session.toggle_audio().await,
            None => false,
        }
    }

    /// Flip the camera on the active call; returns the new camera-off state.
    pub async fn toggle_video(&self) -> bool {
        match self.shared.active.lock().await.session.clone() {
            Some(session) => session.toggle_video().await,
            None => false,
        }
    }

    /// Watch the aggregate call status.
    pub fn status(&self) -> watch::Receiver<CallStatus> {
        self.shared.status.subscribe()
    }

    pub fn current_status(&self) -> CallStatus {
        *self.shared.status.borrow()
    }

    /// The ring tone the UI should be playing right now.
    pub fn ring_tone(&self) -> RingTone {
        RingTone::for_status(self.current_status())
    }

    /// Watch for an unanswered incoming call; `None` once answered,
    /// rejected, or over.
    pub fn incoming_call(&self) -> watch::Receiver<Option<IncomingCall>> {
        self.shared.incoming.subscribe()
    }

    /// Watch the remote stream of the active call, when there is one.
    pub async fn remote_stream(&self) -> Option<watch::Receiver<Option<RemoteStream>>> {
        self.shared
            .active
            .lock()
            .await
            .session
            .as_ref()
            .map(|s| s.remote_stream())
    }

    /// Watch the call duration in whole seconds.
    pub fn duration(&self) -> watch::Receiver<u64> {
        self.shared.timer.subscribe()
    }

    /// Watch the signaling-at-risk indicator: `true` while the transport is
    /// reconnecting during an active call.
    pub fn at_risk(&self) -> watch::Receiver<bool> {
        self.shared.at_risk.subscribe()
    }

    /// Graceful teardown: end any active call, then stop the driver.
    pub async fn shutdown(&self) {
        self.hang_up().await;
        self.driver.abort();
    }
}

impl Drop for CallOrchestrator {
    fn drop(&mut self) {
        self.driver.abort();
        self.shared.timer.stop();
        // Best-effort hang-up so the remote side is not left ringing when
        // the orchestrator is dropped mid-call.
        let shared = self.shared.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let session = shared.active.lock().await.session.take();
                if let Some(session) = session {
                    session.end_call().await;
                }
            });
        }
    }
}

/// Put a fresh session in the slot and start mirroring its status.
fn install_session(shared: &Arc<Shared>, slot: &mut ActiveSlot, session: Arc<PeerSession>) {
    if let Some(old) = slot.mirror.take() {
        old.abort();
    }
    shared.timer.reset();
    let _ = shared.at_risk.send(false);
    slot.accept_armed = false;
    slot.pending_offer = None;
    slot.negotiated = false;
    slot.session = Some(session.clone());
    slot.mirror = Some(tokio::spawn(mirror_status(shared.clone(), session)));
}

/// Forward one session's status into the orchestrator-level watch and keep
/// the timer in lockstep with the connected state.
async fn mirror_status(shared: Arc<Shared>, session: Arc<PeerSession>) {
    let mut rx = session.status();
    loop {
        let current = *rx.borrow_and_update();
        if *shared.status.borrow() != current {
            let _ = shared.status.send(current);
        }
        match current {
            CallStatus::Connected => shared.timer.start(),
            CallStatus::Ended => {
                shared.timer.stop();
                break;
            }
            _ => shared.timer.stop(),
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
    let mut slot = shared.active.lock().await;
    if slot
        .session
        .as_ref()
        .is_some_and(|s| Arc::ptr_eq(s, &session))
    {
        slot.session = None;
        slot.mirror = None;
        slot.accept_armed = false;
        slot.pending_offer = None;
    }
    drop(slot);
    let _ = shared.incoming.send(None);
    let _ = shared.at_risk.send(false);
}

/// The event driver: signaling events in, session operations out, plus the
/// reconnect grace clock.
async fn drive(
    shared: Arc<Shared>,
    mut events: broadcast::Receiver<SignalEvent>,
    mut link: watch::Receiver<LinkState>,
) {
    let grace = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(grace);
    let mut grace_armed = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => handle_event(&shared, event).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "signaling receiver lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = link.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *link.borrow_and_update();
                match state {
                    LinkState::Connected => {
                        if grace_armed {
                            tracing::info!("signaling link recovered");
                        }
                        grace_armed = false;
                        let _ = shared.at_risk.send(false);
                    }
                    LinkState::Reconnecting => {
                        let live = shared
                            .active
                            .lock()
                            .await
                            .session
                            .as_ref()
                            .is_some_and(|s| s.current_status().in_call());
                        if live && !grace_armed {
                            tracing::warn!(
                                grace = ?shared.config.signaling_grace,
                                "signaling link lost during a call"
                            );
                            let _ = shared.at_risk.send(true);
                            grace.as_mut().reset(
                                tokio::time::Instant::now() + shared.config.signaling_grace,
                            );
                            grace_armed = true;
                        }
                    }
                    LinkState::Closed => {
                        end_active_call(&shared, "signaling link closed").await;
                        break;
                    }
                }
            },
            _ = &mut grace, if grace_armed => {
                grace_armed = false;
                end_active_call(&shared, "signaling not recovered within grace").await;
                let _ = shared.at_risk.send(false);
            }
        }
    }
}

async fn end_active_call(shared: &Arc<Shared>, reason: &str) {
    let session = shared.active.lock().await.session.clone();
    if let Some(session) = session {
        if session.current_status().in_call() {
            tracing::warn!(room_id = %session.room(), reason, "ending active call");
            session.end_call().await;
        }
    }
}

async fn handle_event(shared: &Arc<Shared>, event: SignalEvent) {
    match event {
        SignalEvent::CallInit {
            room_id,
            from,
            receiver_id,
            call_type,
        } => {
            if receiver_id != shared.self_id {
                tracing::debug!(room_id = %room_id, "call:init addressed to someone else");
                return;
            }
            let mut slot = shared.active.lock().await;
            if slot
                .session
                .as_ref()
                .is_some_and(|s| s.current_status().in_call())
            {
                tracing::info!(room_id = %room_id, "busy, rejecting incoming call");
                if let Err(e) = shared
                    .transport
                    .emit(SignalEvent::CallRejected { room_id })
                    .await
                {
                    tracing::warn!(error = %e, "busy rejection emit failed");
                }
                return;
            }
            let session = Arc::new(PeerSession::new(
                room_id.clone(),
                Role::Receiver,
                call_type,
                shared.transport.clone(),
                shared.connector.clone(),
                shared.media.clone(),
                shared.config.session.clone(),
            ));
            session.ring();
            install_session(shared, &mut slot, session);
            drop(slot);
            tracing::info!(room_id = %room_id, from = %from, "incoming call");
            let _ = shared.incoming.send(Some(IncomingCall {
                room: room_id,
                from,
                call_type,
            }));
        }
        SignalEvent::CallAccepted { room_id, .. } => {
            let session = session_for_room(shared, &room_id, "call:accepted").await;
            let Some(session) = session else { return };
            if session.role() != Role::Caller {
                tracing::debug!(room_id = %room_id, "ignoring call:accepted on receiver side");
                return;
            }
            tracing::info!(room_id = %room_id, "call accepted, starting negotiation");
            if let Err(e) = session.start_call().await {
                tracing::warn!(room_id = %room_id, error = %e, "starting call failed");
                session.end_call().await;
            }
        }
        SignalEvent::Offer { room_id, sdp } => {
            let mut slot = shared.active.lock().await;
            let Some(session) = slot.session.clone() else {
                tracing::debug!(room_id = %room_id, "offer with no active session");
                return;
            };
            if session.room() != &room_id {
                tracing::debug!(room_id = %room_id, "offer for another room dropped");
                return;
            }
            if session.role() == Role::Receiver && !slot.negotiated {
                if slot.accept_armed {
                    slot.accept_armed = false;
                    slot.negotiated = true;
                    drop(slot);
                    if let Err(e) = session.accept_call(&sdp).await {
                        tracing::warn!(room_id = %room_id, error = %e, "answering offer failed");
                    }
                } else {
                    // Offer beat the user's accept; hold it.
                    slot.pending_offer = Some(sdp);
                }
            } else {
                drop(slot);
                if let Err(e) = session.handle_renegotiation(&sdp).await {
                    tracing::warn!(room_id = %room_id, error = %e, "renegotiation failed");
                }
            }
        }
        SignalEvent::Answer { room_id, sdp } => {
            let session = session_for_room(shared, &room_id, "answer").await;
            if let Some(session) = session {
                if let Err(e) = session.handle_answer(&sdp).await {
                    tracing::warn!(room_id = %room_id, error = %e, "applying answer failed");
                }
            }
        }
        SignalEvent::IceCandidate { room_id, candidate } => {
            let session = shared.active.lock().await.session.clone();
            if let Some(session) = session {
                session.handle_remote_candidate(&room_id, candidate).await;
            } else {
                tracing::debug!(room_id = %room_id, "candidate with no active session");
            }
        }
        SignalEvent::CallRejected { room_id } => {
            let session = session_for_room(shared, &room_id, "call:rejected").await;
            if let Some(session) = session {
                tracing::info!(room_id = %room_id, "call rejected by remote");
                session.handle_remote_end().await;
                let _ = shared.incoming.send(None);
            }
        }
        SignalEvent::CallEnd { room_id } | SignalEvent::CallEnded { room_id } => {
            let session = session_for_room(shared, &room_id, "call end").await;
            if let Some(session) = session {
                tracing::info!(room_id = %room_id, "call ended by remote");
                session.handle_remote_end().await;
                let _ = shared.incoming.send(None);
            }
        }
    }
}

/// The active session, if it is scoped to `room`.
async fn session_for_room(
    shared: &Arc<Shared>,
    room: &RoomId,
    event: &str,
) -> Option<Arc<PeerSession>> {
    let slot = shared.active.lock().await;
    match slot.session.clone() {
        Some(session) if session.room() == room => Some(session),
        Some(_) => {
            tracing::debug!(room_id = %room, event, "event for another room dropped");
            None
        }
        None => {
            tracing::debug!(room_id = %room, event, "event with no active session");
            None
        }
    }
}
