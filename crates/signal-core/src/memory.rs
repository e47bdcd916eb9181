//! In-process signaling hub.
//!
//! Routes events between endpoints registered on the same hub, the way the
//! signaling server fans out room events to the other participant. Each
//! endpoint keeps a log of everything it emitted, which is what the ordering
//! tests assert against.

use crate::error::SignalError;
use crate::events::SignalEvent;
use crate::transport::{LinkState, SignalingTransport};
use crate::types::PeerId;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

const EVENT_CHANNEL_CAPACITY: usize = 64;

struct Endpoint {
    inbound: broadcast::Sender<SignalEvent>,
    link_tx: watch::Sender<LinkState>,
    link_rx: watch::Receiver<LinkState>,
    sent: Mutex<Vec<SignalEvent>>,
}

impl Endpoint {
    fn new() -> Self {
        let (inbound, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (link_tx, link_rx) = watch::channel(LinkState::Connected);
        Self {
            inbound,
            link_tx,
            link_rx,
            sent: Mutex::new(Vec::new()),
        }
    }
}

/// Process-local signaling hub connecting any number of endpoints.
#[derive(Clone, Default)]
pub struct MemoryHub {
    endpoints: Arc<DashMap<PeerId, Arc<Endpoint>>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self {
            endpoints: Arc::new(DashMap::new()),
        }
    }

    /// Register an endpoint for `peer` and return its transport handle.
    pub fn endpoint(&self, peer: impl Into<PeerId>) -> MemoryTransport {
        let peer = peer.into();
        let shared = Arc::new(Endpoint::new());
        self.endpoints.insert(peer.clone(), shared.clone());
        MemoryTransport {
            peer,
            hub: self.endpoints.clone(),
            shared,
        }
    }

    /// Everything `peer` has emitted, in order.
    pub fn sent_log(&self, peer: &PeerId) -> Vec<SignalEvent> {
        self.endpoints
            .get(peer)
            .map(|e| e.sent.lock().clone())
            .unwrap_or_default()
    }

    /// Simulate a transport-level disconnect or recovery for `peer`.
    pub fn set_link_state(&self, peer: &PeerId, state: LinkState) {
        if let Some(endpoint) = self.endpoints.get(peer) {
            let _ = endpoint.link_tx.send(state);
        }
    }
}

/// One endpoint's handle onto a [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryTransport {
    peer: PeerId,
    hub: Arc<DashMap<PeerId, Arc<Endpoint>>>,
    shared: Arc<Endpoint>,
}

impl MemoryTransport {
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Everything this endpoint has emitted, in order.
    pub fn sent_log(&self) -> Vec<SignalEvent> {
        self.shared.sent.lock().clone()
    }
}

#[async_trait]
impl SignalingTransport for MemoryTransport {
    async fn emit(&self, event: SignalEvent) -> Result<(), SignalError> {
        event.validate()?;
        self.shared.sent.lock().push(event.clone());
        tracing::debug!(
            peer = %self.peer,
            event = event.event_name(),
            room_id = %event.room_id(),
            "emit"
        );
        for entry in self.hub.iter() {
            if entry.key() == &self.peer {
                continue;
            }
            // A send error only means the endpoint has no live subscriber.
            let _ = entry.value().inbound.send(event.clone());
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SignalEvent> {
        self.shared.inbound.subscribe()
    }

    fn link_state(&self) -> watch::Receiver<LinkState> {
        self.shared.link_rx.clone()
    }
}
