//! The transport contract consumed by the session and orchestration layers.

use crate::error::SignalError;
use crate::events::SignalEvent;
use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

/// Connection state of the underlying signaling link.
///
/// The transport reconnects on its own; consumers only observe the state to
/// flag an in-flight call as at-risk while the link is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Reconnecting,
    Closed,
}

/// A duplex, room-multiplexed signaling channel.
///
/// Subscriptions are handed out as broadcast receivers: dropping the
/// receiver is the unsubscription, so handler lifetime is tied to scope and
/// re-registration after a session re-creation cannot double-process events.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Fire-and-forget send. At-most-once delivery; no acknowledgment.
    async fn emit(&self, event: SignalEvent) -> Result<(), SignalError>;

    /// Subscribe to every validated inbound event.
    ///
    /// Events for all rooms arrive on the same receiver; callers filter with
    /// [`SignalEvent::is_for_room`].
    fn subscribe(&self) -> broadcast::Receiver<SignalEvent>;

    /// Observe the transport's connection state.
    fn link_state(&self) -> watch::Receiver<LinkState>;
}
