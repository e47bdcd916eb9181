//! Orchestration error taxonomy.

use thiserror::Error;
use webcall_peer_core::PeerError;
use webcall_signal_core::SignalError;

/// Errors produced by the call orchestration layer.
#[derive(Debug, Error)]
pub enum CallError {
    /// A call is already active; one call at a time.
    #[error("another call is already active")]
    Busy,

    /// `accept`/`reject` with no incoming call ringing.
    #[error("no incoming call")]
    NoIncomingCall,

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Signal(#[from] SignalError),
}
