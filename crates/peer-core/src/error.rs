//! Peer session error taxonomy.

use crate::session::CallStatus;
use thiserror::Error;
use webcall_signal_core::SignalError;

/// Errors produced by the peer session layer.
///
/// Setup errors reject the initiating operation so the orchestration layer
/// can surface them; failures after the call is established degrade instead
/// of tearing down, except where noted.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Camera/microphone permission denied or no device available.
    /// Recoverable by retrying or downgrading to audio-only.
    #[error("media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// Null or malformed SDP offer. The call attempt is aborted, not retried.
    #[error("invalid offer: {0}")]
    InvalidOffer(String),

    /// Null or malformed SDP answer.
    #[error("invalid answer: {0}")]
    InvalidAnswer(String),

    /// An operation was invoked in a status that does not permit it, e.g. a
    /// second `start_call` while a link is live.
    #[error("'{operation}' not allowed while {status:?}")]
    InvalidState {
        operation: &'static str,
        status: CallStatus,
    },

    /// Failure inside the peer connection engine.
    #[error("peer engine error: {0}")]
    Engine(String),

    /// Signaling transport failure.
    #[error(transparent)]
    Signal(#[from] SignalError),
}
