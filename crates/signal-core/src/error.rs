//! Signaling-layer error types.

use thiserror::Error;

/// Errors produced by the signaling transport layer.
#[derive(Debug, Error)]
pub enum SignalError {
    /// A wire frame named a known event but was missing or carried an
    /// invalid required field. The frame is dropped at the boundary.
    #[error("invalid payload for '{event}': {reason}")]
    InvalidPayload { event: String, reason: String },

    /// A wire frame named an event outside the vocabulary.
    #[error("unknown signaling event '{0}'")]
    UnknownEvent(String),

    /// A wire frame was not valid JSON.
    #[error("malformed signaling frame: {0}")]
    MalformedFrame(String),

    /// The transport's outbound channel is gone; the connection was closed.
    #[error("signaling channel closed")]
    ChannelClosed,
}
