//! Room-scoped signaling transport for the webcall stack.
//!
//! This crate defines the typed event vocabulary exchanged between call
//! participants (`call:init`, `offer`, `answer`, `ice-candidate`, ...), the
//! [`SignalingTransport`] contract the session layer consumes, and two
//! implementations: an in-process [`MemoryHub`] used as loopback and test
//! double, and a WebSocket client ([`WsTransport`]).
//!
//! Payloads are validated at the transport boundary: an event that reaches a
//! subscriber is guaranteed to carry every required field.

pub mod error;
pub mod events;
pub mod memory;
pub mod transport;
pub mod types;
pub mod ws;

pub use error::SignalError;
pub use events::{IceCandidatePayload, SignalEvent};
pub use memory::{MemoryHub, MemoryTransport};
pub use transport::{LinkState, SignalingTransport};
pub use types::{CallType, PeerId, RoomId};
pub use ws::{WsConfig, WsTransport};
