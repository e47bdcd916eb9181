//! Call orchestration for the webcall stack.
//!
//! A [`CallOrchestrator`] sits between the signaling transport and one
//! [`webcall_peer_core::PeerSession`] at a time. It enforces the role
//! asymmetry of call setup: the caller announces with `call:init` and holds
//! its offer back until the receiver signals `call:accepted`; the receiver
//! surfaces the incoming call, and on acceptance answers the offer. It also
//! runs the call duration timer, derives the ring tone from the status, and
//! ends calls whose signaling link stays down beyond a grace period.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod timer;
pub mod tones;

pub use config::CallConfig;
pub use error::CallError;
pub use orchestrator::{CallOrchestrator, IncomingCall};
pub use timer::CallTimer;
pub use tones::RingTone;
