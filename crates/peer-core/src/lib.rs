//! Peer session manager for the webcall stack.
//!
//! A [`PeerSession`] owns exactly one peer link and one local media stream
//! per call attempt. It drives the call status machine, exchanges SDP and
//! ICE candidates over an injected signaling transport, queues candidates
//! that arrive before the remote description is set, performs a single ICE
//! restart on failure, and tears everything down idempotently.
//!
//! The WebRTC engine sits behind the [`PeerConnector`] / [`PeerLink`]
//! adapter seam; [`rtc`] provides the webrtc-rs backend and [`testing`]
//! provides scripted doubles for state-machine tests.

pub mod config;
pub mod connection;
pub mod error;
pub mod media;
pub mod rtc;
pub mod session;
pub mod testing;

pub use config::{IceServer, SessionConfig};
pub use connection::{LinkConnState, LinkEvent, PeerConnector, PeerLink};
pub use error::PeerError;
pub use media::{LocalStream, LocalTrack, MediaSource, RemoteStream, TrackKind};
pub use rtc::{RtcConnector, RtcMediaSource};
pub use session::{CallStatus, PeerSession, Role};
