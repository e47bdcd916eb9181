//! Ring tone selection.

use webcall_peer_core::CallStatus;

/// Which ring tone the UI should play, derived from the call status so the
/// outgoing and incoming tones can never sound at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RingTone {
    #[default]
    None,
    /// Ringback while waiting for the receiver.
    Outgoing,
    /// Ringing for a call waiting to be answered.
    Incoming,
}

impl RingTone {
    pub fn for_status(status: CallStatus) -> Self {
        match status {
            CallStatus::RingingOutgoing => RingTone::Outgoing,
            CallStatus::RingingIncoming => RingTone::Incoming,
            _ => RingTone::None,
        }
    }
}
