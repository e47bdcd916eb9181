//! The signaling event vocabulary.
//!
//! Every wire frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! Frames are decoded into tagged [`SignalEvent`] variants and validated
//! before they are handed to subscribers; duck-typed payloads never cross
//! the transport boundary.

use crate::error::SignalError;
use crate::types::{CallType, PeerId, RoomId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// ICE candidate payload as exchanged on the wire.
///
/// Field names follow the browser's `RTCIceCandidateInit` JSON shape so the
/// same frames interoperate with web clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidatePayload {
    /// The `candidate:` attribute line.
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

/// A signaling event scoped to a call room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SignalEvent {
    /// Caller announces an incoming call to the receiver.
    #[serde(rename = "call:init", rename_all = "camelCase")]
    CallInit {
        room_id: RoomId,
        from: PeerId,
        receiver_id: PeerId,
        call_type: CallType,
    },
    /// Receiver is ready; gates the caller's offer creation.
    #[serde(rename = "call:accepted", rename_all = "camelCase")]
    CallAccepted { room_id: RoomId, call_type: CallType },
    /// Receiver declined before any media was exchanged.
    #[serde(rename = "call:rejected", rename_all = "camelCase")]
    CallRejected { room_id: RoomId },
    /// SDP offer, caller to receiver.
    #[serde(rename = "offer", rename_all = "camelCase")]
    Offer { room_id: RoomId, sdp: String },
    /// SDP answer, receiver to caller.
    #[serde(rename = "answer", rename_all = "camelCase")]
    Answer { room_id: RoomId, sdp: String },
    /// ICE candidate, either direction.
    #[serde(rename = "ice-candidate", rename_all = "camelCase")]
    IceCandidate {
        room_id: RoomId,
        candidate: IceCandidatePayload,
    },
    /// Local hang-up request.
    #[serde(rename = "call:end", rename_all = "camelCase")]
    CallEnd { room_id: RoomId },
    /// Remote notification that the call has ended.
    #[serde(rename = "call:ended", rename_all = "camelCase")]
    CallEnded { room_id: RoomId },
}

const KNOWN_EVENTS: &[&str] = &[
    "call:init",
    "call:accepted",
    "call:rejected",
    "offer",
    "answer",
    "ice-candidate",
    "call:end",
    "call:ended",
];

impl SignalEvent {
    /// The wire name of this event.
    pub fn event_name(&self) -> &'static str {
        match self {
            SignalEvent::CallInit { .. } => "call:init",
            SignalEvent::CallAccepted { .. } => "call:accepted",
            SignalEvent::CallRejected { .. } => "call:rejected",
            SignalEvent::Offer { .. } => "offer",
            SignalEvent::Answer { .. } => "answer",
            SignalEvent::IceCandidate { .. } => "ice-candidate",
            SignalEvent::CallEnd { .. } => "call:end",
            SignalEvent::CallEnded { .. } => "call:ended",
        }
    }

    /// The room this event is scoped to.
    pub fn room_id(&self) -> &RoomId {
        match self {
            SignalEvent::CallInit { room_id, .. }
            | SignalEvent::CallAccepted { room_id, .. }
            | SignalEvent::CallRejected { room_id }
            | SignalEvent::Offer { room_id, .. }
            | SignalEvent::Answer { room_id, .. }
            | SignalEvent::IceCandidate { room_id, .. }
            | SignalEvent::CallEnd { room_id }
            | SignalEvent::CallEnded { room_id } => room_id,
        }
    }

    /// Defensive room filter: the shared transport does not guarantee room
    /// isolation, so every consumer checks before acting.
    pub fn is_for_room(&self, room: &RoomId) -> bool {
        self.room_id() == room
    }

    /// Encode into a wire frame.
    pub fn encode(&self) -> Result<String, SignalError> {
        serde_json::to_string(self).map_err(|e| SignalError::MalformedFrame(e.to_string()))
    }

    /// Decode and validate a wire frame.
    ///
    /// Unknown event names and frames with missing or empty required fields
    /// are rejected here so downstream layers never see them.
    pub fn decode(frame: &str) -> Result<Self, SignalError> {
        let raw: Value = serde_json::from_str(frame)
            .map_err(|e| SignalError::MalformedFrame(e.to_string()))?;
        let name = raw
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| SignalError::MalformedFrame("missing 'event' field".into()))?;
        if !KNOWN_EVENTS.contains(&name) {
            return Err(SignalError::UnknownEvent(name.to_string()));
        }
        let name = name.to_string();
        let event: SignalEvent =
            serde_json::from_value(raw).map_err(|e| SignalError::InvalidPayload {
                event: name.clone(),
                reason: e.to_string(),
            })?;
        event.validate()?;
        Ok(event)
    }

    /// Required-field validation beyond what serde can express.
    pub fn validate(&self) -> Result<(), SignalError> {
        let fail = |reason: &str| {
            Err(SignalError::InvalidPayload {
                event: self.event_name().to_string(),
                reason: reason.to_string(),
            })
        };
        if self.room_id().as_str().trim().is_empty() {
            return fail("empty roomId");
        }
        match self {
            SignalEvent::Offer { sdp, .. } | SignalEvent::Answer { sdp, .. } => {
                // An empty description would crash the engine's SDP parser.
                if sdp.trim().is_empty() {
                    return fail("empty sdp");
                }
            }
            SignalEvent::IceCandidate { candidate, .. } => {
                if candidate.candidate.trim().is_empty() {
                    return fail("empty candidate line");
                }
            }
            SignalEvent::CallInit {
                from, receiver_id, ..
            } => {
                if from.as_str().trim().is_empty() {
                    return fail("empty from");
                }
                if receiver_id.as_str().trim().is_empty() {
                    return fail("empty receiverId");
                }
            }
            _ => {}
        }
        Ok(())
    }
}
