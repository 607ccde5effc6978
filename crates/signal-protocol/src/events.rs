//! Event types and envelope encoding/parsing.
//!
//! Wire format is a JSON object with an `event` name and an optional
//! `data` payload. Events with no payload omit the `data` key entirely;
//! parsing tolerates an absent, `null`, or empty payload.

use serde::Deserialize;
use serde_json::{json, Value};

/// Error type for protocol operations
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON or not an envelope object
    #[error("Malformed event frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Event name is not part of the inbound vocabulary
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// Event payload is missing a required field
    #[error("Invalid payload for {event}: {reason}")]
    InvalidPayload {
        /// Event name the payload belongs to
        event: &'static str,
        /// What was wrong with it
        reason: &'static str,
    },
}

/// JSON envelope shared by all frames.
#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Events a signaling peer may send to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Host approves a pending guest's join request.
    ApproveJoin {
        /// Identifier of the guest to approve
        id: String,
    },
    /// Opaque session offer, relayed verbatim.
    Offer(Value),
    /// Opaque session answer, relayed verbatim.
    Answer(Value),
    /// Opaque ICE candidate, relayed verbatim.
    IceCandidate(Value),
    /// Sender declares local media is prepared for negotiation.
    CallReady {
        /// Whether the sender intends to send video
        video: bool,
    },
    /// Sender declares the current call over.
    CallEnded,
}

impl ClientEvent {
    /// Parse a client event from a raw text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON envelope, names an
    /// event outside the inbound vocabulary, or carries a payload
    /// missing a required field.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(frame)?;

        match envelope.event.as_str() {
            "approve-join" => {
                let id = envelope
                    .data
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or(ProtocolError::InvalidPayload {
                        event: "approve-join",
                        reason: "missing id",
                    })?
                    .to_string();
                Ok(ClientEvent::ApproveJoin { id })
            }
            "offer" => Ok(ClientEvent::Offer(envelope.data)),
            "answer" => Ok(ClientEvent::Answer(envelope.data)),
            "ice-candidate" => Ok(ClientEvent::IceCandidate(envelope.data)),
            "call-ready" => {
                let video = envelope
                    .data
                    .get("video")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Ok(ClientEvent::CallReady { video })
            }
            "call-ended" => Ok(ClientEvent::CallEnded),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

/// Events the coordinator emits to signaling peers.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Initial state: whether the recipient should initiate negotiation.
    Init {
        /// True iff the recipient is the sole approved participant
        is_initiator: bool,
    },
    /// Host status of the recipient (never a third party's flag).
    Host {
        /// Whether the recipient currently holds the host role
        is_host: bool,
    },
    /// Approved-participant count for the room.
    Participants {
        /// Number of currently approved members
        count: usize,
    },
    /// Negotiation may begin; re-announced periodically until a call starts.
    Ready,
    /// Opaque session offer from another member.
    Offer(Value),
    /// Opaque session answer from another member.
    Answer(Value),
    /// Opaque ICE candidate from another member.
    IceCandidate(Value),
    /// A guest is waiting for the host's approval.
    JoinRequest {
        /// Identifier of the waiting guest
        id: String,
        /// Display name of the waiting guest
        name: String,
    },
    /// The recipient's join request awaits host approval.
    WaitingApproval,
    /// The recipient has been approved to participate.
    JoinApproved,
    /// A previously surfaced join request no longer needs action.
    JoinRequestResolved {
        /// Identifier of the guest whose request was resolved
        id: String,
    },
    /// The recipient has been promoted to host.
    PromotedHost,
    /// Another member left; tear down any negotiation state for them.
    PeerLeft,
    /// Fatal connection error; the connection closes after this event.
    Error {
        /// Human-readable reason
        message: String,
    },
}

impl ServerEvent {
    /// Wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Init { .. } => "init",
            ServerEvent::Host { .. } => "host",
            ServerEvent::Participants { .. } => "participants",
            ServerEvent::Ready => "ready",
            ServerEvent::Offer(_) => "offer",
            ServerEvent::Answer(_) => "answer",
            ServerEvent::IceCandidate(_) => "ice-candidate",
            ServerEvent::JoinRequest { .. } => "join-request",
            ServerEvent::WaitingApproval => "waiting-approval",
            ServerEvent::JoinApproved => "join-approved",
            ServerEvent::JoinRequestResolved { .. } => "join-request-resolved",
            ServerEvent::PromotedHost => "promoted-host",
            ServerEvent::PeerLeft => "peer-left",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Payload for this event, or `None` for payload-free events.
    #[must_use]
    pub fn data(&self) -> Option<Value> {
        match self {
            ServerEvent::Init { is_initiator } => Some(json!({ "isInitiator": is_initiator })),
            ServerEvent::Host { is_host } => Some(json!({ "isHost": is_host })),
            ServerEvent::Participants { count } => Some(json!({ "count": count })),
            ServerEvent::Offer(payload)
            | ServerEvent::Answer(payload)
            | ServerEvent::IceCandidate(payload) => Some(payload.clone()),
            ServerEvent::JoinRequest { id, name } => Some(json!({ "id": id, "name": name })),
            ServerEvent::JoinRequestResolved { id } => Some(json!({ "id": id })),
            ServerEvent::Error { message } => Some(json!({ "message": message })),
            ServerEvent::Ready
            | ServerEvent::WaitingApproval
            | ServerEvent::JoinApproved
            | ServerEvent::PromotedHost
            | ServerEvent::PeerLeft => None,
        }
    }

    /// Encode this event as a text frame.
    #[must_use]
    pub fn encode(&self) -> String {
        let envelope = match self.data() {
            Some(data) => json!({ "event": self.name(), "data": data }),
            None => json!({ "event": self.name() }),
        };
        envelope.to_string()
    }
}
