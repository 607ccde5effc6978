//! Message types exchanged between actors.
//!
//! Every actor owns an mpsc mailbox of one of these enums. Requests
//! that need an answer carry a `respond_to` oneshot sender; everything
//! else is fire-and-forget.

use crate::errors::CoordinatorError;

use super::connection::ConnectionActorHandle;
use super::room::RoomActorHandle;

use serde::Serialize;
use serde_json::Value;
use signal_protocol::ServerEvent;
use tokio::sync::oneshot;

/// Messages handled by the `RoomRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Resolve-or-create a room and enqueue the join for a new connection.
    Connect {
        /// Client-supplied room identifier (case-sensitive)
        room_id: String,
        /// Transport-assigned member identifier
        member_id: String,
        /// Sanitized display name
        display_name: String,
        /// Whether the connection asserted host intent
        wants_host: bool,
        /// Handle used to deliver outbound events to this connection
        conn: ConnectionActorHandle,
        /// Receives the room handle for subsequent dispatch
        respond_to: oneshot::Sender<Result<RoomActorHandle, CoordinatorError>>,
    },

    /// A member's connection closed. Forwards the leave to the room and
    /// removes the room when its live-member count reaches zero.
    /// Idempotent for unknown rooms.
    Disconnect {
        /// Identifier of the room the connection belonged to
        room_id: String,
        /// Identifier of the departing member
        member_id: String,
        /// Acknowledged once the leave has been forwarded
        respond_to: oneshot::Sender<()>,
    },

    /// Snapshot of registry-level counts.
    GetStatus {
        /// Receives the status snapshot
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Stop accepting connections and begin graceful shutdown.
    Shutdown {
        /// Acknowledged once shutdown has been initiated
        respond_to: oneshot::Sender<()>,
    },
}

/// Registry status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatus {
    /// Number of live rooms.
    pub room_count: usize,
    /// Number of live connections across all rooms.
    pub connection_count: usize,
    /// Whether the registry is refusing new connections.
    pub is_draining: bool,
}

/// Messages handled by a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// A new connection joins this room.
    Join {
        /// Transport-assigned member identifier
        member_id: String,
        /// Sanitized display name
        display_name: String,
        /// Whether the connection asserted host intent
        wants_host: bool,
        /// Handle used to deliver outbound events to this member
        conn: ConnectionActorHandle,
    },

    /// A member's connection closed.
    Leave {
        /// Identifier of the departing member
        member_id: String,
    },

    /// The sender asks to approve a pending member.
    ApproveJoin {
        /// Identifier of the member issuing the approval
        sender_id: String,
        /// Identifier of the member to approve
        target_id: String,
    },

    /// Relay an opaque negotiation payload to the rest of the room.
    Relay {
        /// Identifier of the sending member
        sender_id: String,
        /// The payload to fan out
        payload: RelayPayload,
    },

    /// A member declares local media ready.
    CallReady {
        /// Identifier of the declaring member
        member_id: String,
        /// Whether the member intends to send video
        video: bool,
    },

    /// A member declares the current call over.
    CallEnded {
        /// Identifier of the declaring member
        member_id: String,
    },

    /// Periodic tick from the ready-announcement task.
    AnnounceTick,

    /// Snapshot of room state (observability and tests).
    GetState {
        /// Receives the state snapshot
        respond_to: oneshot::Sender<RoomState>,
    },
}

/// Opaque negotiation payload kinds relayed between members.
#[derive(Debug, Clone)]
pub enum RelayPayload {
    /// Session offer
    Offer(Value),
    /// Session answer
    Answer(Value),
    /// ICE candidate
    IceCandidate(Value),
}

impl RelayPayload {
    /// Wire event this payload fans out as.
    #[must_use]
    pub fn into_event(self) -> ServerEvent {
        match self {
            RelayPayload::Offer(value) => ServerEvent::Offer(value),
            RelayPayload::Answer(value) => ServerEvent::Answer(value),
            RelayPayload::IceCandidate(value) => ServerEvent::IceCandidate(value),
        }
    }

    /// Event name for logging.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            RelayPayload::Offer(_) => "offer",
            RelayPayload::Answer(_) => "answer",
            RelayPayload::IceCandidate(_) => "ice-candidate",
        }
    }
}

/// Room state snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RoomState {
    /// Room identifier.
    pub room_id: String,
    /// Current host member, if any.
    pub host_id: Option<String>,
    /// All current members.
    pub members: Vec<MemberInfo>,
    /// Whether an answer has been relayed and the call is active.
    pub call_active: bool,
    /// Whether the repeating ready announcement is running.
    pub announcing: bool,
    /// Room creation timestamp (unix seconds).
    pub created_at: i64,
}

impl RoomState {
    /// Number of approved members.
    #[must_use]
    pub fn approved_count(&self) -> usize {
        self.members.iter().filter(|m| m.approved).count()
    }
}

/// Member snapshot within a room state.
#[derive(Debug, Clone, Serialize)]
pub struct MemberInfo {
    /// Member identifier.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Whether the member has been approved.
    pub approved: bool,
    /// Whether the member has declared media readiness.
    pub ready: bool,
}

/// Messages handled by a `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Deliver an event to the peer.
    Deliver {
        /// The event to write
        event: ServerEvent,
    },

    /// Close the connection.
    Close {
        /// Reason recorded in logs
        reason: String,
    },
}
