//! WebSocket signaling transport - the connection lifecycle handler.
//!
//! One WebSocket connection per participant, addressed by query
//! parameters on the upgrade request:
//!
//! - `room` (required) - room identifier; a missing room id is fatal
//! - `name` (optional) - display name, sanitized before use
//! - `host` (optional) - host intent flag (`1` or `true`)
//!
//! On upgrade the handler assigns a connection-unique member id, spawns
//! a `ConnectionActor` for the write half, registers with the room
//! registry, then pumps inbound frames into the room actor for the
//! lifetime of the connection. When the stream ends, for any reason,
//! the disconnect is always dispatched so membership bookkeeping stays
//! exact.

use crate::actors::messages::RelayPayload;
use crate::actors::{ActorMetrics, ConnectionActor, RoomActorHandle, RoomRegistryHandle};
use crate::errors::CoordinatorError;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use serde::Deserialize;
use signal_protocol::{sanitize_display_name, ClientEvent, ServerEvent};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared state for the signaling router.
#[derive(Clone)]
pub struct TransportState {
    /// Registry the transport registers connections with.
    pub registry: RoomRegistryHandle,
    /// Shared actor metrics.
    pub metrics: Arc<ActorMetrics>,
    /// Cancellation root for connection writers.
    pub cancel_token: CancellationToken,
}

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Room identifier (required; its absence is a fatal error).
    pub room: Option<String>,
    /// Optional display name.
    pub name: Option<String>,
    /// Optional host intent flag.
    pub host: Option<String>,
}

impl ConnectParams {
    /// Whether the connection asserted host intent.
    #[must_use]
    pub fn wants_host(&self) -> bool {
        matches!(self.host.as_deref(), Some("1" | "true"))
    }
}

/// Create the signaling router with the `/ws` upgrade endpoint.
pub fn signaling_router(state: TransportState) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

async fn ws_handler(
    Query(params): Query<ConnectParams>,
    State(state): State<TransportState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

/// Drive one signaling connection from upgrade to close.
async fn handle_socket(mut socket: WebSocket, params: ConnectParams, state: TransportState) {
    // Fatal: no room id means there is nothing to join. Surface the
    // error and close; the client is expected not to retry.
    let Some(room_id) = params.room.clone().filter(|r| !r.is_empty()) else {
        let message = CoordinatorError::MissingRoomId.client_message();
        let frame = ServerEvent::Error { message }.encode();
        let _ = socket.send(Message::Text(frame)).await;
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    // The member id is assigned by the transport, never by the client.
    let member_id = uuid::Uuid::new_v4().to_string();
    let display_name = sanitize_display_name(params.name.as_deref());
    let wants_host = params.wants_host();

    info!(
        target: "coordinator.transport",
        room_id = %room_id,
        member_id = %member_id,
        wants_host = wants_host,
        "Connection opened"
    );

    let (sink, mut stream) = socket.split();
    let conn_token = state.cancel_token.child_token();
    let (conn, _writer_task) = ConnectionActor::spawn(
        member_id.clone(),
        room_id.clone(),
        sink,
        conn_token,
        Arc::clone(&state.metrics),
    );

    let room = match state
        .registry
        .connect(
            room_id.clone(),
            member_id.clone(),
            display_name,
            wants_host,
            conn.clone(),
        )
        .await
    {
        Ok(room) => room,
        Err(e) => {
            warn!(
                target: "coordinator.transport",
                room_id = %room_id,
                member_id = %member_id,
                error = %e,
                "Connection rejected"
            );
            conn.deliver(ServerEvent::Error {
                message: e.client_message(),
            });
            let _ = conn.close("rejected".to_string()).await;
            return;
        }
    };

    // Inbound pump: runs for the lifetime of the connection.
    while let Some(frame) = stream.next().await {
        let Ok(message) = frame else {
            break;
        };

        match message {
            Message::Text(text) => match ClientEvent::parse(&text) {
                Ok(event) => dispatch(&room, &member_id, event).await,
                Err(e) => {
                    // Malformed or unknown frames are dropped; nothing
                    // is surfaced to the sender.
                    debug!(
                        target: "coordinator.transport",
                        member_id = %member_id,
                        error = %e,
                        "Dropped inbound frame"
                    );
                }
            },
            Message::Close(_) => break,
            // Ping/pong are handled by the protocol layer; binary
            // frames are not part of the vocabulary.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    // Transport close, whatever the cause, always runs the disconnect.
    let _ = state
        .registry
        .disconnect(room_id.clone(), member_id.clone())
        .await;
    conn.cancel();

    info!(
        target: "coordinator.transport",
        room_id = %room_id,
        member_id = %member_id,
        "Connection closed"
    );
}

/// Dispatch a parsed inbound event to the member's room.
async fn dispatch(room: &RoomActorHandle, member_id: &str, event: ClientEvent) {
    let result = match event {
        ClientEvent::ApproveJoin { id } => room.approve_join(member_id.to_string(), id).await,
        ClientEvent::Offer(payload) => {
            room.relay(member_id.to_string(), RelayPayload::Offer(payload))
                .await
        }
        ClientEvent::Answer(payload) => {
            room.relay(member_id.to_string(), RelayPayload::Answer(payload))
                .await
        }
        ClientEvent::IceCandidate(payload) => {
            room.relay(member_id.to_string(), RelayPayload::IceCandidate(payload))
                .await
        }
        ClientEvent::CallReady { video } => room.call_ready(member_id.to_string(), video).await,
        ClientEvent::CallEnded => room.call_ended(member_id.to_string()).await,
    };

    if let Err(e) = result {
        // The room is gone (coordinator draining); the read loop will
        // terminate when the socket closes.
        debug!(
            target: "coordinator.transport",
            member_id = %member_id,
            error = %e,
            "Dispatch to room failed"
        );
    }
}
