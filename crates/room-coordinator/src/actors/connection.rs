//! `ConnectionActor` - per-WebSocket-connection actor.
//!
//! Each `ConnectionActor`:
//! - Owns the write half of exactly one WebSocket connection
//! - Serializes outbound events and writes them to the peer
//! - Is the delivery target for room broadcasts
//!
//! Delivery is fire-and-forget: the room never awaits a slow peer. A
//! full mailbox or a dead socket counts a drop in the mailbox monitor;
//! the peer recovers missed state from subsequent events.
//!
//! # Lifecycle
//!
//! 1. Created on WebSocket upgrade, before the room join is dispatched
//! 2. Runs until the socket dies, the transport cancels it, or the
//!    room actor shuts down (cancellation propagates via child token)

use super::messages::ConnectionMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::errors::CoordinatorError;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: String,
    monitor: Arc<MailboxMonitor>,
}

impl ConnectionActorHandle {
    /// Get the connection ID.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Deliver an event to the peer, fire-and-forget.
    ///
    /// Never blocks and never errors: if the mailbox is full or the
    /// actor is gone, the event is dropped and accounted for.
    pub fn deliver(&self, event: signal_protocol::ServerEvent) {
        if self
            .sender
            .try_send(ConnectionMessage::Deliver { event })
            .is_err()
        {
            self.monitor.record_drop();
        }
    }

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the actor has already exited.
    pub async fn close(&self, reason: String) -> Result<(), CoordinatorError> {
        self.sender
            .send(ConnectionMessage::Close { reason })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Create a channel-backed handle with no running actor.
    ///
    /// Tests use the returned receiver to observe exactly what a room
    /// would have delivered to this connection.
    #[must_use]
    pub fn for_test(connection_id: impl Into<String>) -> (Self, mpsc::Receiver<ConnectionMessage>) {
        let connection_id = connection_id.into();
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        let handle = Self {
            sender,
            cancel_token: CancellationToken::new(),
            connection_id: connection_id.clone(),
            monitor: Arc::new(MailboxMonitor::new(ActorType::Connection, connection_id)),
        };
        (handle, receiver)
    }
}

/// The `ConnectionActor` implementation.
///
/// Generic over the sink so tests can substitute a channel for the
/// WebSocket write half.
pub struct ConnectionActor<S> {
    /// Connection ID.
    connection_id: String,
    /// Room this connection belongs to.
    room_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Write half of the peer connection.
    sink: S,
    /// Cancellation token (child of the transport's token).
    cancel_token: CancellationToken,
    /// Shared metrics.
    metrics: Arc<ActorMetrics>,
    /// Mailbox monitor, shared with the handle for drop accounting.
    mailbox: Arc<MailboxMonitor>,
}

impl<S> ConnectionActor<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: std::fmt::Display,
{
    /// Spawn a new connection actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        connection_id: String,
        room_id: String,
        sink: S,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Connection, &connection_id));

        let actor = Self {
            connection_id: connection_id.clone(),
            room_id,
            receiver,
            sink,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
            monitor: mailbox,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "coordinator.actor.connection",
        fields(connection_id = %self.connection_id, room_id = %self.room_id)
    )]
    async fn run(mut self) {
        debug!(
            target: "coordinator.actor.connection",
            connection_id = %self.connection_id,
            room_id = %self.room_id,
            "ConnectionActor started"
        );

        self.metrics.connection_created();

        loop {
            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "coordinator.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    self.send_close_frame().await;
                    break;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "coordinator.actor.connection",
                                connection_id = %self.connection_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.connection_closed();

        info!(
            target: "coordinator.actor.connection",
            connection_id = %self.connection_id,
            room_id = %self.room_id,
            messages_processed = self.mailbox.messages_processed(),
            messages_dropped = self.mailbox.messages_dropped(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Deliver { event } => {
                let frame = event.encode();
                if let Err(e) = self.sink.send(Message::Text(frame)).await {
                    // Peer is unreachable; the read side will notice and
                    // run the disconnect path.
                    debug!(
                        target: "coordinator.actor.connection",
                        connection_id = %self.connection_id,
                        event = event.name(),
                        error = %e,
                        "Write failed, peer unreachable"
                    );
                    return true;
                }
                false
            }

            ConnectionMessage::Close { reason } => {
                debug!(
                    target: "coordinator.actor.connection",
                    connection_id = %self.connection_id,
                    reason = %reason,
                    "Closing connection"
                );
                self.send_close_frame().await;
                true
            }
        }
    }

    /// Best-effort close frame; the peer may already be gone.
    async fn send_close_frame(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
    }
}
