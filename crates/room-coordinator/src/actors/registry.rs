//! `RoomRegistryActor` - singleton supervisor for room actors.
//!
//! The `RoomRegistryActor` is the top-level actor in the coordinator
//! hierarchy:
//!
//! - Singleton per coordinator instance
//! - Owns the room-id → room-actor map; rooms are created on first
//!   connect and removed when their live-member count reaches zero
//! - Supervises N `RoomActor` instances (panic detection via `JoinHandle`)
//! - Owns the root `CancellationToken` for graceful shutdown
//!
//! Routing both connects and disconnects through this actor serializes
//! room creation and removal, which is what keeps the "a room exists
//! iff it has members" invariant honest under connect/disconnect races
//! on the same room id.

use super::connection::ConnectionActorHandle;
use super::messages::{RegistryMessage, RegistryStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle};
use crate::errors::CoordinatorError;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// Handle to the `RoomRegistryActor`.
///
/// This is the public interface for interacting with the registry.
/// All methods are async and return results via oneshot channels.
#[derive(Clone)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RoomRegistryHandle {
    /// Create a new `RoomRegistryActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    ///
    /// # Arguments
    ///
    /// * `coordinator_id` - Coordinator instance ID (log correlation)
    /// * `announce_interval` - Ready re-announcement interval for rooms
    /// * `shutdown_grace` - Per-room drain timeout during shutdown
    /// * `metrics` - Shared actor metrics
    #[must_use]
    pub fn new(
        coordinator_id: String,
        announce_interval: Duration,
        shutdown_grace: Duration,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomRegistryActor::new(
            coordinator_id,
            receiver,
            cancel_token.clone(),
            announce_interval,
            shutdown_grace,
            metrics,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Connect a new member: resolve-or-create the room, enqueue the
    /// join, and return the room handle for subsequent dispatch.
    ///
    /// # Errors
    ///
    /// Returns `Draining` during shutdown, or an internal error if the
    /// registry has exited.
    pub async fn connect(
        &self,
        room_id: String,
        member_id: String,
        display_name: String,
        wants_host: bool,
        conn: ConnectionActorHandle,
    ) -> Result<RoomActorHandle, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Connect {
                room_id,
                member_id,
                display_name,
                wants_host,
                conn,
                respond_to: tx,
            })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))?
    }

    /// Disconnect a member: forward the leave and remove the room when
    /// it empties. Idempotent for unknown rooms.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry has exited.
    pub async fn disconnect(
        &self,
        room_id: String,
        member_id: String,
    ) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Disconnect {
                room_id,
                member_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Get the current registry status.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry has exited.
    pub async fn status(&self) -> Result<RegistryStatus, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry has already exited.
    pub async fn shutdown(&self) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for spawning related tasks.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    /// Handle to the room actor.
    handle: RoomActorHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
    /// Live connections currently attributed to this room.
    live_members: usize,
}

/// The `RoomRegistryActor` implementation.
///
/// This struct owns the actor state and runs the message loop.
pub struct RoomRegistryActor {
    /// Coordinator instance ID.
    coordinator_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    /// Managed rooms by ID.
    rooms: HashMap<String, ManagedRoom>,
    /// Whether the registry is accepting new connections.
    accepting_new: bool,
    /// Ready re-announcement interval handed to each room.
    announce_interval: Duration,
    /// Per-room drain timeout during shutdown.
    shutdown_grace: Duration,
    /// Shared metrics.
    metrics: Arc<ActorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl RoomRegistryActor {
    /// Create a new registry actor (not started).
    fn new(
        coordinator_id: String,
        receiver: mpsc::Receiver<RegistryMessage>,
        cancel_token: CancellationToken,
        announce_interval: Duration,
        shutdown_grace: Duration,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Registry, &coordinator_id);

        Self {
            coordinator_id,
            receiver,
            cancel_token,
            rooms: HashMap::new(),
            accepting_new: true,
            announce_interval,
            shutdown_grace,
            metrics,
            mailbox,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "coordinator.actor.registry", fields(coordinator_id = %self.coordinator_id))]
    async fn run(mut self) {
        info!(
            target: "coordinator.actor.registry",
            coordinator_id = %self.coordinator_id,
            "RoomRegistryActor started"
        );

        loop {
            // Check for terminated room actors
            self.check_room_health().await;

            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "coordinator.actor.registry",
                        coordinator_id = %self.coordinator_id,
                        "RoomRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "coordinator.actor.registry",
                                coordinator_id = %self.coordinator_id,
                                "RoomRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "coordinator.actor.registry",
            coordinator_id = %self.coordinator_id,
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomRegistryActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::Connect {
                room_id,
                member_id,
                display_name,
                wants_host,
                conn,
                respond_to,
            } => {
                let result = self
                    .handle_connect(room_id, member_id, display_name, wants_host, conn)
                    .await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::Disconnect {
                room_id,
                member_id,
                respond_to,
            } => {
                self.handle_disconnect(&room_id, member_id).await;
                let _ = respond_to.send(());
            }

            RegistryMessage::GetStatus { respond_to } => {
                let status = self.get_status();
                let _ = respond_to.send(status);
            }

            RegistryMessage::Shutdown { respond_to } => {
                self.initiate_shutdown();
                let _ = respond_to.send(());
            }
        }
    }

    /// Resolve-or-create the room and enqueue the join.
    #[instrument(skip_all, fields(coordinator_id = %self.coordinator_id, room_id = %room_id))]
    async fn handle_connect(
        &mut self,
        room_id: String,
        member_id: String,
        display_name: String,
        wants_host: bool,
        conn: ConnectionActorHandle,
    ) -> Result<RoomActorHandle, CoordinatorError> {
        if !self.accepting_new {
            return Err(CoordinatorError::Draining);
        }

        // Try an existing live room first.
        if let Some(handle) = self.live_room_handle(&room_id) {
            match handle
                .join(
                    member_id.clone(),
                    display_name.clone(),
                    wants_host,
                    conn.clone(),
                )
                .await
            {
                Ok(()) => {
                    if let Some(managed) = self.rooms.get_mut(&room_id) {
                        managed.live_members += 1;
                    }
                    return Ok(handle);
                }
                Err(_) => {
                    // The room actor died between lookup and send;
                    // replace it below.
                    warn!(
                        target: "coordinator.actor.registry",
                        "Room actor unreachable, recreating"
                    );
                    self.rooms.remove(&room_id);
                }
            }
        }

        // Create a fresh room.
        let handle = self.create_room(&room_id);
        handle
            .join(member_id, display_name, wants_host, conn)
            .await?;
        if let Some(managed) = self.rooms.get_mut(&room_id) {
            managed.live_members += 1;
        }
        Ok(handle)
    }

    /// Return the handle of an existing room whose task is still running.
    ///
    /// A room whose task already finished is reaped so the caller falls
    /// through to creation.
    fn live_room_handle(&mut self, room_id: &str) -> Option<RoomActorHandle> {
        let finished = self
            .rooms
            .get(room_id)
            .is_some_and(|m| m.task_handle.is_finished());
        if finished {
            debug!(
                target: "coordinator.actor.registry",
                coordinator_id = %self.coordinator_id,
                room_id = %room_id,
                "Reaping finished room actor on lookup"
            );
            self.rooms.remove(room_id);
            return None;
        }
        self.rooms.get(room_id).map(|m| m.handle.clone())
    }

    /// Spawn and register a new room actor.
    fn create_room(&mut self, room_id: &str) -> RoomActorHandle {
        debug!(
            target: "coordinator.actor.registry",
            coordinator_id = %self.coordinator_id,
            room_id = %room_id,
            "Creating new room actor"
        );

        let room_token = self.cancel_token.child_token();
        let (handle, task_handle) = RoomActor::spawn(
            room_id.to_string(),
            self.announce_interval,
            room_token,
            Arc::clone(&self.metrics),
        );

        self.rooms.insert(
            room_id.to_string(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
                live_members: 0,
            },
        );

        info!(
            target: "coordinator.actor.registry",
            coordinator_id = %self.coordinator_id,
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room actor created"
        );

        handle
    }

    /// Forward a leave and remove the room when it empties.
    async fn handle_disconnect(&mut self, room_id: &str, member_id: String) {
        let Some(managed) = self.rooms.get_mut(room_id) else {
            // Already removed; disconnects are idempotent.
            return;
        };

        let _ = managed.handle.leave(member_id).await;

        managed.live_members = managed.live_members.saturating_sub(1);
        let room_emptied = managed.live_members == 0;
        if room_emptied {
            self.remove_room(room_id);
        }
    }

    /// Remove a room whose member count reached zero. Idempotent.
    ///
    /// Initiates removal but does not block waiting for the room actor
    /// task to complete; cleanup is awaited in a background task so the
    /// registry message loop keeps draining.
    fn remove_room(&mut self, room_id: &str) {
        let Some(managed) = self.rooms.remove(room_id) else {
            return;
        };

        // Cancel the room actor; its token hierarchy also cancels the
        // ready-announcement task.
        managed.handle.cancel();

        let room_id_owned = room_id.to_string();
        let coordinator_id = self.coordinator_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(Duration::from_secs(5), managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "coordinator.actor.registry",
                        coordinator_id = %coordinator_id,
                        room_id = %room_id_owned,
                        "Room actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "coordinator.actor.registry",
                        coordinator_id = %coordinator_id,
                        room_id = %room_id_owned,
                        error = ?e,
                        "Room actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "coordinator.actor.registry",
                        coordinator_id = %coordinator_id,
                        room_id = %room_id_owned,
                        "Room actor task cleanup timed out"
                    );
                }
            }
        });

        info!(
            target: "coordinator.actor.registry",
            coordinator_id = %self.coordinator_id,
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room removed"
        );
    }

    /// Get current registry status.
    fn get_status(&self) -> RegistryStatus {
        RegistryStatus {
            room_count: self.rooms.len(),
            connection_count: self.metrics.connection_count(),
            is_draining: !self.accepting_new,
        }
    }

    /// Initiate graceful shutdown.
    fn initiate_shutdown(&mut self) {
        info!(
            target: "coordinator.actor.registry",
            coordinator_id = %self.coordinator_id,
            room_count = self.rooms.len(),
            "Initiating graceful shutdown"
        );

        // Stop accepting new connections
        self.accepting_new = false;

        // Cancel the root token (propagates to all children)
        self.cancel_token.cancel();
    }

    /// Perform graceful shutdown.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "coordinator.actor.registry",
            coordinator_id = %self.coordinator_id,
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        // Cancel all room actors (already done via parent token, but be explicit)
        for (room_id, managed) in &self.rooms {
            debug!(
                target: "coordinator.actor.registry",
                coordinator_id = %self.coordinator_id,
                room_id = %room_id,
                "Cancelling room actor"
            );
            managed.handle.cancel();
        }

        // Wait for all room tasks to complete
        for (room_id, managed) in self.rooms.drain() {
            match tokio::time::timeout(self.shutdown_grace, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "coordinator.actor.registry",
                        coordinator_id = %self.coordinator_id,
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "coordinator.actor.registry",
                        coordinator_id = %self.coordinator_id,
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "coordinator.actor.registry",
                        coordinator_id = %self.coordinator_id,
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
        }

        info!(
            target: "coordinator.actor.registry",
            coordinator_id = %self.coordinator_id,
            "Graceful shutdown complete"
        );
    }

    /// Check health of managed room actors.
    async fn check_room_health(&mut self) {
        let mut finished_rooms = Vec::new();

        for (room_id, managed) in &self.rooms {
            if managed.task_handle.is_finished() {
                warn!(
                    target: "coordinator.actor.registry",
                    coordinator_id = %self.coordinator_id,
                    room_id = %room_id,
                    "Room actor task finished unexpectedly"
                );
                finished_rooms.push(room_id.clone());
            }
        }

        for room_id in finished_rooms {
            if let Some(managed) = self.rooms.remove(&room_id) {
                match managed.task_handle.await {
                    Ok(()) => {
                        info!(
                            target: "coordinator.actor.registry",
                            coordinator_id = %self.coordinator_id,
                            room_id = %room_id,
                            "Room actor exited cleanly"
                        );
                    }
                    Err(join_error) => {
                        if join_error.is_panic() {
                            error!(
                                target: "coordinator.actor.registry",
                                coordinator_id = %self.coordinator_id,
                                room_id = %room_id,
                                error = ?join_error,
                                "Room actor panicked"
                            );
                            self.metrics.record_panic(ActorType::Room);
                        }
                    }
                }
            }
        }
    }
}
