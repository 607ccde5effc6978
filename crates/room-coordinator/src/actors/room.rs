//! `RoomActor` - per-room actor that owns all room state.
//!
//! Each `RoomActor`:
//! - Owns membership, host assignment, approval and call state for one room
//! - Serializes every mutation for its room through its mailbox
//! - Fans negotiation payloads out to approved members
//! - Owns the repeating `ready` announcement task
//!
//! # Host arbitration
//!
//! The first connection to claim host intent (or the first connection
//! into a hostless room) becomes host and is approved immediately.
//! Everyone else enters the approval flow and may not relay payloads or
//! count toward readiness until the host approves them. When the host
//! disconnects, the earliest-joined approved member is promoted;
//! if every remaining member is still pending, the earliest-joined one
//! is force-approved instead.
//!
//! # Readiness
//!
//! Negotiation is allowed to start once at least two approved members
//! have declared readiness and no call is active. The `ready` signal is
//! re-announced on a fixed interval so a peer that connected slightly
//! late still receives it; the announcement stops as soon as an answer
//! is relayed or the ready set shrinks below two.

use super::connection::ConnectionActorHandle;
use super::messages::{MemberInfo, RelayPayload, RoomMessage, RoomState};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::errors::CoordinatorError;

use signal_protocol::ServerEvent;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: String,
}

impl RoomActorHandle {
    /// Get the room ID.
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Enqueue a join for a new member connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the room actor has exited.
    pub async fn join(
        &self,
        member_id: String,
        display_name: String,
        wants_host: bool,
        conn: ConnectionActorHandle,
    ) -> Result<(), CoordinatorError> {
        self.send(RoomMessage::Join {
            member_id,
            display_name,
            wants_host,
            conn,
        })
        .await
    }

    /// Enqueue a leave for a departed member connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the room actor has exited.
    pub async fn leave(&self, member_id: String) -> Result<(), CoordinatorError> {
        self.send(RoomMessage::Leave { member_id }).await
    }

    /// Ask to approve a pending member. Ignored unless the sender is host.
    ///
    /// # Errors
    ///
    /// Returns an error if the room actor has exited.
    pub async fn approve_join(
        &self,
        sender_id: String,
        target_id: String,
    ) -> Result<(), CoordinatorError> {
        self.send(RoomMessage::ApproveJoin {
            sender_id,
            target_id,
        })
        .await
    }

    /// Relay an opaque negotiation payload from a member.
    ///
    /// # Errors
    ///
    /// Returns an error if the room actor has exited.
    pub async fn relay(
        &self,
        sender_id: String,
        payload: RelayPayload,
    ) -> Result<(), CoordinatorError> {
        self.send(RoomMessage::Relay { sender_id, payload }).await
    }

    /// Record a member's readiness declaration.
    ///
    /// # Errors
    ///
    /// Returns an error if the room actor has exited.
    pub async fn call_ready(&self, member_id: String, video: bool) -> Result<(), CoordinatorError> {
        self.send(RoomMessage::CallReady { member_id, video }).await
    }

    /// Record a member's call-ended declaration.
    ///
    /// # Errors
    ///
    /// Returns an error if the room actor has exited.
    pub async fn call_ended(&self, member_id: String) -> Result<(), CoordinatorError> {
        self.send(RoomMessage::CallEnded { member_id }).await
    }

    /// Get current room state.
    ///
    /// # Errors
    ///
    /// Returns an error if the room actor has exited.
    pub async fn get_state(&self) -> Result<RoomState, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::GetState { respond_to: tx }).await?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, message: RoomMessage) -> Result<(), CoordinatorError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))
    }
}

/// Approval state of a member.
///
/// Readiness only exists after approval, so "ready but not approved"
/// cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberPhase {
    /// Awaiting host approval.
    Pending,
    /// Approved to relay payloads and count toward readiness.
    Approved {
        /// Whether the member has declared local media ready.
        ready: bool,
    },
}

impl MemberPhase {
    const fn is_approved(self) -> bool {
        matches!(self, MemberPhase::Approved { .. })
    }

    const fn is_ready(self) -> bool {
        matches!(self, MemberPhase::Approved { ready: true })
    }
}

/// Member state within a room.
#[derive(Debug)]
struct Member {
    /// Member ID (transport-assigned).
    member_id: String,
    /// Display name.
    display_name: String,
    /// Approval / readiness state.
    phase: MemberPhase,
    /// Delivery handle for this member's connection.
    conn: ConnectionActorHandle,
    /// Join order, used for deterministic host promotion.
    seq: u64,
}

impl Member {
    fn to_info(&self) -> MemberInfo {
        MemberInfo {
            id: self.member_id.clone(),
            display_name: self.display_name.clone(),
            approved: self.phase.is_approved(),
            ready: self.phase.is_ready(),
        }
    }
}

/// Call lifecycle of a room.
///
/// `Announcing` owns the repeating announcement task, so an active call
/// and a running announcement cannot coexist, and at most one task
/// exists per room.
#[derive(Debug)]
enum CallPhase {
    /// Fewer than two ready members; no call.
    Idle,
    /// Two or more ready members; `ready` is being re-announced.
    Announcing(AnnounceTask),
    /// An answer has been relayed; negotiation succeeded.
    Active,
}

/// Cancellable handle to the repeating announcement task.
///
/// The spawned task exits as soon as this token fires; the token is a
/// child of the room's own token, so room teardown cancels it too.
#[derive(Debug)]
struct AnnounceTask {
    token: CancellationToken,
}

impl AnnounceTask {
    fn cancel(&self) {
        self.token.cancel();
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    /// Room ID.
    room_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<RoomMessage>,
    /// Sender back into this room's own mailbox (announcement ticks).
    self_sender: mpsc::Sender<RoomMessage>,
    /// Cancellation token (child of the registry's token).
    cancel_token: CancellationToken,
    /// Members by ID.
    members: HashMap<String, Member>,
    /// Join-order sequence for the next member.
    next_seq: u64,
    /// Current host member, if any.
    host_id: Option<String>,
    /// Call lifecycle state.
    call: CallPhase,
    /// Interval between repeated `ready` announcements.
    announce_interval: Duration,
    /// Room creation timestamp.
    created_at: i64,
    /// Shared actor metrics.
    metrics: Arc<ActorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        room_id: String,
        announce_interval: Duration,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            room_id: room_id.clone(),
            receiver,
            self_sender: sender.clone(),
            cancel_token: cancel_token.clone(),
            members: HashMap::new(),
            next_seq: 0,
            host_id: None,
            call: CallPhase::Idle,
            announce_interval,
            created_at: chrono::Utc::now().timestamp(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, &room_id),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "coordinator.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "coordinator.actor.room",
            room_id = %self.room_id,
            "RoomActor started"
        );

        self.metrics.room_created();

        loop {
            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "coordinator.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    self.shutdown();
                    break;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            debug!(
                                target: "coordinator.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            self.shutdown();
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.room_removed();

        info!(
            target: "coordinator.actor.room",
            room_id = %self.room_id,
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                member_id,
                display_name,
                wants_host,
                conn,
            } => {
                self.handle_join(member_id, display_name, wants_host, conn);
            }

            RoomMessage::Leave { member_id } => {
                self.handle_leave(&member_id);
            }

            RoomMessage::ApproveJoin {
                sender_id,
                target_id,
            } => {
                self.handle_approve(&sender_id, &target_id);
            }

            RoomMessage::Relay { sender_id, payload } => {
                self.handle_relay(&sender_id, payload);
            }

            RoomMessage::CallReady { member_id, video } => {
                self.handle_call_ready(&member_id, video);
            }

            RoomMessage::CallEnded { member_id } => {
                self.handle_call_ended(&member_id);
            }

            RoomMessage::AnnounceTick => {
                self.handle_announce_tick();
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.get_state());
            }
        }
    }

    /// Handle a new member joining.
    #[instrument(skip_all, fields(room_id = %self.room_id, member_id = %member_id))]
    fn handle_join(
        &mut self,
        member_id: String,
        display_name: String,
        wants_host: bool,
        conn: ConnectionActorHandle,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;

        // Host assignment: claim with intent, or inherit a hostless room.
        let becomes_host = self.host_id.is_none();

        let phase = if becomes_host {
            MemberPhase::Approved { ready: false }
        } else {
            MemberPhase::Pending
        };

        let member = Member {
            member_id: member_id.clone(),
            display_name: display_name.clone(),
            phase,
            conn,
            seq,
        };
        self.members.insert(member_id.clone(), member);

        if becomes_host {
            self.host_id = Some(member_id.clone());
            self.broadcast_host_status();
            self.deliver_to(&member_id, ServerEvent::JoinApproved);

            info!(
                target: "coordinator.actor.room",
                wanted_host = wants_host,
                "Member joined as host"
            );
        } else {
            // Guest: enters the approval flow.
            self.deliver_to(&member_id, ServerEvent::Host { is_host: false });

            if let Some(host_id) = self.host_id.clone() {
                self.deliver_to(
                    &host_id,
                    ServerEvent::JoinRequest {
                        id: member_id.clone(),
                        name: display_name,
                    },
                );
            }
            self.deliver_to(&member_id, ServerEvent::WaitingApproval);

            info!(
                target: "coordinator.actor.room",
                "Member joined as guest, awaiting approval"
            );
        }

        // Initiator signal: sole approved participant at connect time.
        let is_initiator = self
            .members
            .get(&member_id)
            .is_some_and(|m| m.phase.is_approved())
            && self.approved_count() == 1;
        self.deliver_to(&member_id, ServerEvent::Init { is_initiator });

        self.broadcast_participants();
        self.evaluate_readiness();
    }

    /// Handle a member leaving.
    #[instrument(skip_all, fields(room_id = %self.room_id, member_id = %member_id))]
    fn handle_leave(&mut self, member_id: &str) {
        let Some(member) = self.members.remove(member_id) else {
            return;
        };
        member.conn.cancel();

        if self.members.is_empty() {
            // No recipients remain; the registry tears this room down.
            self.host_id = None;
            self.set_call_idle();
            info!(
                target: "coordinator.actor.room",
                "Last member left"
            );
            return;
        }

        // A departing guest's unresolved request no longer needs action.
        if !member.phase.is_approved() {
            if let Some(host_id) = self.host_id.clone() {
                self.deliver_to(
                    &host_id,
                    ServerEvent::JoinRequestResolved {
                        id: member_id.to_string(),
                    },
                );
            }
        }

        if self.host_id.as_deref() == Some(member_id) {
            self.host_id = None;
            self.promote_host();
        }

        self.broadcast_participants();
        self.evaluate_readiness();

        // Remaining peers tear down stale negotiation state.
        for m in self.members.values() {
            m.conn.deliver(ServerEvent::PeerLeft);
        }

        info!(
            target: "coordinator.actor.room",
            remaining_members = self.members.len(),
            "Member left"
        );
    }

    /// Promote a replacement host after the current host departed.
    ///
    /// Prefers the earliest-joined approved member so the approval flow
    /// does not rerun; force-approves the earliest-joined member only
    /// when every remaining member is still pending.
    fn promote_host(&mut self) {
        let new_host_id = self
            .members
            .values()
            .filter(|m| m.phase.is_approved())
            .min_by_key(|m| m.seq)
            .or_else(|| self.members.values().min_by_key(|m| m.seq))
            .map(|m| m.member_id.clone());

        let Some(new_host_id) = new_host_id else {
            return;
        };

        if let Some(member) = self.members.get_mut(&new_host_id) {
            if !member.phase.is_approved() {
                member.phase = MemberPhase::Approved { ready: false };
                debug!(
                    target: "coordinator.actor.room",
                    room_id = %self.room_id,
                    member_id = %new_host_id,
                    "Force-approved promoted host"
                );
            }
        }

        self.host_id = Some(new_host_id.clone());
        self.broadcast_host_status();
        self.deliver_to(&new_host_id, ServerEvent::PromotedHost);

        info!(
            target: "coordinator.actor.room",
            room_id = %self.room_id,
            member_id = %new_host_id,
            "Promoted new host"
        );
    }

    /// Handle an approval request from a member.
    fn handle_approve(&mut self, sender_id: &str, target_id: &str) {
        // Only the host may approve; everyone else is silently ignored.
        if self.host_id.as_deref() != Some(sender_id) {
            debug!(
                target: "coordinator.actor.room",
                room_id = %self.room_id,
                sender_id = %sender_id,
                "Approval from non-host ignored"
            );
            return;
        }

        let Some(target) = self.members.get_mut(target_id) else {
            return;
        };
        if target.phase.is_approved() {
            return;
        }

        target.phase = MemberPhase::Approved { ready: false };
        self.deliver_to(target_id, ServerEvent::JoinApproved);
        self.deliver_to(
            sender_id,
            ServerEvent::JoinRequestResolved {
                id: target_id.to_string(),
            },
        );

        info!(
            target: "coordinator.actor.room",
            room_id = %self.room_id,
            member_id = %target_id,
            "Member approved"
        );

        self.broadcast_participants();
        self.evaluate_readiness();
    }

    /// Relay an opaque payload to every other member.
    fn handle_relay(&mut self, sender_id: &str, payload: RelayPayload) {
        let approved = self
            .members
            .get(sender_id)
            .is_some_and(|m| m.phase.is_approved());
        if !approved {
            // Silent drop: an unapproved sender learns nothing.
            debug!(
                target: "coordinator.actor.room",
                room_id = %self.room_id,
                sender_id = %sender_id,
                event = payload.label(),
                "Relay from unapproved sender dropped"
            );
            return;
        }

        let is_answer = matches!(payload, RelayPayload::Answer(_));
        let event = payload.into_event();

        for (id, member) in &self.members {
            if id != sender_id {
                member.conn.deliver(event.clone());
            }
        }

        if is_answer {
            // Negotiation succeeded; stop interrupting it.
            self.set_call_active();
        }
    }

    /// Handle a member's readiness declaration.
    fn handle_call_ready(&mut self, member_id: &str, video: bool) {
        let Some(member) = self.members.get_mut(member_id) else {
            return;
        };

        match member.phase {
            MemberPhase::Pending => {
                // Readiness only exists after approval; the client
                // re-declares once approved.
                debug!(
                    target: "coordinator.actor.room",
                    room_id = %self.room_id,
                    member_id = %member_id,
                    "Readiness from pending member dropped"
                );
                return;
            }
            MemberPhase::Approved { .. } => {
                member.phase = MemberPhase::Approved { ready: true };
            }
        }

        debug!(
            target: "coordinator.actor.room",
            room_id = %self.room_id,
            member_id = %member_id,
            video = video,
            "Member declared ready"
        );

        // Re-announcing readiness implies any prior call is over.
        if matches!(self.call, CallPhase::Active) {
            self.call = CallPhase::Idle;
        }
        self.evaluate_readiness();
    }

    /// Handle a member's call-ended declaration.
    fn handle_call_ended(&mut self, member_id: &str) {
        let Some(member) = self.members.get_mut(member_id) else {
            return;
        };

        if member.phase.is_approved() {
            member.phase = MemberPhase::Approved { ready: false };
        }

        debug!(
            target: "coordinator.actor.room",
            room_id = %self.room_id,
            member_id = %member_id,
            "Member ended call"
        );

        self.set_call_idle();
        self.evaluate_readiness();
    }

    /// Recompute the ready set and drive the call lifecycle.
    fn evaluate_readiness(&mut self) {
        let ready_ids: Vec<String> = self
            .members
            .values()
            .filter(|m| m.phase.is_ready())
            .map(|m| m.member_id.clone())
            .collect();

        if ready_ids.len() < 2 {
            // A departed or withdrawn peer always ends the active state.
            self.set_call_idle();
            return;
        }

        if !matches!(self.call, CallPhase::Active) {
            self.emit_ready(&ready_ids);
            self.restart_announce();
        }
    }

    /// Emit `ready` to every member of the ready set.
    fn emit_ready(&self, ready_ids: &[String]) {
        for id in ready_ids {
            self.deliver_to(id, ServerEvent::Ready);
        }
    }

    /// Periodic announcement tick: re-emit `ready` while still relevant.
    fn handle_announce_tick(&mut self) {
        if !matches!(self.call, CallPhase::Announcing(_)) {
            // Stale tick from a task cancelled after enqueueing.
            return;
        }

        let ready_ids: Vec<String> = self
            .members
            .values()
            .filter(|m| m.phase.is_ready())
            .map(|m| m.member_id.clone())
            .collect();

        if ready_ids.len() >= 2 {
            self.emit_ready(&ready_ids);
        }
    }

    /// Start (or restart) the repeating announcement task.
    ///
    /// At most one task exists per room; any previous task is cancelled
    /// first. The task is a child of the room's cancellation token, so
    /// room teardown cancels it as well.
    fn restart_announce(&mut self) {
        self.set_call_idle();

        let token = self.cancel_token.child_token();
        let sender = self.self_sender.clone();
        let period = self.announce_interval;
        let task_token = token.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; the initial `ready` was
            // already emitted synchronously.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if sender.send(RoomMessage::AnnounceTick).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        self.call = CallPhase::Announcing(AnnounceTask { token });
    }

    /// Transition to `Idle`, cancelling any announcement.
    fn set_call_idle(&mut self) {
        if let CallPhase::Announcing(task) = std::mem::replace(&mut self.call, CallPhase::Idle) {
            task.cancel();
        }
    }

    /// Transition to `Active`, cancelling any announcement.
    fn set_call_active(&mut self) {
        if let CallPhase::Announcing(task) = std::mem::replace(&mut self.call, CallPhase::Active) {
            task.cancel();
        }
    }

    /// Number of approved members.
    fn approved_count(&self) -> usize {
        self.members
            .values()
            .filter(|m| m.phase.is_approved())
            .count()
    }

    /// Broadcast the approved-participant count to the whole room.
    fn broadcast_participants(&self) {
        let count = self.approved_count();
        for member in self.members.values() {
            member
                .conn
                .deliver(ServerEvent::Participants { count });
        }
    }

    /// Broadcast each member's own host status (never a third party's).
    fn broadcast_host_status(&self) {
        for member in self.members.values() {
            let is_host = self.host_id.as_deref() == Some(member.member_id.as_str());
            member.conn.deliver(ServerEvent::Host { is_host });
        }
    }

    /// Deliver an event to a single member, if present.
    fn deliver_to(&self, member_id: &str, event: ServerEvent) {
        if let Some(member) = self.members.get(member_id) {
            member.conn.deliver(event);
        }
    }

    /// Get current room state.
    fn get_state(&self) -> RoomState {
        let mut members: Vec<&Member> = self.members.values().collect();
        members.sort_by_key(|m| m.seq);

        RoomState {
            room_id: self.room_id.clone(),
            host_id: self.host_id.clone(),
            members: members.into_iter().map(Member::to_info).collect(),
            call_active: matches!(self.call, CallPhase::Active),
            announcing: matches!(self.call, CallPhase::Announcing(_)),
            created_at: self.created_at,
        }
    }

    /// Tear down on cancellation: stop the announcement, drop the peers.
    fn shutdown(&mut self) {
        self.set_call_idle();
        for member in self.members.values() {
            member.conn.cancel();
        }
        self.members.clear();
        self.host_id = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::messages::ConnectionMessage;
    use serde_json::json;
    use tokio::sync::mpsc::Receiver;

    const ANNOUNCE: Duration = Duration::from_secs(2);

    fn spawn_room(room_id: &str) -> (RoomActorHandle, JoinHandle<()>) {
        RoomActor::spawn(
            room_id.to_string(),
            ANNOUNCE,
            CancellationToken::new(),
            ActorMetrics::new(),
        )
    }

    /// Drain every event currently queued for a test connection.
    fn drain(rx: &mut Receiver<ConnectionMessage>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let ConnectionMessage::Deliver { event } = msg {
                events.push(event);
            }
        }
        events
    }

    async fn settle(handle: &RoomActorHandle) {
        // A state round-trip guarantees all prior messages were handled.
        let _ = handle.get_state().await.unwrap();
    }

    #[tokio::test]
    async fn test_first_member_with_host_intent_becomes_host() {
        let (room, _task) = spawn_room("demo");
        let (conn, mut rx) = ConnectionActorHandle::for_test("a");

        room.join("a".to_string(), "Ada".to_string(), true, conn)
            .await
            .unwrap();
        settle(&room).await;

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                ServerEvent::Host { is_host: true },
                ServerEvent::JoinApproved,
                ServerEvent::Init { is_initiator: true },
                ServerEvent::Participants { count: 1 },
            ]
        );

        let state = room.get_state().await.unwrap();
        assert_eq!(state.host_id.as_deref(), Some("a"));
        room.cancel();
    }

    #[tokio::test]
    async fn test_first_member_without_intent_still_becomes_host() {
        let (room, _task) = spawn_room("demo");
        let (conn, mut rx) = ConnectionActorHandle::for_test("a");

        room.join("a".to_string(), "Ada".to_string(), false, conn)
            .await
            .unwrap();
        settle(&room).await;

        let events = drain(&mut rx);
        assert!(events.contains(&ServerEvent::Host { is_host: true }));
        assert!(events.contains(&ServerEvent::Init { is_initiator: true }));
        room.cancel();
    }

    #[tokio::test]
    async fn test_guest_enters_approval_flow() {
        let (room, _task) = spawn_room("demo");
        let (host_conn, mut host_rx) = ConnectionActorHandle::for_test("a");
        let (guest_conn, mut guest_rx) = ConnectionActorHandle::for_test("b");

        room.join("a".to_string(), "Ada".to_string(), true, host_conn)
            .await
            .unwrap();
        settle(&room).await;
        drain(&mut host_rx);

        room.join("b".to_string(), "Bea".to_string(), false, guest_conn)
            .await
            .unwrap();
        settle(&room).await;

        let guest_events = drain(&mut guest_rx);
        assert_eq!(
            guest_events,
            vec![
                ServerEvent::Host { is_host: false },
                ServerEvent::WaitingApproval,
                ServerEvent::Init {
                    is_initiator: false
                },
                ServerEvent::Participants { count: 1 },
            ]
        );

        let host_events = drain(&mut host_rx);
        assert!(host_events.contains(&ServerEvent::JoinRequest {
            id: "b".to_string(),
            name: "Bea".to_string(),
        }));

        // Pending members do not count toward the participant total.
        let state = room.get_state().await.unwrap();
        assert_eq!(state.approved_count(), 1);
        room.cancel();
    }

    #[tokio::test]
    async fn test_approve_join_notifies_and_recounts() {
        let (room, _task) = spawn_room("demo");
        let (host_conn, mut host_rx) = ConnectionActorHandle::for_test("a");
        let (guest_conn, mut guest_rx) = ConnectionActorHandle::for_test("b");

        room.join("a".to_string(), "Ada".to_string(), true, host_conn)
            .await
            .unwrap();
        room.join("b".to_string(), "Bea".to_string(), false, guest_conn)
            .await
            .unwrap();
        settle(&room).await;
        drain(&mut host_rx);
        drain(&mut guest_rx);

        room.approve_join("a".to_string(), "b".to_string())
            .await
            .unwrap();
        settle(&room).await;

        let guest_events = drain(&mut guest_rx);
        assert!(guest_events.contains(&ServerEvent::JoinApproved));
        assert!(guest_events.contains(&ServerEvent::Participants { count: 2 }));

        let host_events = drain(&mut host_rx);
        assert!(host_events.contains(&ServerEvent::JoinRequestResolved {
            id: "b".to_string()
        }));
        room.cancel();
    }

    #[tokio::test]
    async fn test_approve_join_idempotent_and_host_gated() {
        let (room, _task) = spawn_room("demo");
        let (host_conn, mut host_rx) = ConnectionActorHandle::for_test("a");
        let (guest_conn, mut guest_rx) = ConnectionActorHandle::for_test("b");
        let (other_conn, mut other_rx) = ConnectionActorHandle::for_test("c");

        room.join("a".to_string(), "Ada".to_string(), true, host_conn)
            .await
            .unwrap();
        room.join("b".to_string(), "Bea".to_string(), false, guest_conn)
            .await
            .unwrap();
        room.join("c".to_string(), "Cal".to_string(), false, other_conn)
            .await
            .unwrap();
        settle(&room).await;

        // Non-host approval attempt: silent no-op.
        room.approve_join("c".to_string(), "b".to_string())
            .await
            .unwrap();
        settle(&room).await;
        let state = room.get_state().await.unwrap();
        assert_eq!(state.approved_count(), 1);

        drain(&mut host_rx);
        drain(&mut guest_rx);
        drain(&mut other_rx);

        // First approval takes effect.
        room.approve_join("a".to_string(), "b".to_string())
            .await
            .unwrap();
        settle(&room).await;
        assert_eq!(drain(&mut guest_rx).iter().filter(|e| **e == ServerEvent::JoinApproved).count(), 1);
        drain(&mut host_rx);

        // Second approval of the same target: no further notifications.
        room.approve_join("a".to_string(), "b".to_string())
            .await
            .unwrap();
        settle(&room).await;
        assert!(drain(&mut guest_rx).is_empty());

        // Unknown target: silent no-op.
        room.approve_join("a".to_string(), "ghost".to_string())
            .await
            .unwrap();
        settle(&room).await;
        assert!(drain(&mut host_rx).iter().all(|e| !matches!(e, ServerEvent::JoinRequestResolved { .. })));
        room.cancel();
    }

    #[tokio::test]
    async fn test_unapproved_relay_is_silently_dropped() {
        let (room, _task) = spawn_room("demo");
        let (host_conn, mut host_rx) = ConnectionActorHandle::for_test("a");
        let (guest_conn, mut guest_rx) = ConnectionActorHandle::for_test("b");

        room.join("a".to_string(), "Ada".to_string(), true, host_conn)
            .await
            .unwrap();
        room.join("b".to_string(), "Bea".to_string(), false, guest_conn)
            .await
            .unwrap();
        settle(&room).await;
        drain(&mut host_rx);
        drain(&mut guest_rx);

        room.relay(
            "b".to_string(),
            RelayPayload::Offer(json!({"sdp": "blocked"})),
        )
        .await
        .unwrap();
        settle(&room).await;

        assert!(drain(&mut host_rx).is_empty());
        // Nothing is surfaced to the offending sender either.
        assert!(drain(&mut guest_rx).is_empty());
        room.cancel();
    }

    #[tokio::test]
    async fn test_relay_fans_out_to_other_members_verbatim() {
        let (room, _task) = spawn_room("demo");
        let (host_conn, mut host_rx) = ConnectionActorHandle::for_test("a");
        let (guest_conn, mut guest_rx) = ConnectionActorHandle::for_test("b");

        room.join("a".to_string(), "Ada".to_string(), true, host_conn)
            .await
            .unwrap();
        room.join("b".to_string(), "Bea".to_string(), false, guest_conn)
            .await
            .unwrap();
        room.approve_join("a".to_string(), "b".to_string())
            .await
            .unwrap();
        settle(&room).await;
        drain(&mut host_rx);
        drain(&mut guest_rx);

        let payload = json!({"type": "offer", "sdp": "v=0"});
        room.relay("a".to_string(), RelayPayload::Offer(payload.clone()))
            .await
            .unwrap();
        settle(&room).await;

        let guest_events = drain(&mut guest_rx);
        assert_eq!(guest_events, vec![ServerEvent::Offer(payload)]);
        // Sender receives nothing back.
        assert!(drain(&mut host_rx).is_empty());
        room.cancel();
    }

    #[tokio::test]
    async fn test_ready_emitted_when_two_approved_members_ready() {
        let (room, _task) = spawn_room("demo");
        let (host_conn, mut host_rx) = ConnectionActorHandle::for_test("a");
        let (guest_conn, mut guest_rx) = ConnectionActorHandle::for_test("b");

        room.join("a".to_string(), "Ada".to_string(), true, host_conn)
            .await
            .unwrap();
        room.join("b".to_string(), "Bea".to_string(), false, guest_conn)
            .await
            .unwrap();
        room.approve_join("a".to_string(), "b".to_string())
            .await
            .unwrap();

        room.call_ready("a".to_string(), true).await.unwrap();
        settle(&room).await;
        drain(&mut host_rx);
        drain(&mut guest_rx);

        // One ready member is not enough.
        let state = room.get_state().await.unwrap();
        assert!(!state.announcing);

        room.call_ready("b".to_string(), true).await.unwrap();
        settle(&room).await;

        assert!(drain(&mut host_rx).contains(&ServerEvent::Ready));
        assert!(drain(&mut guest_rx).contains(&ServerEvent::Ready));

        let state = room.get_state().await.unwrap();
        assert!(state.announcing);
        assert!(!state.call_active);
        room.cancel();
    }

    #[tokio::test]
    async fn test_pending_member_call_ready_is_dropped() {
        let (room, _task) = spawn_room("demo");
        let (host_conn, _host_rx) = ConnectionActorHandle::for_test("a");
        let (guest_conn, _guest_rx) = ConnectionActorHandle::for_test("b");

        room.join("a".to_string(), "Ada".to_string(), true, host_conn)
            .await
            .unwrap();
        room.join("b".to_string(), "Bea".to_string(), false, guest_conn)
            .await
            .unwrap();

        room.call_ready("b".to_string(), true).await.unwrap();
        let state = room.get_state().await.unwrap();

        let guest = state.members.iter().find(|m| m.id == "b").unwrap();
        assert!(!guest.approved);
        assert!(!guest.ready);
        room.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_reannounced_on_interval() {
        let (room, _task) = spawn_room("demo");
        let (host_conn, mut host_rx) = ConnectionActorHandle::for_test("a");
        let (guest_conn, mut guest_rx) = ConnectionActorHandle::for_test("b");

        room.join("a".to_string(), "Ada".to_string(), true, host_conn)
            .await
            .unwrap();
        room.join("b".to_string(), "Bea".to_string(), false, guest_conn)
            .await
            .unwrap();
        room.approve_join("a".to_string(), "b".to_string())
            .await
            .unwrap();
        room.call_ready("a".to_string(), false).await.unwrap();
        room.call_ready("b".to_string(), false).await.unwrap();
        settle(&room).await;
        drain(&mut host_rx);
        drain(&mut guest_rx);

        // Two announcement periods elapse.
        tokio::time::advance(ANNOUNCE).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        settle(&room).await;
        let first = drain(&mut guest_rx);
        assert!(first.contains(&ServerEvent::Ready));

        tokio::time::advance(ANNOUNCE).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        settle(&room).await;
        let second = drain(&mut guest_rx);
        assert!(second.contains(&ServerEvent::Ready));
        room.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_marks_call_active_and_stops_announcing() {
        let (room, _task) = spawn_room("demo");
        let (host_conn, mut host_rx) = ConnectionActorHandle::for_test("a");
        let (guest_conn, mut guest_rx) = ConnectionActorHandle::for_test("b");

        room.join("a".to_string(), "Ada".to_string(), true, host_conn)
            .await
            .unwrap();
        room.join("b".to_string(), "Bea".to_string(), false, guest_conn)
            .await
            .unwrap();
        room.approve_join("a".to_string(), "b".to_string())
            .await
            .unwrap();
        room.call_ready("a".to_string(), true).await.unwrap();
        room.call_ready("b".to_string(), true).await.unwrap();

        room.relay("b".to_string(), RelayPayload::Answer(json!({"sdp": "v=0"})))
            .await
            .unwrap();
        settle(&room).await;

        let state = room.get_state().await.unwrap();
        assert!(state.call_active);
        assert!(!state.announcing);

        drain(&mut host_rx);
        drain(&mut guest_rx);

        // No further ready announcements while the call is active.
        tokio::time::advance(ANNOUNCE).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        settle(&room).await;
        assert!(!drain(&mut host_rx).contains(&ServerEvent::Ready));
        assert!(!drain(&mut guest_rx).contains(&ServerEvent::Ready));
        room.cancel();
    }

    #[tokio::test]
    async fn test_call_ended_triggers_renegotiation_signal() {
        let (room, _task) = spawn_room("demo");
        let (host_conn, mut host_rx) = ConnectionActorHandle::for_test("a");
        let (guest_conn, mut guest_rx) = ConnectionActorHandle::for_test("b");

        room.join("a".to_string(), "Ada".to_string(), true, host_conn)
            .await
            .unwrap();
        room.join("b".to_string(), "Bea".to_string(), false, guest_conn)
            .await
            .unwrap();
        room.approve_join("a".to_string(), "b".to_string())
            .await
            .unwrap();
        room.call_ready("a".to_string(), true).await.unwrap();
        room.call_ready("b".to_string(), true).await.unwrap();
        room.relay("b".to_string(), RelayPayload::Answer(json!({})))
            .await
            .unwrap();
        settle(&room).await;

        // Guest hangs up, then declares ready again alongside the host.
        room.call_ended("b".to_string()).await.unwrap();
        settle(&room).await;
        let state = room.get_state().await.unwrap();
        assert!(!state.call_active);

        drain(&mut host_rx);
        drain(&mut guest_rx);

        room.call_ready("b".to_string(), true).await.unwrap();
        settle(&room).await;

        // Both already-ready members get a fresh ready signal.
        assert!(drain(&mut host_rx).contains(&ServerEvent::Ready));
        assert!(drain(&mut guest_rx).contains(&ServerEvent::Ready));
        room.cancel();
    }

    #[tokio::test]
    async fn test_never_ready_member_leaving_keeps_call_active() {
        let (room, _task) = spawn_room("demo");
        let (a_conn, _a_rx) = ConnectionActorHandle::for_test("a");
        let (b_conn, _b_rx) = ConnectionActorHandle::for_test("b");
        let (c_conn, _c_rx) = ConnectionActorHandle::for_test("c");

        room.join("a".to_string(), "Ada".to_string(), true, a_conn)
            .await
            .unwrap();
        room.join("b".to_string(), "Bea".to_string(), false, b_conn)
            .await
            .unwrap();
        room.join("c".to_string(), "Cal".to_string(), false, c_conn)
            .await
            .unwrap();
        room.approve_join("a".to_string(), "b".to_string())
            .await
            .unwrap();
        room.approve_join("a".to_string(), "c".to_string())
            .await
            .unwrap();
        room.call_ready("a".to_string(), true).await.unwrap();
        room.call_ready("b".to_string(), true).await.unwrap();
        room.relay("b".to_string(), RelayPayload::Answer(json!({})))
            .await
            .unwrap();
        settle(&room).await;

        // The never-ready third member leaves; two ready members remain.
        room.leave("c".to_string()).await.unwrap();
        settle(&room).await;

        let state = room.get_state().await.unwrap();
        assert!(state.call_active);
        room.cancel();
    }

    #[tokio::test]
    async fn test_ready_member_leaving_clears_active_call() {
        let (room, _task) = spawn_room("demo");
        let (a_conn, _a_rx) = ConnectionActorHandle::for_test("a");
        let (b_conn, _b_rx) = ConnectionActorHandle::for_test("b");

        room.join("a".to_string(), "Ada".to_string(), true, a_conn)
            .await
            .unwrap();
        room.join("b".to_string(), "Bea".to_string(), false, b_conn)
            .await
            .unwrap();
        room.approve_join("a".to_string(), "b".to_string())
            .await
            .unwrap();
        room.call_ready("a".to_string(), true).await.unwrap();
        room.call_ready("b".to_string(), true).await.unwrap();
        room.relay("b".to_string(), RelayPayload::Answer(json!({})))
            .await
            .unwrap();

        room.leave("b".to_string()).await.unwrap();
        settle(&room).await;

        let state = room.get_state().await.unwrap();
        assert!(!state.call_active);
        assert!(!state.announcing);
        room.cancel();
    }

    #[tokio::test]
    async fn test_host_disconnect_promotes_approved_member() {
        let (room, _task) = spawn_room("demo");
        let (a_conn, _a_rx) = ConnectionActorHandle::for_test("a");
        let (b_conn, mut b_rx) = ConnectionActorHandle::for_test("b");
        let (c_conn, mut c_rx) = ConnectionActorHandle::for_test("c");

        room.join("a".to_string(), "Ada".to_string(), true, a_conn)
            .await
            .unwrap();
        room.join("b".to_string(), "Bea".to_string(), false, b_conn)
            .await
            .unwrap();
        room.join("c".to_string(), "Cal".to_string(), false, c_conn)
            .await
            .unwrap();
        // Only the later-joined guest is approved.
        room.approve_join("a".to_string(), "c".to_string())
            .await
            .unwrap();
        settle(&room).await;
        drain(&mut b_rx);
        drain(&mut c_rx);

        room.leave("a".to_string()).await.unwrap();
        settle(&room).await;

        // The approved member wins over the earlier-joined pending one.
        let state = room.get_state().await.unwrap();
        assert_eq!(state.host_id.as_deref(), Some("c"));

        let c_events = drain(&mut c_rx);
        assert!(c_events.contains(&ServerEvent::PromotedHost));
        assert!(c_events.contains(&ServerEvent::Host { is_host: true }));
        assert!(c_events.contains(&ServerEvent::PeerLeft));

        let b_events = drain(&mut b_rx);
        assert!(b_events.contains(&ServerEvent::Host { is_host: false }));
        assert!(b_events.contains(&ServerEvent::PeerLeft));
        room.cancel();
    }

    #[tokio::test]
    async fn test_host_disconnect_force_approves_when_all_pending() {
        let (room, _task) = spawn_room("demo");
        let (a_conn, _a_rx) = ConnectionActorHandle::for_test("a");
        let (b_conn, mut b_rx) = ConnectionActorHandle::for_test("b");
        let (c_conn, _c_rx) = ConnectionActorHandle::for_test("c");

        room.join("a".to_string(), "Ada".to_string(), true, a_conn)
            .await
            .unwrap();
        room.join("b".to_string(), "Bea".to_string(), false, b_conn)
            .await
            .unwrap();
        room.join("c".to_string(), "Cal".to_string(), false, c_conn)
            .await
            .unwrap();
        settle(&room).await;
        drain(&mut b_rx);

        room.leave("a".to_string()).await.unwrap();
        settle(&room).await;

        // Earliest-joined pending member is force-approved and promoted.
        let state = room.get_state().await.unwrap();
        assert_eq!(state.host_id.as_deref(), Some("b"));
        let b = state.members.iter().find(|m| m.id == "b").unwrap();
        assert!(b.approved);

        let b_events = drain(&mut b_rx);
        assert!(b_events.contains(&ServerEvent::PromotedHost));
        room.cancel();
    }

    #[tokio::test]
    async fn test_pending_member_disconnect_withdraws_request() {
        let (room, _task) = spawn_room("demo");
        let (a_conn, mut a_rx) = ConnectionActorHandle::for_test("a");
        let (b_conn, _b_rx) = ConnectionActorHandle::for_test("b");

        room.join("a".to_string(), "Ada".to_string(), true, a_conn)
            .await
            .unwrap();
        room.join("b".to_string(), "Bea".to_string(), false, b_conn)
            .await
            .unwrap();
        settle(&room).await;
        drain(&mut a_rx);

        room.leave("b".to_string()).await.unwrap();
        settle(&room).await;

        let a_events = drain(&mut a_rx);
        assert!(a_events.contains(&ServerEvent::JoinRequestResolved {
            id: "b".to_string()
        }));
        room.cancel();
    }

    #[tokio::test]
    async fn test_participant_count_tracks_approved_members() {
        let (room, _task) = spawn_room("demo");
        let (a_conn, mut a_rx) = ConnectionActorHandle::for_test("a");
        let (b_conn, _b_rx) = ConnectionActorHandle::for_test("b");

        room.join("a".to_string(), "Ada".to_string(), true, a_conn)
            .await
            .unwrap();
        room.join("b".to_string(), "Bea".to_string(), false, b_conn)
            .await
            .unwrap();
        settle(&room).await;

        // Guest joined but is pending: count stays at 1.
        let counts: Vec<usize> = drain(&mut a_rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::Participants { count } => Some(count),
                _ => None,
            })
            .collect();
        assert_eq!(counts, vec![1, 1]);

        room.approve_join("a".to_string(), "b".to_string())
            .await
            .unwrap();
        settle(&room).await;

        let counts: Vec<usize> = drain(&mut a_rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::Participants { count } => Some(count),
                _ => None,
            })
            .collect();
        assert_eq!(counts, vec![2]);
        room.cancel();
    }

    #[tokio::test]
    async fn test_cancellation_cancels_member_connections() {
        let cancel_token = CancellationToken::new();
        let (room, task) = RoomActor::spawn(
            "demo".to_string(),
            ANNOUNCE,
            cancel_token.clone(),
            ActorMetrics::new(),
        );
        let (conn, _rx) = ConnectionActorHandle::for_test("a");

        room.join("a".to_string(), "Ada".to_string(), true, conn.clone())
            .await
            .unwrap();
        settle(&room).await;

        cancel_token.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert!(conn.is_cancelled());
    }
}
