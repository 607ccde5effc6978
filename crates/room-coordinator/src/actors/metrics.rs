//! Actor metrics and mailbox monitoring.
//!
//! Provides mailbox depth monitoring with configurable thresholds:
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Room       | < 100  | 100-500 | > 500    |
//! | Connection | < 50   | 50-200  | > 200    |
//!
//! Broadcast delivery is fire-and-forget; a full connection mailbox
//! counts a drop here instead of applying backpressure to room logic.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for room actors.
pub const ROOM_MAILBOX_NORMAL: usize = 100;
pub const ROOM_MAILBOX_WARNING: usize = 500;

/// Mailbox depth thresholds for connection actors.
pub const CONNECTION_MAILBOX_NORMAL: usize = 50;
pub const CONNECTION_MAILBOX_WARNING: usize = 200;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `RoomRegistryActor` (singleton).
    Registry,
    /// `RoomActor` (one per room).
    Room,
    /// `ConnectionActor` (one per WebSocket connection).
    Connection,
}

impl ActorType {
    /// Returns the actor type as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Registry => "registry",
            ActorType::Room => "room",
            ActorType::Connection => "connection",
        }
    }

    /// Returns the warning threshold for this actor type.
    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Registry | ActorType::Room => ROOM_MAILBOX_WARNING,
            ActorType::Connection => CONNECTION_MAILBOX_WARNING,
        }
    }

    /// Returns the normal threshold for this actor type.
    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Registry | ActorType::Room => ROOM_MAILBOX_NORMAL,
            ActorType::Connection => CONNECTION_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Mailbox monitor for tracking queue depth and emitting metrics.
#[derive(Debug)]
pub struct MailboxMonitor {
    /// Actor type for labeling.
    actor_type: ActorType,
    /// Actor identifier (room id, connection id, etc.).
    actor_id: String,
    /// Current mailbox depth.
    depth: AtomicUsize,
    /// Peak mailbox depth since last reset.
    peak_depth: AtomicUsize,
    /// Total messages processed.
    messages_processed: AtomicU64,
    /// Messages dropped by fire-and-forget delivery.
    messages_dropped: AtomicU64,
}

impl MailboxMonitor {
    /// Create a new mailbox monitor for the given actor.
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;

        // Update peak if necessary
        let mut current_peak = self.peak_depth.load(Ordering::Relaxed);
        while new_depth > current_peak {
            match self.peak_depth.compare_exchange_weak(
                current_peak,
                new_depth,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_peak = actual,
            }
        }

        // Check thresholds and log warnings
        let level = self.level_for_depth(new_depth);
        if level == MailboxLevel::Critical {
            warn!(
                target: "coordinator.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                threshold = self.actor_type.warning_threshold(),
                "Mailbox depth critical"
            );
        } else if level == MailboxLevel::Warning && new_depth == self.actor_type.normal_threshold()
        {
            // Log once when crossing the warning threshold
            debug!(
                target: "coordinator.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                "Mailbox depth elevated"
            );
        }
    }

    /// Record a message being removed from the mailbox (processed).
    pub fn record_dequeue(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message dropped by fire-and-forget delivery.
    pub fn record_drop(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "coordinator.actor.mailbox",
            actor_type = self.actor_type.as_str(),
            actor_id = %self.actor_id,
            dropped = self.messages_dropped.load(Ordering::Relaxed),
            "Event dropped, mailbox full or receiver gone"
        );
    }

    /// Get the current mailbox depth.
    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Get the peak mailbox depth.
    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    /// Get total messages processed.
    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    /// Get total messages dropped.
    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    /// Get the current mailbox level.
    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    /// Determine mailbox level for a given depth.
    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Aggregated metrics for the actor system.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    /// Total rooms currently active.
    pub active_rooms: AtomicUsize,
    /// Total connections currently active.
    pub active_connections: AtomicUsize,
    /// Total actor panics (indicates bugs).
    pub actor_panics: AtomicU64,
    /// Total messages processed across all actors.
    pub total_messages_processed: AtomicU64,
}

impl ActorMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Increment active room count.
    pub fn room_created(&self) {
        let rooms = self.active_rooms.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::gauge!("coordinator_active_rooms").set(rooms as f64);
    }

    /// Decrement active room count.
    pub fn room_removed(&self) {
        let rooms = self
            .active_rooms
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        metrics::gauge!("coordinator_active_rooms").set(rooms as f64);
    }

    /// Increment active connection count.
    pub fn connection_created(&self) {
        let connections = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::gauge!("coordinator_active_connections").set(connections as f64);
    }

    /// Decrement active connection count.
    pub fn connection_closed(&self) {
        let connections = self
            .active_connections
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        metrics::gauge!("coordinator_active_connections").set(connections as f64);
    }

    /// Record an actor panic.
    pub fn record_panic(&self, actor_type: ActorType) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("coordinator_actor_panics_total", "actor_type" => actor_type.as_str())
            .increment(1);
        tracing::error!(
            target: "coordinator.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = self.actor_panics.load(Ordering::Relaxed),
            "Actor panic detected - indicates bug, investigation required"
        );
    }

    /// Record a message being processed.
    pub fn record_message_processed(&self) {
        self.total_messages_processed
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!("coordinator_messages_processed_total").increment(1);
    }

    /// Get current room count.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.active_rooms.load(Ordering::Relaxed)
    }

    /// Get current connection count.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}
