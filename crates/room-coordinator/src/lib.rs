//! Room Coordinator Service Library
//!
//! This library provides the core functionality for the Switchboard
//! Room Coordinator - a stateful WebSocket signaling server responsible
//! for:
//!
//! - Real-time room membership and participant state management
//! - Single-host arbitration with a guest join-approval flow
//! - Readiness tracking with periodic `ready` re-announcement
//! - Verbatim relay of opaque negotiation payloads (offers, answers,
//!   ICE candidates) between approved room members
//! - Graceful shutdown with bounded room drain
//!
//! # Architecture
//!
//! The coordinator uses an actor model hierarchy:
//!
//! ```text
//! RoomRegistryActor (singleton per coordinator instance)
//! ├── supervises N RoomActors
//! │   └── RoomActor (one per active room)
//! │       ├── owns membership, approval, host and call state
//! │       └── delivers to N ConnectionActors
//! │           └── ConnectionActor (one per WebSocket connection)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One connection per participant**: the transport assigns each
//!   connection an opaque member id; clients never choose their own
//! - **Per-room serialization**: all mutations for a room flow through
//!   its actor mailbox; rooms are fully independent of each other
//! - **In-memory only**: rooms and participants do not survive a
//!   process restart; clients reconnect and re-derive state
//! - **Fire-and-forget delivery**: broadcasts never apply backpressure
//!   to room logic; an unreachable peer simply misses the event
//!
//! # Modules
//!
//! - [`actors`] - Actor model implementation
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types and client-safe messages
//! - [`observability`] - Health probes and metrics
//! - [`transport`] - WebSocket connection lifecycle handling

pub mod actors;
pub mod config;
pub mod errors;
pub mod observability;
pub mod transport;
