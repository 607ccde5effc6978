//! Actor model implementation.
//!
//! The coordinator uses a three-level actor hierarchy:
//!
//! ```text
//! RoomRegistryActor (singleton per coordinator instance)
//! └── supervises N RoomActors
//!     └── RoomActor (one per active room)
//!         ├── owns membership, approval, host and call state
//!         └── delivers to N ConnectionActors
//!             └── ConnectionActor (one per WebSocket connection)
//! ```
//!
//! All state for a room lives in its `RoomActor`; the mailbox
//! serializes mutations, so room logic needs no locking. Rooms are
//! independent of each other and run fully in parallel.

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;

pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use messages::{ConnectionMessage, RegistryStatus, RelayPayload, RoomState};
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use registry::RoomRegistryHandle;
pub use room::RoomActorHandle;
