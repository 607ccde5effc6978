//! Transport layer: WebSocket connection lifecycle handling.

pub mod ws;

pub use ws::{signaling_router, TransportState};
