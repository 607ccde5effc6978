//! Signaling wire protocol for Switchboard.
//!
//! This crate defines the event vocabulary exchanged between the room
//! coordinator and its signaling peers: a JSON envelope of the form
//! `{"event": <name>, "data": <payload>}` carried over a persistent
//! bidirectional connection. Negotiation payloads (offers, answers, ICE
//! candidates) are treated as opaque values and never interpreted.

#![warn(clippy::pedantic)]

pub mod events;
pub mod names;

pub use events::{ClientEvent, ProtocolError, ServerEvent};
pub use names::sanitize_display_name;
