//! Room Coordinator error types.
//!
//! The protocol deliberately keeps the error surface small: fatal
//! connection errors are the only class a client ever sees as an
//! `error` event. Policy rejections (unapproved relay, non-host
//! approval attempts, stale approval targets) are silent no-ops so a
//! probing guest learns nothing about room state, and delivery
//! failures are drops at the transport layer.

use thiserror::Error;

/// Room Coordinator error type.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Connection opened without a room identifier.
    #[error("Room missing")]
    MissingRoomId,

    /// Coordinator is draining (graceful shutdown).
    #[error("Coordinator is draining")]
    Draining,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal actor plumbing error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CoordinatorError::MissingRoomId => "Room missing".to_string(),
            CoordinatorError::Draining => {
                "Server is shutting down, please reconnect".to_string()
            }
            CoordinatorError::Config(_) | CoordinatorError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}
