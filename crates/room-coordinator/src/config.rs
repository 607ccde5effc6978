//! Room Coordinator configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults; nothing here is secret.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default bind address for the signaling/health HTTP server.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Default interval between repeated `ready` announcements, in milliseconds.
pub const DEFAULT_READY_ANNOUNCE_INTERVAL_MS: u64 = 2000;

/// Default grace period for draining room actors on shutdown, in seconds.
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 5;

/// Default coordinator instance ID prefix.
pub const DEFAULT_COORDINATOR_ID_PREFIX: &str = "coord";

/// Room Coordinator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address for signaling, health, and metrics (default: "0.0.0.0:3000").
    pub bind_address: String,

    /// Interval between repeated `ready` announcements.
    pub ready_announce_interval: Duration,

    /// Grace period for draining room actors on shutdown.
    pub shutdown_grace: Duration,

    /// Unique identifier for this coordinator instance (log correlation).
    pub coordinator_id: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a present variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if a present variable cannot be parsed.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("COORDINATOR_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let ready_announce_interval = match vars.get("COORDINATOR_READY_ANNOUNCE_INTERVAL_MS") {
            Some(raw) => Duration::from_millis(raw.parse().map_err(|_| {
                ConfigError::InvalidValue("COORDINATOR_READY_ANNOUNCE_INTERVAL_MS", raw.clone())
            })?),
            None => Duration::from_millis(DEFAULT_READY_ANNOUNCE_INTERVAL_MS),
        };

        let shutdown_grace = match vars.get("COORDINATOR_SHUTDOWN_GRACE_SECONDS") {
            Some(raw) => Duration::from_secs(raw.parse().map_err(|_| {
                ConfigError::InvalidValue("COORDINATOR_SHUTDOWN_GRACE_SECONDS", raw.clone())
            })?),
            None => Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECONDS),
        };

        // Generate coordinator instance ID
        let coordinator_id = vars.get("COORDINATOR_ID").cloned().unwrap_or_else(|| {
            let hostname = vars
                .get("HOSTNAME")
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_COORDINATOR_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            ready_announce_interval,
            shutdown_grace,
            coordinator_id,
        })
    }
}
