//! Observability: health probes and Prometheus metrics.

pub mod health;

pub use health::{health_router, HealthState};
