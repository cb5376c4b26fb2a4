//! Casefile Observability
//!
//! This crate provides observability features:
//! - Metrics collection (Prometheus) for AI usage, rate limiting and prompt tests
//! - Liveness and metrics endpoints
//! - Logging initialisation

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{HealthState, health_router};
pub use logging::init_logging;
pub use metrics::Metrics;
