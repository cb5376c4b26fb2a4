//! Error types for Casefile Core

use std::fmt;

use thiserror::Error;

use crate::service::ServiceKind;

/// Which rate-limit ceiling rejected a request, with the values that tripped it.
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitCeiling {
    /// Cumulative estimated session cost is above the configured ceiling
    Cost { current: f64, max: f64 },
    /// Operations recorded in the trailing hour are above the configured ceiling
    Operations { recent: u64, max: u64 },
}

impl RateLimitCeiling {
    /// Short ceiling name used in metrics labels and API payloads
    pub fn name(&self) -> &'static str {
        match self {
            RateLimitCeiling::Cost { .. } => "cost",
            RateLimitCeiling::Operations { .. } => "operations",
        }
    }
}

impl fmt::Display for RateLimitCeiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitCeiling::Cost { current, max } => write!(
                f,
                "cost ceiling of {:.2} per session exceeded (current: {:.4})",
                max, current
            ),
            RateLimitCeiling::Operations { recent, max } => write!(
                f,
                "operations ceiling of {} per hour exceeded ({} in the last hour)",
                max, recent
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// An AI or image service was unreachable or rejected the request
    #[error("Upstream {service} error: {message}")]
    Upstream { service: ServiceKind, message: String },

    /// A response that had to be JSON was not
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(RateLimitCeiling),

    /// Failure while persisting accounting data
    #[error("Usage logging error: {0}")]
    Logging(String),

    #[error("Document store error: {0}")]
    Store(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an upstream error for a service
    pub fn upstream(service: ServiceKind, message: impl Into<String>) -> Self {
        Error::Upstream {
            service,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_ceiling_message_names_threshold() {
        let err = Error::RateLimitExceeded(RateLimitCeiling::Cost {
            current: 5.1234,
            max: 5.0,
        });
        let msg = err.to_string();
        assert!(msg.contains("cost ceiling"));
        assert!(msg.contains("5.00"));
        assert!(msg.contains("5.1234"));
    }

    #[test]
    fn test_operations_ceiling_message_names_threshold() {
        let err = Error::RateLimitExceeded(RateLimitCeiling::Operations {
            recent: 101,
            max: 100,
        });
        let msg = err.to_string();
        assert!(msg.contains("operations ceiling of 100"));
        assert!(msg.contains("101"));
    }

    #[test]
    fn test_ceiling_names() {
        assert_eq!(RateLimitCeiling::Cost { current: 0.0, max: 1.0 }.name(), "cost");
        assert_eq!(
            RateLimitCeiling::Operations { recent: 0, max: 1 }.name(),
            "operations"
        );
    }

    #[test]
    fn test_upstream_display() {
        let err = Error::upstream(ServiceKind::Logic, "HTTP 401");
        assert_eq!(err.to_string(), "Upstream logic-service error: HTTP 401");
    }
}
