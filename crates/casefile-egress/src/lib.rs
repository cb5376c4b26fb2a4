//! Casefile Egress Connectors
//!
//! This crate provides connectors to the external AI services:
//! - OpenAI-compatible chat completions (storyteller)
//! - Anthropic messages (logic)
//! - FAL-style image generation (image)
//!
//! [`ServiceRouter`] puts the three behind the `AiInvoker` trait.

pub mod anthropic;
pub mod client;
pub mod fal;
pub mod openai;
pub mod retry_after;
pub mod router;

pub use retry_after::parse_retry_after;
pub use router::ServiceRouter;

use casefile_core::ServiceKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EgressError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Request timeout after {0}s")]
    Timeout(u64),

    #[error("Provider returned {status_code}: {message}")]
    ProviderError { status_code: u16, message: String },

    #[error("Rate limit exceeded{}", retry_after_secs.map(|s| format!(", retry after {}s", s)).unwrap_or_default())]
    RateLimitExceeded { retry_after_secs: Option<u64> },

    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl EgressError {
    /// Surface as the core upstream error for `service`
    pub fn into_upstream(self, service: ServiceKind) -> casefile_core::Error {
        casefile_core::Error::upstream(service, self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EgressError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formatting() {
        let err = EgressError::ConfigError("missing api key".to_string());
        assert!(err.to_string().contains("Invalid configuration"));

        assert_eq!(EgressError::Timeout(30).to_string(), "Request timeout after 30s");

        let err = EgressError::ProviderError {
            status_code: 401,
            message: "invalid x-api-key".to_string(),
        };
        assert!(err.to_string().contains("401"));

        let err = EgressError::RateLimitExceeded {
            retry_after_secs: Some(60),
        };
        assert!(err.to_string().contains("60s"));

        let err = EgressError::RateLimitExceeded {
            retry_after_secs: None,
        };
        assert_eq!(err.to_string(), "Rate limit exceeded");
    }

    #[test]
    fn test_into_upstream_names_service() {
        let err = EgressError::ProviderError {
            status_code: 503,
            message: "overloaded".to_string(),
        }
        .into_upstream(ServiceKind::Logic);
        assert!(matches!(err, casefile_core::Error::Upstream { service: ServiceKind::Logic, .. }));
        assert!(err.to_string().contains("503"));
    }
}
