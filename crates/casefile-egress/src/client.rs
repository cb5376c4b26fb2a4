//! Shared HTTP client utilities

use crate::{EgressError, Result};
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest provider-requested wait honoured between retries
const MAX_RETRY_AFTER_SECS: u64 = 10;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in seconds. Image generation is the slowest call.
    pub timeout_secs: u64,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Maximum number of idle connections per host
    pub pool_max_idle_per_host: usize,

    /// Maximum number of retries for transient errors
    pub max_retries: u32,

    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            connect_timeout_secs: 10,
            pool_max_idle_per_host: 8,
            max_retries: 2,
            user_agent: format!("Casefile/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Create a configured HTTP client with connection pooling
pub fn create_client(config: &HttpClientConfig) -> Result<Client> {
    ClientBuilder::new()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        // Expire idle connections before the providers close them
        .pool_idle_timeout(Duration::from_secs(90))
        .user_agent(&config.user_agent)
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .map_err(|e| EgressError::ConfigError(format!("Failed to create HTTP client: {}", e)))
}

fn is_retryable(error: &EgressError) -> bool {
    match error {
        EgressError::HttpError(req_err) => req_err.is_connect() || req_err.is_timeout() || req_err.is_request(),
        EgressError::ProviderError { status_code, .. } => matches!(status_code, 500 | 502 | 503 | 504),
        EgressError::RateLimitExceeded { .. } | EgressError::Timeout(_) => true,
        EgressError::ConfigError(_) | EgressError::ParseError(_) => false,
    }
}

/// Retry policy for transient errors.
///
/// Backs off 100ms, 200ms, 400ms... or the provider's `retry-after` when it
/// asks for longer (capped at a few seconds).
pub async fn with_retry<F, Fut, T>(max_retries: u32, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let error = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if attempt >= max_retries || !is_retryable(&error) {
            return Err(error);
        }

        let mut backoff_ms = 2u64.pow(attempt) * 100;
        if let EgressError::RateLimitExceeded {
            retry_after_secs: Some(secs),
        } = &error
        {
            backoff_ms = backoff_ms.max((*secs).min(MAX_RETRY_AFTER_SECS) * 1000);
        }

        attempt += 1;
        warn!("Request failed (attempt {}/{}): {}", attempt, max_retries + 1, error);
        debug!("Retrying request after {}ms", backoff_ms);
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
    }
}

/// Turn a non-success response into an error, reading the body for context
pub(crate) async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status.as_u16() == 429 {
        return Err(EgressError::RateLimitExceeded {
            retry_after_secs: crate::retry_after::from_headers(response.headers()),
        });
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error body".to_string());
    Err(EgressError::ProviderError {
        status_code: status.as_u16(),
        message: body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_config() {
        let config = HttpClientConfig::default();
        assert_eq!(config.timeout_secs, 120);
        assert_eq!(config.max_retries, 2);
        assert!(config.user_agent.starts_with("Casefile/"));
    }

    #[test]
    fn test_create_client() {
        assert!(create_client(&HttpClientConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let result = with_retry(3, || async { Ok::<i32, EgressError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_non_retryable_error() {
        let calls = AtomicU32::new(0);
        let result = with_retry(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, EgressError>(EgressError::ConfigError("Invalid config".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_server_error() {
        let calls = AtomicU32::new(0);
        let result = with_retry(2, || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(EgressError::ProviderError {
                        status_code: 503,
                        message: "overloaded".to_string(),
                    })
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result = with_retry(1, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), EgressError>(EgressError::Timeout(5)) }
        })
        .await;

        assert!(matches!(result, Err(EgressError::Timeout(5))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_client_errors_are_not_retried() {
        let unauthorized = EgressError::ProviderError {
            status_code: 401,
            message: "bad key".to_string(),
        };
        assert!(!is_retryable(&unauthorized));
        assert!(!is_retryable(&EgressError::ParseError("eof".to_string())));
        assert!(is_retryable(&EgressError::RateLimitExceeded { retry_after_secs: None }));
    }
}
