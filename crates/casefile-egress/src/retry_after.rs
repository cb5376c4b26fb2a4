//! `retry-after` header parsing
//!
//! Providers send either a number of seconds or an RFC 7231 HTTP date.

use chrono::{DateTime, Utc};
use tracing::debug;

/// Seconds to wait before retrying, or `None` if the value is unusable.
///
/// ```
/// use casefile_egress::parse_retry_after;
///
/// assert_eq!(parse_retry_after("30"), Some(30));
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
pub fn parse_retry_after(header_value: &str) -> Option<u64> {
    parse_retry_after_at(header_value, Utc::now())
}

fn parse_retry_after_at(header_value: &str, now: DateTime<Utc>) -> Option<u64> {
    let value = header_value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }

    match DateTime::parse_from_rfc2822(value) {
        Ok(target) => {
            // Past dates mean retry now
            let seconds = target.signed_duration_since(now).num_seconds().max(0) as u64;
            debug!(retry_after_seconds = seconds, "Parsed retry-after date");
            Some(seconds)
        }
        Err(_) => {
            debug!(header_value = value, "Ignoring unparseable retry-after header");
            None
        }
    }
}

/// Read `retry-after` from a response's headers
pub(crate) fn from_headers(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}
