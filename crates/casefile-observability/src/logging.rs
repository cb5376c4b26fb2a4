//! Logging initialisation
//!
//! One global `tracing` subscriber for the process. `RUST_LOG` wins over the
//! configured level when set.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Parse a level name, falling back to INFO for anything unrecognised
pub fn parse_level(level: &str) -> Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Filter for the configured level. sqlx is held at WARN unless
/// `log_sql_queries` is set.
pub fn build_filter(level: &str, log_sql_queries: bool) -> EnvFilter {
    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(parse_level(level).to_string().to_lowercase()));

    if !log_sql_queries {
        match "sqlx=warn".parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Failed to set sqlx log filter: {}", e),
        }
    }
    filter
}

/// Install the global subscriber, as JSON lines when `json` is set
pub fn init_logging(
    level: &str,
    json: bool,
    log_sql_queries: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(build_filter(level, log_sql_queries))
        .with_target(true);

    if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level(" warn "), Level::WARN);
        assert_eq!(parse_level("loud"), Level::INFO);
    }

    #[test]
    fn test_sqlx_is_quiet_by_default() {
        let filter = build_filter("debug", false).to_string();
        assert!(filter.contains("sqlx=warn"));

        let filter = build_filter("debug", true).to_string();
        assert!(!filter.contains("sqlx=warn"));
    }
}
