//! Per-session rate limiting
//!
//! Two independent ceilings are read from the usage ledger: cumulative
//! session cost and the number of operations in the trailing hour. A session
//! is blocked when either is exceeded.
//!
//! The check and the subsequent usage record are not atomic, so concurrent
//! requests for the same session can all pass a check before any of them is
//! recorded. The limit is best-effort under concurrent load.

use casefile_core::{Error, RateLimitCeiling, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

#[cfg(feature = "metrics")]
use casefile_observability::Metrics;

use crate::ledger::UsageLedger;

/// Default cumulative cost ceiling per session
pub const DEFAULT_MAX_COST_PER_SESSION: f64 = 5.0;

/// Default ceiling on operations per trailing hour
pub const DEFAULT_MAX_OPERATIONS_PER_HOUR: u64 = 100;

/// Rate limit ceilings (the `limits` config section)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_cost_per_session: f64,
    pub max_operations_per_hour: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_cost_per_session: DEFAULT_MAX_COST_PER_SESSION,
            max_operations_per_hour: DEFAULT_MAX_OPERATIONS_PER_HOUR,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.max_cost_per_session.is_finite() || self.max_cost_per_session < 0.0 {
            return Err(Error::Config(format!(
                "limits.max_cost_per_session must be a non-negative number, got {}",
                self.max_cost_per_session
            )));
        }
        Ok(())
    }
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub within_limits: bool,
    pub cost_limit_exceeded: bool,
    pub operations_limit_exceeded: bool,
    pub current_cost: f64,
    pub max_cost: f64,
    /// Operations recorded in the trailing hour
    pub recent_operations: u64,
    pub max_operations: u64,
}

impl RateLimitStatus {
    /// The first exceeded ceiling, cost before operations
    pub fn exceeded_ceiling(&self) -> Option<RateLimitCeiling> {
        if self.cost_limit_exceeded {
            Some(RateLimitCeiling::Cost {
                current: self.current_cost,
                max: self.max_cost,
            })
        } else if self.operations_limit_exceeded {
            Some(RateLimitCeiling::Operations {
                recent: self.recent_operations,
                max: self.max_operations,
            })
        } else {
            None
        }
    }
}

/// Gate for expensive AI operations
pub struct RateLimiter {
    ledger: Arc<UsageLedger>,
    config: RateLimitConfig,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<Metrics>>,
}

impl RateLimiter {
    pub fn new(ledger: Arc<UsageLedger>, config: RateLimitConfig) -> Self {
        Self {
            ledger,
            config,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Attach a metrics collector
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Option<Arc<Metrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Evaluate both ceilings for a session
    pub async fn check(&self, session_id: &str) -> Result<RateLimitStatus> {
        let summary = self.ledger.session_summary(session_id).await?;
        let one_hour_ago = self.ledger.now() - TimeDelta::hours(1);
        let recent_operations = self.ledger.operations_since(session_id, one_hour_ago).await?;

        let cost_limit_exceeded = summary.total_cost > self.config.max_cost_per_session;
        let operations_limit_exceeded = recent_operations > self.config.max_operations_per_hour;

        Ok(RateLimitStatus {
            within_limits: !(cost_limit_exceeded || operations_limit_exceeded),
            cost_limit_exceeded,
            operations_limit_exceeded,
            current_cost: summary.total_cost,
            max_cost: self.config.max_cost_per_session,
            recent_operations,
            max_operations: self.config.max_operations_per_hour,
        })
    }

    /// Check and reject with `Error::RateLimitExceeded` if a ceiling is exceeded.
    ///
    /// Call immediately before starting the costly operation. A rejected
    /// attempt records no usage.
    pub async fn enforce(&self, session_id: &str) -> Result<RateLimitStatus> {
        let status = self.check(session_id).await?;
        match status.exceeded_ceiling() {
            None => Ok(status),
            Some(ceiling) => {
                warn!(session_id = %session_id, ceiling = ceiling.name(), "Rate limit exceeded: {}", ceiling);
                #[cfg(feature = "metrics")]
                if let Some(ref metrics) = self.metrics {
                    metrics.record_rate_limit_rejection(ceiling.name());
                }
                Err(Error::RateLimitExceeded(ceiling))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{USAGE_COLLECTION, UsageEvent, UsageRecord};
    use crate::pricing::CostModel;
    use casefile_core::{DocumentStore, ManualClock, MemoryDocumentStore, ServiceKind};
    use chrono::{DateTime, TimeZone, Utc};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<dyn DocumentStore>,
        limiter: RateLimiter,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(start()));
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let ledger = Arc::new(UsageLedger::new(store.clone(), clock.clone(), CostModel::new()));
        Fixture {
            clock,
            store,
            limiter: RateLimiter::new(ledger, RateLimitConfig::default()),
        }
    }

    /// Write a record directly, bypassing pricing
    async fn inject(store: &Arc<dyn DocumentStore>, session: &str, at: DateTime<Utc>, cost: f64, n: usize) {
        let record = UsageRecord {
            id: format!("{}-{}-{}", session, at.timestamp(), n),
            session_id: session.to_string(),
            case_id: None,
            timestamp: at,
            service: ServiceKind::Storyteller,
            operation: "case_generation".to_string(),
            input_token_estimate: 10,
            output_token_estimate: 10,
            total_token_estimate: 20,
            estimated_cost: cost,
            model_used: None,
            prompt_length: 40,
            response_length: 40,
            success: true,
            error_message: None,
        };
        store.insert_as(USAGE_COLLECTION, &record).await.unwrap();
    }

    #[tokio::test]
    async fn test_fresh_session_is_within_limits() {
        let f = fixture();
        let status = f.limiter.check("new-session").await.unwrap();
        assert!(status.within_limits);
        assert_eq!(status.current_cost, 0.0);
        assert_eq!(status.recent_operations, 0);
        assert_eq!(status.max_cost, 5.0);
        assert_eq!(status.max_operations, 100);
        assert!(f.limiter.enforce("new-session").await.is_ok());
    }

    #[tokio::test]
    async fn test_cost_ceiling() {
        let f = fixture();
        // Spread over two days so only the cost ceiling trips
        inject(&f.store, "s1", start() - TimeDelta::days(2), 3.0, 0).await;
        inject(&f.store, "s1", start() - TimeDelta::days(1), 2.5, 1).await;

        let status = f.limiter.check("s1").await.unwrap();
        assert!(status.cost_limit_exceeded);
        assert!(!status.operations_limit_exceeded);
        assert!(!status.within_limits);
        assert_eq!(status.recent_operations, 0);

        let err = f.limiter.enforce("s1").await.unwrap_err();
        match err {
            Error::RateLimitExceeded(RateLimitCeiling::Cost { max, .. }) => assert_eq!(max, 5.0),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cost_exactly_at_ceiling_is_allowed() {
        let f = fixture();
        inject(&f.store, "s1", start(), 5.0, 0).await;
        let status = f.limiter.check("s1").await.unwrap();
        assert!(!status.cost_limit_exceeded);
        assert!(status.within_limits);
    }

    #[tokio::test]
    async fn test_operations_ceiling() {
        let f = fixture();
        for n in 0..101 {
            inject(&f.store, "s1", start() - TimeDelta::minutes(30), 0.0, n).await;
        }

        let status = f.limiter.check("s1").await.unwrap();
        assert_eq!(status.recent_operations, 101);
        assert!(status.operations_limit_exceeded);
        assert!(!status.cost_limit_exceeded);
        assert!(!status.within_limits);

        let err = f.limiter.enforce("s1").await.unwrap_err();
        assert!(err.to_string().contains("operations ceiling of 100"));
    }

    #[tokio::test]
    async fn test_operations_outside_the_hour_do_not_count() {
        let f = fixture();
        for n in 0..101 {
            inject(&f.store, "s1", start() - TimeDelta::minutes(30), 0.0, n).await;
        }
        f.clock.advance(TimeDelta::minutes(31));

        let status = f.limiter.check("s1").await.unwrap();
        assert_eq!(status.recent_operations, 0);
        assert!(status.within_limits);
    }

    #[tokio::test]
    async fn test_cost_is_reported_before_operations() {
        let f = fixture();
        for n in 0..101 {
            inject(&f.store, "s1", start(), 0.1, n).await;
        }
        let status = f.limiter.check("s1").await.unwrap();
        assert!(status.cost_limit_exceeded && status.operations_limit_exceeded);
        assert_eq!(status.exceeded_ceiling().unwrap().name(), "cost");
    }

    #[tokio::test]
    async fn test_rejection_records_no_usage() {
        let f = fixture();
        inject(&f.store, "s1", start(), 6.0, 0).await;
        assert!(f.limiter.enforce("s1").await.is_err());

        let count = f
            .store
            .count(USAGE_COLLECTION, &casefile_core::Filter::new().eq("session_id", "s1"))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let f = fixture();
        inject(&f.store, "heavy", start(), 10.0, 0).await;
        let ledger = UsageLedger::new(f.store.clone(), f.clock.clone(), CostModel::new());
        ledger
            .record(UsageEvent::new("light", ServiceKind::Logic, "evidence_analysis").prompt("why"))
            .await;

        assert!(f.limiter.enforce("light").await.is_ok());
        assert!(f.limiter.enforce("heavy").await.is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(RateLimitConfig::default().validate().is_ok());
        let bad = RateLimitConfig {
            max_cost_per_session: -1.0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));
    }
}
