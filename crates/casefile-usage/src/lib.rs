//! Casefile usage accounting
//!
//! - `pricing`: static cost model for the AI services
//! - `ledger`: append-only usage records with per-session running totals
//! - `summary`: session and windowed aggregations over usage records
//! - `rate_limit`: per-session cost and hourly operation ceilings
//! - `tracked`: AI invocation that records its own usage

pub mod cache;
pub mod ledger;
pub mod pricing;
pub mod rate_limit;
pub mod summary;
pub mod tracked;

pub use cache::{CachedTotals, SessionUsageCache};
pub use ledger::{
    DEFAULT_RECORDS_LIMIT, DEFAULT_STATISTICS_WINDOW_DAYS, USAGE_COLLECTION, UsageEvent, UsageLedger, UsageRecord,
    estimate_tokens,
};
pub use pricing::{CostModel, PricingOverrides, TokenRate};
pub use rate_limit::{RateLimitConfig, RateLimitStatus, RateLimiter};
pub use summary::{OperationStatistics, ServiceStatistics, ServiceUsage, SessionUsageSummary, UsageStatistics};
pub use tracked::{TrackedInvoker, TrackedReply};
