//! Usage ledger
//!
//! One `UsageRecord` is appended per AI invocation. Records are immutable
//! once written. Recording never fails from the caller's point of view: if
//! the record cannot be persisted, a zero-cost degraded record is returned
//! (and persisted on a best-effort basis) instead.

use casefile_core::{Clock, DocumentStore, Error, Filter, Query, Result, ServiceKind, Sort};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[cfg(feature = "metrics")]
use casefile_observability::Metrics;

use crate::cache::{CachedTotals, SessionUsageCache};
use crate::pricing::CostModel;
use crate::summary::{SessionUsageSummary, UsageStatistics};

/// Collection holding usage records
pub const USAGE_COLLECTION: &str = "token_usage";

/// Default page size for `list_records`
pub const DEFAULT_RECORDS_LIMIT: usize = 100;

/// Default window for `statistics`
pub const DEFAULT_STATISTICS_WINDOW_DAYS: u32 = 30;

/// One AI invocation as recorded in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    pub session_id: String,
    pub case_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub service: ServiceKind,
    /// Free-form tag, e.g. `case_generation`
    pub operation: String,
    pub input_token_estimate: u64,
    pub output_token_estimate: u64,
    /// Always `input_token_estimate + output_token_estimate`
    pub total_token_estimate: u64,
    /// Never negative
    pub estimated_cost: f64,
    pub model_used: Option<String>,
    /// Prompt length in characters
    pub prompt_length: u64,
    /// Response length in characters
    pub response_length: u64,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Estimate tokens as one per four characters.
///
/// Non-text services and empty text estimate zero; any other text is at
/// least one token.
pub fn estimate_tokens(text: &str, service: ServiceKind) -> u64 {
    if !service.is_text() || text.is_empty() {
        return 0;
    }
    ((text.chars().count() / 4) as u64).max(1)
}

/// Input to `UsageLedger::record`
#[derive(Debug, Clone, PartialEq)]
pub struct UsageEvent {
    pub session_id: String,
    pub case_id: Option<String>,
    pub service: ServiceKind,
    pub operation: String,
    pub prompt: String,
    pub response: String,
    pub model_used: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl UsageEvent {
    /// A successful call with empty prompt and response
    pub fn new(session_id: impl Into<String>, service: ServiceKind, operation: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            case_id: None,
            service,
            operation: operation.into(),
            prompt: String::new(),
            response: String::new(),
            model_used: None,
            success: true,
            error_message: None,
        }
    }

    pub fn case_id(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = Some(case_id.into());
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn response(mut self, response: impl Into<String>) -> Self {
        self.response = response.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model_used = Some(model.into());
        self
    }

    /// Mark the call as failed
    pub fn failed(mut self, error_message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error_message.into());
        self
    }
}

/// Append-only record of AI usage with per-session running totals
pub struct UsageLedger {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    pricing: CostModel,
    cache: SessionUsageCache,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<Metrics>>,
}

impl UsageLedger {
    /// Create a ledger with an empty running-totals cache
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, pricing: CostModel) -> Self {
        Self {
            store,
            clock,
            pricing,
            cache: SessionUsageCache::new(),
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

    pub fn pricing(&self) -> &CostModel {
        &self.pricing
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Record one AI invocation.
    ///
    /// Always returns a record. When persistence fails the returned record is
    /// degraded: `success = false`, zero tokens and cost, the failure text as
    /// `error_message`, lengths still taken from the raw texts.
    pub async fn record(&self, event: UsageEvent) -> UsageRecord {
        let record = self.build_record(&event);

        match self.persist(&record).await {
            Ok(()) => {
                self.cache.add(&record);
                info!(
                    service = %record.service,
                    operation = %record.operation,
                    tokens = record.total_token_estimate,
                    session_id = %record.session_id,
                    "Token usage logged: {} | {} | {} tokens | ${:.4} | Session: {}",
                    record.service,
                    record.operation,
                    record.total_token_estimate,
                    record.estimated_cost,
                    record.session_id
                );
                #[cfg(feature = "metrics")]
                if let Some(ref metrics) = self.metrics {
                    metrics.record_usage(
                        record.service.as_str(),
                        &record.operation,
                        record.input_token_estimate,
                        record.output_token_estimate,
                        record.estimated_cost,
                        record.success,
                    );
                }
                record
            }
            Err(err) => {
                error!(
                    session_id = %event.session_id,
                    operation = %event.operation,
                    "Failed to log token usage: {}",
                    err
                );
                #[cfg(feature = "metrics")]
                if let Some(ref metrics) = self.metrics {
                    metrics.record_usage_logging_failure();
                }

                let degraded = self.degraded_record(&event, &err);
                if let Err(retry_err) = self.persist(&degraded).await {
                    warn!(
                        session_id = %event.session_id,
                        "Degraded usage record was not persisted either: {}",
                        retry_err
                    );
                }
                degraded
            }
        }
    }

    fn build_record(&self, event: &UsageEvent) -> UsageRecord {
        let input_tokens = estimate_tokens(&event.prompt, event.service);
        let output_tokens = estimate_tokens(&event.response, event.service);
        let estimated_cost = self.pricing.cost(
            event.service,
            event.model_used.as_deref(),
            input_tokens,
            output_tokens,
        );

        UsageRecord {
            id: Uuid::new_v4().to_string(),
            session_id: event.session_id.clone(),
            case_id: event.case_id.clone(),
            timestamp: self.clock.now(),
            service: event.service,
            operation: event.operation.clone(),
            input_token_estimate: input_tokens,
            output_token_estimate: output_tokens,
            total_token_estimate: input_tokens + output_tokens,
            estimated_cost,
            model_used: event.model_used.clone(),
            prompt_length: event.prompt.chars().count() as u64,
            response_length: event.response.chars().count() as u64,
            success: event.success,
            error_message: event.error_message.clone(),
        }
    }

    fn degraded_record(&self, event: &UsageEvent, err: &Error) -> UsageRecord {
        UsageRecord {
            id: Uuid::new_v4().to_string(),
            session_id: event.session_id.clone(),
            case_id: event.case_id.clone(),
            timestamp: self.clock.now(),
            service: event.service,
            operation: event.operation.clone(),
            input_token_estimate: 0,
            output_token_estimate: 0,
            total_token_estimate: 0,
            estimated_cost: 0.0,
            model_used: event.model_used.clone(),
            prompt_length: event.prompt.chars().count() as u64,
            response_length: event.response.chars().count() as u64,
            success: false,
            error_message: Some(err.to_string()),
        }
    }

    async fn persist(&self, record: &UsageRecord) -> Result<()> {
        self.store
            .insert_as(USAGE_COLLECTION, record)
            .await
            .map_err(|e| Error::Logging(e.to_string()))
    }

    /// Totals for a session, always re-aggregated from storage
    pub async fn session_summary(&self, session_id: &str) -> Result<SessionUsageSummary> {
        let records = self.session_records(session_id).await?;
        debug!(session_id = %session_id, records = records.len(), "Aggregated session usage");
        Ok(SessionUsageSummary::from_records(session_id, &records))
    }

    /// Usage across all sessions in the trailing `window_days`
    pub async fn statistics(&self, window_days: u32) -> Result<UsageStatistics> {
        let now = self.clock.now();
        // A window reaching past the representable range covers every record
        let filter = match TimeDelta::try_days(i64::from(window_days)).and_then(|window| now.checked_sub_signed(window)) {
            Some(cutoff) => Filter::new().since("timestamp", cutoff),
            None => Filter::new(),
        };
        let query = Query::new(filter);
        let records: Vec<UsageRecord> = self.store.find_as(USAGE_COLLECTION, &query).await?;
        Ok(UsageStatistics::from_records(window_days, now, &records))
    }

    /// Most recent records first, optionally for one session
    pub async fn list_records(&self, session_id: Option<&str>, limit: usize) -> Result<Vec<UsageRecord>> {
        let filter = match session_id {
            Some(id) => Filter::new().eq("session_id", id),
            None => Filter::new(),
        };
        let query = Query::new(filter)
            .sort(Sort::newest_first("timestamp"))
            .limit(limit);
        self.store.find_as(USAGE_COLLECTION, &query).await
    }

    /// Number of records for a session at or after `since`
    pub async fn operations_since(&self, session_id: &str, since: DateTime<Utc>) -> Result<u64> {
        let filter = Filter::new()
            .eq("session_id", session_id)
            .since("timestamp", since);
        self.store.count(USAGE_COLLECTION, &filter).await
    }

    async fn session_records(&self, session_id: &str) -> Result<Vec<UsageRecord>> {
        let query = Query::new(Filter::new().eq("session_id", session_id));
        self.store.find_as(USAGE_COLLECTION, &query).await
    }

    /// Running totals seen by this process (not authoritative)
    pub fn cached_totals(&self, session_id: &str) -> Option<CachedTotals> {
        self.cache.get(session_id)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}
