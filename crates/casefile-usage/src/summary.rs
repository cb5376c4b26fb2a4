//! Aggregations over usage records
//!
//! Both aggregates are built in a single pass over the records. Map entries
//! are created zeroed the first time a service or operation is seen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::ledger::UsageRecord;

/// Per-service totals within one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceUsage {
    pub cost: f64,
    pub tokens: u64,
    pub count: u64,
}

/// Everything a session has consumed, re-aggregated from storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUsageSummary {
    pub session_id: String,
    pub total_cost: f64,
    pub total_tokens: u64,
    /// Keyed by service name (`storyteller-service`, ...)
    pub service_breakdown: BTreeMap<String, ServiceUsage>,
    pub operation_count: u64,
}

impl SessionUsageSummary {
    pub fn empty(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            total_cost: 0.0,
            total_tokens: 0,
            service_breakdown: BTreeMap::new(),
            operation_count: 0,
        }
    }

    pub fn from_records<'a>(session_id: impl Into<String>, records: impl IntoIterator<Item = &'a UsageRecord>) -> Self {
        let mut summary = Self::empty(session_id);
        for record in records {
            summary.total_cost += record.estimated_cost;
            summary.total_tokens += record.total_token_estimate;
            summary.operation_count += 1;

            let service = summary
                .service_breakdown
                .entry(record.service.as_str().to_string())
                .or_insert_with(ServiceUsage::default);
            service.cost += record.estimated_cost;
            service.tokens += record.total_token_estimate;
            service.count += 1;
        }
        summary
    }
}

/// Per-service totals within a statistics window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatistics {
    pub cost: f64,
    pub tokens: u64,
    pub operations: u64,
}

/// Per-operation totals within a statistics window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStatistics {
    pub cost: f64,
    pub tokens: u64,
    pub count: u64,
}

/// Usage across all sessions over a rolling window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStatistics {
    pub window_days: u32,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub service_breakdown: BTreeMap<String, ServiceStatistics>,
    pub operation_breakdown: BTreeMap<String, OperationStatistics>,
    pub session_count: u64,
    pub case_count: u64,
    /// Zero when no record carries a case id
    pub average_cost_per_case: f64,
    pub last_updated: DateTime<Utc>,
}

impl UsageStatistics {
    pub fn from_records<'a>(
        window_days: u32,
        now: DateTime<Utc>,
        records: impl IntoIterator<Item = &'a UsageRecord>,
    ) -> Self {
        let mut total_cost = 0.0;
        let mut total_tokens = 0;
        let mut service_breakdown: BTreeMap<String, ServiceStatistics> = BTreeMap::new();
        let mut operation_breakdown: BTreeMap<String, OperationStatistics> = BTreeMap::new();
        let mut sessions: HashSet<&str> = HashSet::new();
        let mut cases: HashSet<&str> = HashSet::new();

        for record in records {
            total_cost += record.estimated_cost;
            total_tokens += record.total_token_estimate;

            let service = service_breakdown
                .entry(record.service.as_str().to_string())
                .or_insert_with(ServiceStatistics::default);
            service.cost += record.estimated_cost;
            service.tokens += record.total_token_estimate;
            service.operations += 1;

            let operation = operation_breakdown
                .entry(record.operation.clone())
                .or_insert_with(OperationStatistics::default);
            operation.cost += record.estimated_cost;
            operation.tokens += record.total_token_estimate;
            operation.count += 1;

            if !record.session_id.is_empty() {
                sessions.insert(&record.session_id);
            }
            if let Some(case_id) = record.case_id.as_deref()
                && !case_id.is_empty()
            {
                cases.insert(case_id);
            }
        }

        let case_count = cases.len() as u64;
        let average_cost_per_case = if case_count > 0 {
            total_cost / case_count as f64
        } else {
            0.0
        };

        Self {
            window_days,
            total_cost,
            total_tokens,
            service_breakdown,
            operation_breakdown,
            session_count: sessions.len() as u64,
            case_count,
            average_cost_per_case,
            last_updated: now,
        }
    }
}
