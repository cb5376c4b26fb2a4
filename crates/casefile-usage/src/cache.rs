//! In-memory running totals per session
//!
//! A low-latency view of what this process has recorded. It is not
//! authoritative: it starts empty, is lost on restart and never sees records
//! written by other processes. Authoritative reads re-aggregate from storage.

use dashmap::DashMap;
use serde::Serialize;

use crate::ledger::UsageRecord;

/// Running totals for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CachedTotals {
    pub total_cost: f64,
    pub total_tokens: u64,
    pub operations: u64,
}

/// Thread-safe session totals cache
#[derive(Debug, Default)]
pub struct SessionUsageCache {
    totals: DashMap<String, CachedTotals>,
}

impl SessionUsageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a persisted record into its session's totals
    pub fn add(&self, record: &UsageRecord) {
        let mut entry = self.totals.entry(record.session_id.clone()).or_default();
        entry.total_cost += record.estimated_cost;
        entry.total_tokens += record.total_token_estimate;
        entry.operations += 1;
    }

    pub fn get(&self, session_id: &str) -> Option<CachedTotals> {
        self.totals.get(session_id).map(|entry| *entry)
    }

    pub fn clear(&self) {
        self.totals.clear();
    }

    /// Number of sessions tracked
    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }
}
