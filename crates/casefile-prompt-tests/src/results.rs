//! Test results and suites

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::cases::PromptType;

/// Number of response characters kept in a result
pub const RESPONSE_PREVIEW_CHARS: usize = 200;

/// Outcome of running one test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTestResult {
    pub id: String,
    pub test_case_id: String,
    pub test_case_name: String,
    pub prompt_type: PromptType,
    pub timestamp: DateTime<Utc>,
    /// response_received && json_parse_success && validation_passed
    pub success: bool,
    /// Wall-clock seconds
    pub execution_time: f64,
    pub response_received: bool,
    pub json_parse_success: bool,
    pub validation_passed: bool,
    pub token_count: u64,
    pub estimated_cost: f64,
    pub error_message: Option<String>,
    pub response_preview: String,
    pub detailed_results: BTreeMap<String, bool>,
}

impl PromptTestResult {
    /// Names of the rules that evaluated false
    pub fn failed_rules(&self) -> Vec<&str> {
        self.detailed_results
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Short explanation of a failure, if the result failed
    pub fn failure_reason(&self) -> Option<String> {
        if self.success {
            return None;
        }
        if let Some(message) = &self.error_message {
            return Some(message.clone());
        }
        let failed = self.failed_rules();
        if failed.is_empty() {
            Some("validation below threshold".to_string())
        } else {
            Some(format!("failed rules: {}", failed.join(", ")))
        }
    }
}

pub fn preview(response: &str) -> String {
    response.chars().take(RESPONSE_PREVIEW_CHARS).collect()
}

/// One batch run of the catalog, persisted for health trends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTestSuite {
    pub id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub tests_run: u64,
    pub tests_passed: u64,
    pub tests_failed: u64,
    pub total_execution_time: f64,
    pub total_cost: f64,
    /// Percentage of tests passed, 0 when nothing ran
    pub success_rate: f64,
    pub results: Vec<PromptTestResult>,
}

impl PromptTestSuite {
    pub fn from_results(name: impl Into<String>, timestamp: DateTime<Utc>, results: Vec<PromptTestResult>) -> Self {
        let tests_run = results.len() as u64;
        let tests_passed = results.iter().filter(|r| r.success).count() as u64;
        let success_rate = if tests_run == 0 {
            0.0
        } else {
            100.0 * tests_passed as f64 / tests_run as f64
        };

        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            timestamp,
            tests_run,
            tests_passed,
            tests_failed: tests_run - tests_passed,
            total_execution_time: results.iter().map(|r| r.execution_time).sum(),
            total_cost: results.iter().map(|r| r.estimated_cost).sum(),
            success_rate,
            results,
        }
    }

    /// Compact view returned alongside a finished suite
    pub fn summary(&self) -> SuiteSummary {
        SuiteSummary {
            tests_run: self.tests_run,
            tests_passed: self.tests_passed,
            tests_failed: self.tests_failed,
            success_rate: self.success_rate,
            total_cost: self.total_cost,
            total_execution_time: self.total_execution_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub tests_run: u64,
    pub tests_passed: u64,
    pub tests_failed: u64,
    pub success_rate: f64,
    pub total_cost: f64,
    pub total_execution_time: f64,
}
