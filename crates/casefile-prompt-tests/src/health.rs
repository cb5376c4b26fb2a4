//! Prompt health reporting
//!
//! Derived from the most recent suites on every request; nothing here is
//! stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cases::PromptType;
use crate::results::PromptTestSuite;

/// Distinct failure messages kept per test case
pub const MAX_RECENT_FAILURES: usize = 3;

/// Qualitative band for an average success rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthBand {
    Excellent,
    Good,
    Fair,
    Poor,
    /// No suite has been run yet
    NoData,
}

impl HealthBand {
    /// Band for a success rate in percent
    pub fn from_rate(rate: f64) -> Self {
        if rate >= 90.0 {
            HealthBand::Excellent
        } else if rate >= 75.0 {
            HealthBand::Good
        } else if rate >= 50.0 {
            HealthBand::Fair
        } else {
            HealthBand::Poor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseHealth {
    pub test_case_id: String,
    pub test_case_name: String,
    pub prompt_type: PromptType,
    pub runs: u64,
    pub passes: u64,
    pub success_rate: f64,
    /// Most recent first, without duplicates
    pub recent_failures: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptTypeHealth {
    pub success_rate: f64,
    pub passed_tests: u64,
    pub total_tests: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub suites_analyzed: u64,
    /// Mean of the analyzed suites' success rates
    pub overall_success_rate: f64,
    pub overall_health: HealthBand,
    pub recommendation: String,
    pub test_cases: Vec<TestCaseHealth>,
    pub prompt_types: BTreeMap<PromptType, PromptTypeHealth>,
}

fn rate(passed: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * passed as f64 / total as f64
    }
}

impl HealthReport {
    /// Build a report from suites ordered newest first
    pub fn from_suites(suites: &[PromptTestSuite], generated_at: DateTime<Utc>) -> Self {
        if suites.is_empty() {
            return Self {
                generated_at,
                suites_analyzed: 0,
                overall_success_rate: 0.0,
                overall_health: HealthBand::NoData,
                recommendation: "No test history yet. Run the prompt test suite to establish a baseline.".to_string(),
                test_cases: Vec::new(),
                prompt_types: BTreeMap::new(),
            };
        }

        let mut cases: BTreeMap<String, TestCaseHealth> = BTreeMap::new();
        let mut prompt_types: BTreeMap<PromptType, PromptTypeHealth> = BTreeMap::new();

        for result in suites.iter().flat_map(|s| s.results.iter()) {
            let entry = cases
                .entry(result.test_case_id.clone())
                .or_insert_with(|| TestCaseHealth {
                    test_case_id: result.test_case_id.clone(),
                    test_case_name: result.test_case_name.clone(),
                    prompt_type: result.prompt_type,
                    runs: 0,
                    passes: 0,
                    success_rate: 0.0,
                    recent_failures: Vec::new(),
                });
            entry.runs += 1;
            if result.success {
                entry.passes += 1;
            } else if let Some(reason) = result.failure_reason()
                && entry.recent_failures.len() < MAX_RECENT_FAILURES
                && !entry.recent_failures.contains(&reason)
            {
                entry.recent_failures.push(reason);
            }

            let by_type = prompt_types.entry(result.prompt_type).or_default();
            by_type.total_tests += 1;
            if result.success {
                by_type.passed_tests += 1;
            }
        }

        for case in cases.values_mut() {
            case.success_rate = rate(case.passes, case.runs);
        }
        for health in prompt_types.values_mut() {
            health.success_rate = rate(health.passed_tests, health.total_tests);
        }

        let overall_success_rate = suites.iter().map(|s| s.success_rate).sum::<f64>() / suites.len() as f64;
        let overall_health = HealthBand::from_rate(overall_success_rate);
        let test_cases: Vec<TestCaseHealth> = cases.into_values().collect();
        let recommendation = recommend(overall_health, &test_cases);

        Self {
            generated_at,
            suites_analyzed: suites.len() as u64,
            overall_success_rate,
            overall_health,
            recommendation,
            test_cases,
            prompt_types,
        }
    }
}

fn recommend(band: HealthBand, cases: &[TestCaseHealth]) -> String {
    let weakest = cases
        .iter()
        .filter(|c| c.passes < c.runs)
        .min_by(|a, b| a.success_rate.total_cmp(&b.success_rate))
        .map(|c| c.test_case_name.as_str());

    match (band, weakest) {
        (HealthBand::Excellent, _) => "Prompts are performing well. Keep monitoring.".to_string(),
        (HealthBand::Good, Some(name)) => format!("Prompts are mostly healthy. Review '{}' for occasional failures.", name),
        (HealthBand::Fair, Some(name)) => format!("Several prompts are unreliable. Start by revising '{}'.", name),
        (HealthBand::Poor, Some(name)) => format!(
            "Prompts are failing frequently. Check service connectivity, then revise '{}'.",
            name
        ),
        (HealthBand::NoData, _) => "No test history yet. Run the prompt test suite to establish a baseline.".to_string(),
        (_, None) => "Earlier suites failed but recent results are clean. Re-run the suite to confirm.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::fixtures::result;

    fn suite(results: Vec<crate::results::PromptTestResult>) -> PromptTestSuite {
        PromptTestSuite::from_results("suite", Utc::now(), results)
    }

    #[test]
    fn test_bands() {
        assert_eq!(HealthBand::from_rate(95.0), HealthBand::Excellent);
        assert_eq!(HealthBand::from_rate(90.0), HealthBand::Excellent);
        assert_eq!(HealthBand::from_rate(75.0), HealthBand::Good);
        assert_eq!(HealthBand::from_rate(50.0), HealthBand::Fair);
        assert_eq!(HealthBand::from_rate(49.9), HealthBand::Poor);
    }

    #[test]
    fn test_no_history() {
        let report = HealthReport::from_suites(&[], Utc::now());
        assert_eq!(report.overall_health, HealthBand::NoData);
        assert!(report.recommendation.contains("Run the prompt test suite"));
    }

    #[test]
    fn test_report_aggregates_cases_and_types() {
        let mut failing = result("detect", PromptType::CharacterDetection, false);
        failing.error_message = Some("timeout".to_string());
        let suites = vec![
            suite(vec![
                result("gen", PromptType::CaseGeneration, true),
                failing.clone(),
            ]),
            suite(vec![
                result("gen", PromptType::CaseGeneration, true),
                result("detect", PromptType::CharacterDetection, true),
            ]),
        ];

        let report = HealthReport::from_suites(&suites, Utc::now());
        assert_eq!(report.suites_analyzed, 2);
        assert_eq!(report.overall_success_rate, 75.0);
        assert_eq!(report.overall_health, HealthBand::Good);

        let detect = report.test_cases.iter().find(|c| c.test_case_id == "detect").unwrap();
        assert_eq!(detect.runs, 2);
        assert_eq!(detect.success_rate, 50.0);
        assert_eq!(detect.recent_failures, vec!["timeout".to_string()]);
        assert!(report.recommendation.contains("detect"));

        let generation = &report.prompt_types[&PromptType::CaseGeneration];
        assert_eq!(generation.total_tests, 2);
        assert_eq!(generation.success_rate, 100.0);
    }

    #[test]
    fn test_recent_failures_are_distinct_and_capped() {
        let messages = ["a", "b", "a", "c", "d"];
        let suites: Vec<PromptTestSuite> = messages
            .iter()
            .map(|m| {
                let mut r = result("detect", PromptType::CharacterDetection, false);
                r.error_message = Some(m.to_string());
                suite(vec![r])
            })
            .collect();

        let report = HealthReport::from_suites(&suites, Utc::now());
        assert_eq!(report.overall_health, HealthBand::Poor);
        assert_eq!(report.test_cases[0].recent_failures, vec!["a", "b", "c"]);
    }
}
