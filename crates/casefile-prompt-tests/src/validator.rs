//! Response validator

use casefile_core::parse_model_json;
use std::collections::BTreeMap;
use tracing::warn;

use crate::cases::PromptTestCase;
use crate::rules::{self, RuleContext};

const RESPONSE_IS_JSON: &str = "response_is_json";

/// Evaluate a test case's rules against a raw response.
///
/// Every declared rule gets an entry; rules nobody knows evaluate to false.
/// JSON prompt types always report `response_is_json`. Never fails: a reply
/// that is not JSON makes every JSON-dependent rule false.
pub fn validate(case: &PromptTestCase, raw: &str) -> BTreeMap<String, bool> {
    let parsed = parse_model_json(raw);
    let ctx = RuleContext {
        case,
        raw,
        parsed: parsed.as_ref(),
    };

    let mut results = BTreeMap::new();
    for name in &case.validation_rules {
        let outcome = if let Some(fixture) = case.fixture_check(name) {
            (fixture.check)(&ctx)
        } else if let Some(rule) = rules::lookup(case.prompt_type, name) {
            rule(&ctx)
        } else {
            warn!(test_case = %case.id, rule = %name, "Unknown validation rule");
            false
        };
        results.insert(name.clone(), outcome);
    }

    if case.prompt_type.expects_json() {
        results
            .entry(RESPONSE_IS_JSON.to_string())
            .or_insert(parsed.is_some());
    }

    results
}

/// Share of declared rules that passed, compared against `threshold`.
/// A case with no declared rules passes.
pub fn passes_threshold(case: &PromptTestCase, results: &BTreeMap<String, bool>, threshold: f64) -> bool {
    let declared = case.validation_rules.len();
    if declared == 0 {
        return true;
    }
    let passed = case
        .validation_rules
        .iter()
        .filter(|rule| results.get(rule.as_str()).copied().unwrap_or(false))
        .count();
    passed as f64 / declared as f64 >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::{PromptType, builtin_cases};

    fn case(prompt_type: PromptType) -> PromptTestCase {
        builtin_cases()
            .iter()
            .find(|c| c.prompt_type == prompt_type)
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_valid_case_generation_response() {
        let results = validate(
            &case(PromptType::CaseGeneration),
            r#"{"title": "X", "characters": [{"name":"a"}], "evidence": [{"name":"b"}], "solution":"s"}"#,
        );
        assert_eq!(results["has_required_fields"], true);
        assert_eq!(results["characters_array_not_empty"], true);
        assert_eq!(results["evidence_array_not_empty"], true);
        assert!(results.values().all(|ok| *ok));
    }

    #[test]
    fn test_non_json_fails_json_rules_without_panicking() {
        for prompt_type in [PromptType::CaseGeneration, PromptType::CharacterDetection] {
            let results = validate(&case(prompt_type), "not json");
            assert_eq!(results[RESPONSE_IS_JSON], false);
            assert_eq!(results["response_not_empty"], true);
            let json_rules = results.iter().filter(|(name, _)| name.as_str() != "response_not_empty");
            for (name, ok) in json_rules {
                assert!(!ok, "{} should fail on non-JSON", name);
            }
        }
    }

    #[test]
    fn test_fenced_json_is_accepted() {
        let raw = "```json\n[{\"role\": \"the gardener\"}, {\"role\": \"Cook\"}]\n```";
        let results = validate(&case(PromptType::CharacterDetection), raw);
        assert_eq!(results["is_array_format"], true);
        assert_eq!(results["detects_gardener_and_cook"], true);
    }

    #[test]
    fn test_detection_fixture_needs_both_roles() {
        let results = validate(
            &case(PromptType::CharacterDetection),
            r#"[{"role": "gardener", "context": "by the window"}]"#,
        );
        assert_eq!(results["detects_gardener_and_cook"], false);
        assert_eq!(results["is_array_format"], true);
    }

    #[test]
    fn test_json_flag_reported_even_when_undeclared() {
        let mut detection = case(PromptType::CharacterDetection);
        detection.validation_rules.retain(|r| r != RESPONSE_IS_JSON);
        let results = validate(&detection, "[]");
        assert_eq!(results[RESPONSE_IS_JSON], true);

        let free_text = validate(&case(PromptType::CharacterQuestion), "I was asleep.");
        assert!(!free_text.contains_key(RESPONSE_IS_JSON));
    }

    #[test]
    fn test_unknown_rule_is_false() {
        let mut question = case(PromptType::CharacterQuestion);
        question.validation_rules.push("mentions_the_moon".to_string());
        let results = validate(&question, "I saw the moon.");
        assert_eq!(results["mentions_the_moon"], false);
    }

    #[test]
    fn test_threshold() {
        let analysis = case(PromptType::EvidenceAnalysis);
        let mut results: BTreeMap<String, bool> =
            analysis.validation_rules.iter().map(|r| (r.clone(), true)).collect();
        assert!(passes_threshold(&analysis, &results, 0.8));

        // 3 of 4 is 75%
        results.insert("mentions_evidence".to_string(), false);
        assert!(!passes_threshold(&analysis, &results, 0.8));
        assert!(passes_threshold(&analysis, &results, 0.75));

        let mut empty = analysis.clone();
        empty.validation_rules.clear();
        assert!(passes_threshold(&empty, &BTreeMap::new(), 0.8));
    }
}
