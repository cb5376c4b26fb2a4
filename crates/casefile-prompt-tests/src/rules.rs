//! Validation rule registry
//!
//! Rules are pure predicates over a response, keyed by the prompt type they
//! apply to. Generic rules are registered without a prompt type and apply
//! to every type.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

use crate::cases::{PromptTestCase, PromptType, TestInput};

/// Everything a rule may look at
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub case: &'a PromptTestCase,
    pub raw: &'a str,
    /// The response parsed as JSON, if it is JSON
    pub parsed: Option<&'a Value>,
}

pub type RuleFn = fn(&RuleContext<'_>) -> bool;

pub const MAX_WORDS: usize = 200;

const ANALYSIS_KEYWORDS: [&str; 10] = [
    "analysis",
    "analyze",
    "analyse",
    "logical",
    "conclude",
    "suggests",
    "indicates",
    "therefore",
    "because",
    "consistent",
];

static FIRST_PERSON: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\b(?:I|[Mm]e|[Mm]y|[Mm]yself)\b").ok());

type Registry = HashMap<Option<PromptType>, HashMap<&'static str, RuleFn>>;

static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::new();
    let mut register = |scope: Option<PromptType>, name: &'static str, rule: RuleFn| {
        registry.entry(scope).or_default().insert(name, rule);
    };

    register(None, "response_not_empty", response_not_empty);
    register(None, "response_under_200_words", response_under_200_words);
    register(None, "response_is_json", response_is_json);

    let case_generation = Some(PromptType::CaseGeneration);
    register(case_generation, "has_required_fields", has_required_fields);
    register(case_generation, "characters_array_not_empty", characters_array_not_empty);
    register(case_generation, "evidence_array_not_empty", evidence_array_not_empty);
    register(case_generation, "title_not_empty", title_not_empty);

    register(Some(PromptType::CharacterDetection), "is_array_format", is_array_format);

    register(Some(PromptType::CharacterQuestion), "stays_in_character", stays_in_character);

    let evidence_analysis = Some(PromptType::EvidenceAnalysis);
    register(evidence_analysis, "mentions_evidence", mentions_evidence);
    register(evidence_analysis, "provides_logical_analysis", provides_logical_analysis);
    register(
        evidence_analysis,
        "discusses_strengths_and_weaknesses",
        discusses_strengths_and_weaknesses,
    );

    registry
});

fn scoped(scope: Option<PromptType>, name: &str) -> Option<RuleFn> {
    REGISTRY.get(&scope).and_then(|rules| rules.get(name)).copied()
}

/// Rule for a prompt type, falling back to the generic rules
pub fn lookup(prompt_type: PromptType, name: &str) -> Option<RuleFn> {
    scoped(Some(prompt_type), name).or_else(|| scoped(None, name))
}

/// Every rule usable with a prompt type, sorted
pub fn rule_names(prompt_type: PromptType) -> Vec<&'static str> {
    let mut names: Vec<&'static str> = [None, Some(prompt_type)]
        .iter()
        .filter_map(|scope| REGISTRY.get(scope))
        .flat_map(|rules| rules.keys().copied())
        .collect();
    names.sort_unstable();
    names
}

fn response_not_empty(ctx: &RuleContext<'_>) -> bool {
    !ctx.raw.trim().is_empty()
}

fn response_under_200_words(ctx: &RuleContext<'_>) -> bool {
    ctx.raw.split_whitespace().count() <= MAX_WORDS
}

fn response_is_json(ctx: &RuleContext<'_>) -> bool {
    ctx.parsed.is_some()
}

fn has_required_fields(ctx: &RuleContext<'_>) -> bool {
    match ctx.parsed.and_then(Value::as_object) {
        Some(object) => ctx.case.expected_format.keys().all(|field| object.contains_key(field)),
        None => false,
    }
}

fn non_empty_array(ctx: &RuleContext<'_>, field: &str) -> bool {
    ctx.parsed
        .and_then(|v| v.get(field))
        .and_then(Value::as_array)
        .is_some_and(|items| !items.is_empty())
}

fn characters_array_not_empty(ctx: &RuleContext<'_>) -> bool {
    non_empty_array(ctx, "characters")
}

fn evidence_array_not_empty(ctx: &RuleContext<'_>) -> bool {
    non_empty_array(ctx, "evidence")
}

fn title_not_empty(ctx: &RuleContext<'_>) -> bool {
    ctx.parsed
        .and_then(|v| v.get("title"))
        .and_then(Value::as_str)
        .is_some_and(|title| !title.trim().is_empty())
}

fn is_array_format(ctx: &RuleContext<'_>) -> bool {
    ctx.parsed.is_some_and(Value::is_array)
}

/// First person, or any part of the character's name
fn stays_in_character(ctx: &RuleContext<'_>) -> bool {
    if FIRST_PERSON.as_ref().is_some_and(|re| re.is_match(ctx.raw)) {
        return true;
    }
    let TestInput::CharacterQuestion { character, .. } = &ctx.case.test_input else {
        return false;
    };
    let lower = ctx.raw.to_lowercase();
    character
        .name
        .split_whitespace()
        .map(|part| part.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|part| part.len() > 2)
        .any(|part| lower.contains(&part))
}

fn mentions_evidence(ctx: &RuleContext<'_>) -> bool {
    let lower = ctx.raw.to_lowercase();
    if lower.contains("evidence") {
        return true;
    }
    match &ctx.case.test_input {
        TestInput::EvidenceAnalysis { evidence, .. } => evidence
            .iter()
            .any(|e| lower.contains(&e.name.to_lowercase())),
        _ => false,
    }
}

fn provides_logical_analysis(ctx: &RuleContext<'_>) -> bool {
    let lower = ctx.raw.to_lowercase();
    ANALYSIS_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

fn discusses_strengths_and_weaknesses(ctx: &RuleContext<'_>) -> bool {
    let lower = ctx.raw.to_lowercase();
    let strengths = ["strength", "support"].iter().any(|w| lower.contains(w));
    let weaknesses = ["weak", "however", "contradict", "gap"].iter().any(|w| lower.contains(w));
    strengths && weaknesses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::builtin_cases;
    use casefile_core::parse_model_json;

    fn case(prompt_type: PromptType) -> &'static PromptTestCase {
        builtin_cases()
            .iter()
            .find(|c| c.prompt_type == prompt_type)
            .unwrap()
    }

    fn eval(prompt_type: PromptType, rule: &str, raw: &str) -> bool {
        let parsed = parse_model_json(raw);
        let ctx = RuleContext {
            case: case(prompt_type),
            raw,
            parsed: parsed.as_ref(),
        };
        lookup(prompt_type, rule).unwrap()(&ctx)
    }

    #[test]
    fn test_generic_rules_apply_everywhere() {
        for prompt_type in PromptType::ALL {
            assert!(lookup(prompt_type, "response_not_empty").is_some());
            assert!(lookup(prompt_type, "response_is_json").is_some());
        }
        assert!(!eval(PromptType::CharacterQuestion, "response_not_empty", "  \n "));
        assert!(eval(PromptType::CharacterQuestion, "response_under_200_words", &"word ".repeat(200)));
        assert!(!eval(PromptType::CharacterQuestion, "response_under_200_words", &"word ".repeat(201)));
    }

    #[test]
    fn test_rules_are_scoped_to_prompt_type() {
        assert!(lookup(PromptType::CharacterQuestion, "has_required_fields").is_none());
        assert!(lookup(PromptType::CaseGeneration, "detects_gardener_and_cook").is_none());
        let names = rule_names(PromptType::EvidenceAnalysis);
        assert!(names.contains(&"mentions_evidence"));
        assert!(!names.contains(&"is_array_format"));
    }

    #[test]
    fn test_case_generation_rules() {
        let raw = r#"{"title": "X", "characters": [{"name":"a"}], "evidence": [{"name":"b"}], "solution":"s"}"#;
        assert!(eval(PromptType::CaseGeneration, "has_required_fields", raw));
        assert!(eval(PromptType::CaseGeneration, "characters_array_not_empty", raw));
        assert!(eval(PromptType::CaseGeneration, "evidence_array_not_empty", raw));
        assert!(eval(PromptType::CaseGeneration, "title_not_empty", raw));

        let missing = r#"{"title": " ", "characters": [], "solution": "s"}"#;
        assert!(!eval(PromptType::CaseGeneration, "has_required_fields", missing));
        assert!(!eval(PromptType::CaseGeneration, "characters_array_not_empty", missing));
        assert!(!eval(PromptType::CaseGeneration, "title_not_empty", missing));
    }

    #[test]
    fn test_stays_in_character() {
        assert!(eval(PromptType::CharacterQuestion, "stays_in_character", "I was reading upstairs."));
        assert!(eval(
            PromptType::CharacterQuestion,
            "stays_in_character",
            "Lady Blackwood sighs and looks away."
        ));
        assert!(!eval(PromptType::CharacterQuestion, "stays_in_character", "The weather was dreadful."));
        // "I" inside a word is not first person
        assert!(!eval(PromptType::CharacterQuestion, "stays_in_character", "Inclement weather."));
    }

    #[test]
    fn test_evidence_analysis_keywords() {
        let raw = "The medical bag supports the theory. However, nothing places him in the study, \
                   which suggests an accomplice.";
        assert!(eval(PromptType::EvidenceAnalysis, "mentions_evidence", raw));
        assert!(eval(PromptType::EvidenceAnalysis, "provides_logical_analysis", raw));
        assert!(eval(PromptType::EvidenceAnalysis, "discusses_strengths_and_weaknesses", raw));

        let thin = "He did it.";
        assert!(!eval(PromptType::EvidenceAnalysis, "mentions_evidence", thin));
        assert!(!eval(PromptType::EvidenceAnalysis, "provides_logical_analysis", thin));
        assert!(!eval(PromptType::EvidenceAnalysis, "discusses_strengths_and_weaknesses", thin));
    }

    #[test]
    fn test_array_format() {
        assert!(eval(PromptType::CharacterDetection, "is_array_format", "[]"));
        assert!(!eval(PromptType::CharacterDetection, "is_array_format", r#"{"role": "cook"}"#));
        assert!(!eval(PromptType::CharacterDetection, "is_array_format", "not json"));
    }
}
