//! Test case registry
//!
//! A fixed catalog with one representative case per prompt type, plus
//! ad-hoc cases that send a caller-supplied prompt through the same
//! validation pipeline.

use casefile_core::{Error, Result, ServiceKind};
use casefile_game::prompts::{self, CaseContext};
use casefile_game::{Character, Evidence};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::rules::RuleContext;

/// The prompt families the harness knows how to exercise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    CaseGeneration,
    CharacterQuestion,
    CharacterDetection,
    EvidenceAnalysis,
}

/// Shape a prompt type's response is expected to have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    JsonObject,
    JsonArray,
    FreeText,
}

impl PromptType {
    pub const ALL: [PromptType; 4] = [
        PromptType::CaseGeneration,
        PromptType::CharacterQuestion,
        PromptType::CharacterDetection,
        PromptType::EvidenceAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PromptType::CaseGeneration => "case_generation",
            PromptType::CharacterQuestion => "character_question",
            PromptType::CharacterDetection => "character_detection",
            PromptType::EvidenceAnalysis => "evidence_analysis",
        }
    }

    /// Service the built-in case for this type is sent to
    pub fn default_service(&self) -> ServiceKind {
        match self {
            PromptType::CaseGeneration | PromptType::CharacterQuestion => ServiceKind::Storyteller,
            PromptType::CharacterDetection | PromptType::EvidenceAnalysis => ServiceKind::Logic,
        }
    }

    pub fn response_format(&self) -> ResponseFormat {
        match self {
            PromptType::CaseGeneration => ResponseFormat::JsonObject,
            PromptType::CharacterDetection => ResponseFormat::JsonArray,
            PromptType::CharacterQuestion | PromptType::EvidenceAnalysis => ResponseFormat::FreeText,
        }
    }

    pub fn expects_json(&self) -> bool {
        self.response_format() != ResponseFormat::FreeText
    }
}

impl fmt::Display for PromptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PromptType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| Error::InvalidRequest(format!("Unknown prompt type: {}", s)))
    }
}

/// Case facts shared by the prompts that talk about an existing case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseFixture {
    pub title: String,
    pub setting: String,
    pub victim_name: String,
    pub crime_scene_description: String,
}

impl CaseFixture {
    pub fn context(&self) -> CaseContext<'_> {
        CaseContext {
            title: &self.title,
            setting: &self.setting,
            victim_name: &self.victim_name,
            crime_scene_description: &self.crime_scene_description,
        }
    }
}

/// Parameters the prompt for a test case is built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestInput {
    CaseGeneration {
        setting_hint: Option<String>,
        difficulty: String,
    },
    CharacterQuestion {
        case: CaseFixture,
        character: Character,
        other_characters: Vec<String>,
        question: String,
    },
    CharacterDetection {
        question: String,
        character_name: String,
        answer: String,
        existing_characters: Vec<String>,
    },
    EvidenceAnalysis {
        case: CaseFixture,
        evidence: Vec<Evidence>,
        suspects: Vec<Character>,
        theory: String,
    },
    /// Prompt text used verbatim
    Custom { prompt: String },
}

impl TestInput {
    fn prompt_type(&self) -> Option<PromptType> {
        match self {
            TestInput::CaseGeneration { .. } => Some(PromptType::CaseGeneration),
            TestInput::CharacterQuestion { .. } => Some(PromptType::CharacterQuestion),
            TestInput::CharacterDetection { .. } => Some(PromptType::CharacterDetection),
            TestInput::EvidenceAnalysis { .. } => Some(PromptType::EvidenceAnalysis),
            TestInput::Custom { .. } => None,
        }
    }
}

/// A predicate that only makes sense for one fixture's input
#[derive(Debug, Clone, Copy)]
pub struct FixtureCheck {
    pub name: &'static str,
    pub check: fn(&RuleContext<'_>) -> bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTestCase {
    pub id: String,
    pub name: String,
    pub prompt_type: PromptType,
    pub service: ServiceKind,
    pub test_input: TestInput,
    /// Field name to a description of its expected shape
    pub expected_format: BTreeMap<String, String>,
    /// Rule names, evaluated in order
    pub validation_rules: Vec<String>,
    pub description: String,
    #[serde(skip)]
    pub fixture_checks: Vec<FixtureCheck>,
}

impl PromptTestCase {
    /// System and user prompt for this case
    pub fn build_prompt(&self) -> Result<(String, String)> {
        let system = prompts::system_prompt(self.service).to_string();

        if let Some(input_type) = self.test_input.prompt_type()
            && input_type != self.prompt_type
        {
            return Err(Error::InvalidRequest(format!(
                "Test case '{}' is a {} case with {} input",
                self.id, self.prompt_type, input_type
            )));
        }

        let user = match &self.test_input {
            TestInput::CaseGeneration {
                setting_hint,
                difficulty,
            } => prompts::case_generation(setting_hint.as_deref(), difficulty),
            TestInput::CharacterQuestion {
                case,
                character,
                other_characters,
                question,
            } => prompts::character_question(case.context(), character, other_characters, question),
            TestInput::CharacterDetection {
                question,
                character_name,
                answer,
                existing_characters,
            } => prompts::character_detection(question, character_name, answer, existing_characters),
            TestInput::EvidenceAnalysis {
                case,
                evidence,
                suspects,
                theory,
            } => {
                let evidence: Vec<&Evidence> = evidence.iter().collect();
                let suspects: Vec<&Character> = suspects.iter().collect();
                prompts::evidence_analysis(case.context(), &evidence, &suspects, theory)
            }
            TestInput::Custom { prompt } => prompt.clone(),
        };

        Ok((system, user))
    }

    pub fn fixture_check(&self, name: &str) -> Option<&FixtureCheck> {
        self.fixture_checks.iter().find(|c| c.name == name)
    }

    /// Ad-hoc case for a raw prompt, validated with the built-in rules of its type
    pub fn custom(prompt_type: PromptType, prompt: impl Into<String>, service: Option<ServiceKind>) -> Self {
        let template = builtin_for(prompt_type);
        let fixture_names: Vec<&str> = template.fixture_checks.iter().map(|c| c.name).collect();

        Self {
            id: format!("custom_{}", prompt_type),
            name: format!("Custom {} prompt", prompt_type),
            prompt_type,
            service: service.unwrap_or_else(|| prompt_type.default_service()),
            test_input: TestInput::Custom { prompt: prompt.into() },
            expected_format: template.expected_format.clone(),
            validation_rules: template
                .validation_rules
                .iter()
                .filter(|rule| !fixture_names.contains(&rule.as_str()))
                .cloned()
                .collect(),
            description: format!("Ad-hoc validation of a {} prompt", prompt_type),
            fixture_checks: Vec::new(),
        }
    }
}

static CATALOG: Lazy<Vec<PromptTestCase>> = Lazy::new(|| {
    vec![
        case_generation_case(),
        character_question_case(),
        character_detection_case(),
        evidence_analysis_case(),
    ]
});

/// The built-in test cases, one per prompt type
pub fn builtin_cases() -> &'static [PromptTestCase] {
    &CATALOG
}

fn builtin_for(prompt_type: PromptType) -> &'static PromptTestCase {
    // The catalog is declared in PromptType::ALL order
    &CATALOG[PromptType::ALL
        .iter()
        .position(|t| *t == prompt_type)
        .unwrap_or_default()]
}

fn rules(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn expected(fields: &[(&str, &str)]) -> BTreeMap<String, String> {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn blackwood() -> CaseFixture {
    CaseFixture {
        title: "Murder at Blackwood Manor".to_string(),
        setting: "A Victorian mansion during a thunderstorm in 1920s England".to_string(),
        victim_name: "Lord Blackwood".to_string(),
        crime_scene_description: "Lord Blackwood found dead in his locked study, a glass of brandy spilled beside him"
            .to_string(),
    }
}

fn fixture_character(name: &str, description: &str, alibi: &str, motive: &str, is_culprit: bool) -> Character {
    Character {
        id: name.to_lowercase().replace(' ', "_"),
        name: name.to_string(),
        description: description.to_string(),
        background: format!("{} has known the Blackwood family for years", name),
        alibi: alibi.to_string(),
        motive: Some(motive.to_string()),
        is_culprit,
    }
}

fn case_generation_case() -> PromptTestCase {
    PromptTestCase {
        id: "case_generation_basic".to_string(),
        name: "Basic case generation".to_string(),
        prompt_type: PromptType::CaseGeneration,
        service: ServiceKind::Storyteller,
        test_input: TestInput::CaseGeneration {
            setting_hint: None,
            difficulty: "medium".to_string(),
        },
        expected_format: expected(&[
            ("title", "non-empty string"),
            ("characters", "non-empty array of character objects"),
            ("evidence", "non-empty array of evidence objects"),
            ("solution", "string"),
        ]),
        validation_rules: rules(&[
            "response_not_empty",
            "response_is_json",
            "has_required_fields",
            "characters_array_not_empty",
            "evidence_array_not_empty",
            "title_not_empty",
        ]),
        description: "The storyteller produces a complete case as a JSON object".to_string(),
        fixture_checks: Vec::new(),
    }
}

fn character_question_case() -> PromptTestCase {
    let margaret = fixture_character(
        "Lady Margaret Blackwood",
        "The victim's wife, elegant but cold",
        "Claims she was reading in her bedroom",
        "Stands to inherit everything",
        false,
    );
    PromptTestCase {
        id: "character_question_basic".to_string(),
        name: "Character stays in role".to_string(),
        prompt_type: PromptType::CharacterQuestion,
        service: ServiceKind::Storyteller,
        test_input: TestInput::CharacterQuestion {
            case: blackwood(),
            character: margaret,
            other_characters: vec!["Dr. Harrison".to_string(), "James the butler".to_string()],
            question: "Where were you when the storm knocked out the lights?".to_string(),
        },
        expected_format: expected(&[("response", "first-person answer under 200 words")]),
        validation_rules: rules(&["response_not_empty", "response_under_200_words", "stays_in_character"]),
        description: "A suspect answers the detective in character".to_string(),
        fixture_checks: Vec::new(),
    }
}

fn character_detection_case() -> PromptTestCase {
    PromptTestCase {
        id: "character_detection_basic".to_string(),
        name: "Detects mentioned staff".to_string(),
        prompt_type: PromptType::CharacterDetection,
        service: ServiceKind::Logic,
        test_input: TestInput::CharacterDetection {
            question: "Did you see anyone near the study that evening?".to_string(),
            character_name: "Dr. Harrison".to_string(),
            answer: "I noticed the gardener lingering by the study window around nine, and the cook \
                     hurried out through the kitchen door shortly after. Lady Margaret was upstairs, I believe."
                .to_string(),
            existing_characters: vec!["Lady Margaret Blackwood".to_string(), "Dr. Harrison".to_string()],
        },
        expected_format: expected(&[("role", "string"), ("context", "string")]),
        validation_rules: rules(&[
            "response_not_empty",
            "response_is_json",
            "is_array_format",
            "detects_gardener_and_cook",
        ]),
        description: "The logic model lists people mentioned in testimony who are not yet characters".to_string(),
        fixture_checks: vec![FixtureCheck {
            name: "detects_gardener_and_cook",
            check: detects_gardener_and_cook,
        }],
    }
}

fn evidence_analysis_case() -> PromptTestCase {
    let harrison = fixture_character(
        "Dr. Harrison",
        "The family physician and old friend",
        "Was examining medical equipment in his room",
        "Lord Blackwood discovered his gambling debts",
        true,
    );
    let margaret = fixture_character(
        "Lady Margaret Blackwood",
        "The victim's wife, elegant but cold",
        "Claims she was reading in her bedroom",
        "Stands to inherit everything",
        false,
    );
    PromptTestCase {
        id: "evidence_analysis_basic".to_string(),
        name: "Theory assessment".to_string(),
        prompt_type: PromptType::EvidenceAnalysis,
        service: ServiceKind::Logic,
        test_input: TestInput::EvidenceAnalysis {
            case: blackwood(),
            evidence: vec![
                Evidence {
                    id: "brandy_glass".to_string(),
                    name: "Poisoned Brandy Glass".to_string(),
                    description: "A crystal glass with traces of cyanide".to_string(),
                    location_found: "Lord Blackwood's study desk".to_string(),
                    significance: "The murder weapon".to_string(),
                    is_key_evidence: true,
                },
                Evidence {
                    id: "medical_bag".to_string(),
                    name: "Medical Bag".to_string(),
                    description: "Dr. Harrison's bag with a missing cyanide vial".to_string(),
                    location_found: "Dr. Harrison's guest room".to_string(),
                    significance: "Source of the poison".to_string(),
                    is_key_evidence: true,
                },
            ],
            suspects: vec![margaret, harrison],
            theory: "Dr. Harrison poisoned the brandy with cyanide from his own bag".to_string(),
        },
        expected_format: expected(&[("analysis", "free text covering strengths and weaknesses")]),
        validation_rules: rules(&[
            "response_not_empty",
            "mentions_evidence",
            "provides_logical_analysis",
            "discusses_strengths_and_weaknesses",
        ]),
        description: "The logic model critiques a theory against selected evidence".to_string(),
        fixture_checks: Vec::new(),
    }
}

fn detects_gardener_and_cook(ctx: &RuleContext<'_>) -> bool {
    let Some(items) = ctx.parsed.and_then(|v| v.as_array()) else {
        return false;
    };
    let roles: Vec<String> = items
        .iter()
        .filter_map(|item| item.get("role").and_then(|r| r.as_str()))
        .map(str::to_lowercase)
        .collect();
    roles.iter().any(|r| r.contains("gardener")) && roles.iter().any(|r| r.contains("cook"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_covers_every_prompt_type() {
        let cases = builtin_cases();
        assert_eq!(cases.len(), 4);
        for (case, prompt_type) in cases.iter().zip(PromptType::ALL) {
            assert_eq!(case.prompt_type, prompt_type);
            assert!(!case.validation_rules.is_empty());
            assert!(case.build_prompt().is_ok());
        }
    }

    #[test]
    fn test_prompt_type_parsing() {
        assert_eq!("character_detection".parse::<PromptType>().unwrap(), PromptType::CharacterDetection);
        assert!("image_generation".parse::<PromptType>().is_err());
        assert_eq!(
            serde_json::to_value(PromptType::EvidenceAnalysis).unwrap(),
            serde_json::json!("evidence_analysis")
        );
    }

    #[test]
    fn test_detection_prompt_carries_fixture_conversation() {
        let case = builtin_for(PromptType::CharacterDetection);
        let (system, user) = case.build_prompt().unwrap();
        assert!(system.contains("Logic AI"));
        assert!(user.contains("the gardener"));
        assert!(user.contains("the cook"));
        assert!(case.fixture_check("detects_gardener_and_cook").is_some());
    }

    #[test]
    fn test_custom_case_drops_fixture_rules() {
        let case = PromptTestCase::custom(PromptType::CharacterDetection, "List the people.", None);
        assert_eq!(case.service, ServiceKind::Logic);
        assert!(!case.validation_rules.iter().any(|r| r == "detects_gardener_and_cook"));
        assert!(case.validation_rules.iter().any(|r| r == "is_array_format"));
        assert_eq!(case.build_prompt().unwrap().1, "List the people.");

        let case = PromptTestCase::custom(PromptType::CaseGeneration, "x", Some(ServiceKind::Logic));
        assert_eq!(case.service, ServiceKind::Logic);
    }

    #[test]
    fn test_mismatched_input_is_rejected() {
        let mut case = builtin_for(PromptType::CaseGeneration).clone();
        case.prompt_type = PromptType::EvidenceAnalysis;
        assert!(matches!(case.build_prompt(), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_catalog_serializes_without_fixture_checks() {
        let json = serde_json::to_value(builtin_for(PromptType::CharacterDetection)).unwrap();
        assert!(json.get("fixture_checks").is_none());
        assert_eq!(json["test_input"]["kind"], "character_detection");
        assert_eq!(json["service"], "logic-service");
    }
}
