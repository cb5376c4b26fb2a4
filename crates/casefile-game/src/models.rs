//! Detective case data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Collection holding cases
pub const CASES_COLLECTION: &str = "cases";

/// Placeholder sent to players instead of the real solution
pub const HIDDEN_SOLUTION: &str = "Hidden until case is solved";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: String,
    pub name: String,
    pub description: String,
    pub background: String,
    pub alibi: String,
    #[serde(default)]
    pub motive: Option<String>,
    #[serde(default)]
    pub is_culprit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    pub name: String,
    pub description: String,
    pub location_found: String,
    pub significance: String,
    #[serde(default)]
    pub is_key_evidence: bool,
}

/// Generated illustration attached to a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualScene {
    pub id: String,
    pub title: String,
    pub description: String,
    pub image_url: String,
    /// What produced the scene (`testimony`, `manual`, ...)
    pub generated_from: String,
    pub context: String,
    #[serde(default)]
    pub character_involved: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectiveCase {
    pub id: String,
    pub title: String,
    pub setting: String,
    pub crime_scene_description: String,
    #[serde(default)]
    pub crime_scene_image_url: Option<String>,
    pub victim_name: String,
    pub characters: Vec<Character>,
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub visual_scenes: Vec<VisualScene>,
    pub solution: String,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
}

fn default_difficulty() -> String {
    "medium".to_string()
}

impl DetectiveCase {
    /// Copy safe to send to players
    pub fn redacted(&self) -> Self {
        Self {
            solution: HIDDEN_SOLUTION.to_string(),
            ..self.clone()
        }
    }

    pub fn character(&self, id_or_name: &str) -> Option<&Character> {
        self.characters
            .iter()
            .find(|c| c.id == id_or_name)
            .or_else(|| self.characters.iter().find(|c| c.name == id_or_name))
    }

    pub fn character_names(&self) -> Vec<String> {
        self.characters.iter().map(|c| c.name.clone()).collect()
    }

    /// Evidence in the order of `ids`, skipping unknown ids
    pub fn evidence_by_ids(&self, ids: &[String]) -> Vec<&Evidence> {
        ids.iter()
            .filter_map(|id| self.evidence.iter().find(|e| &e.id == id))
            .collect()
    }

    /// Canned case used when the storyteller reply cannot be parsed
    pub fn fallback(now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            title: "Murder at Blackwood Manor".to_string(),
            setting: "A Victorian mansion during a thunderstorm in 1920s England".to_string(),
            crime_scene_description:
                "Lord Blackwood found dead in his locked study, a glass of brandy spilled beside him"
                    .to_string(),
            crime_scene_image_url: None,
            victim_name: "Lord Blackwood".to_string(),
            characters: vec![
                Character {
                    id: new_id(),
                    name: "Lady Margaret Blackwood".to_string(),
                    description: "The victim's wife, elegant but cold".to_string(),
                    background: "Married Lord Blackwood for his fortune 10 years ago".to_string(),
                    alibi: "Claims she was reading in her bedroom".to_string(),
                    motive: Some("Stands to inherit everything".to_string()),
                    is_culprit: false,
                },
                Character {
                    id: new_id(),
                    name: "Dr. Harrison".to_string(),
                    description: "The family physician and old friend".to_string(),
                    background: "Has been treating the family for 20 years".to_string(),
                    alibi: "Was examining medical equipment in his room".to_string(),
                    motive: Some("Lord Blackwood discovered Dr. Harrison's gambling debts".to_string()),
                    is_culprit: true,
                },
            ],
            evidence: vec![
                Evidence {
                    id: new_id(),
                    name: "Poisoned Brandy Glass".to_string(),
                    description: "A crystal glass with traces of cyanide".to_string(),
                    location_found: "Lord Blackwood's study desk".to_string(),
                    significance: "The murder weapon".to_string(),
                    is_key_evidence: true,
                },
                Evidence {
                    id: new_id(),
                    name: "Medical Bag".to_string(),
                    description: "Dr. Harrison's bag with missing cyanide vial".to_string(),
                    location_found: "Dr. Harrison's guest room".to_string(),
                    significance: "Contains the poison used in the murder".to_string(),
                    is_key_evidence: true,
                },
            ],
            visual_scenes: Vec::new(),
            solution: "Dr. Harrison poisoned Lord Blackwood's brandy with cyanide to prevent exposure of his gambling debts".to_string(),
            created_at: now,
            difficulty: default_difficulty(),
        }
    }
}

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Case as returned by the storyteller, before ids are assigned
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedCase {
    pub title: String,
    pub setting: String,
    pub crime_scene_description: String,
    pub victim_name: String,
    pub characters: Vec<GeneratedCharacter>,
    pub evidence: Vec<GeneratedEvidence>,
    pub solution: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedCharacter {
    pub name: String,
    pub description: String,
    pub background: String,
    pub alibi: String,
    #[serde(default)]
    pub motive: Option<String>,
    #[serde(default)]
    pub is_culprit: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedEvidence {
    pub name: String,
    pub description: String,
    pub location_found: String,
    pub significance: String,
    #[serde(default)]
    pub is_key_evidence: bool,
}

impl GeneratedCharacter {
    pub fn into_character(self) -> Character {
        Character {
            id: new_id(),
            name: self.name,
            description: self.description,
            background: self.background,
            alibi: self.alibi,
            motive: self.motive,
            is_culprit: self.is_culprit,
        }
    }
}

impl GeneratedCase {
    pub fn into_case(self, now: DateTime<Utc>) -> DetectiveCase {
        DetectiveCase {
            id: new_id(),
            title: self.title,
            setting: self.setting,
            crime_scene_description: self.crime_scene_description,
            crime_scene_image_url: None,
            victim_name: self.victim_name,
            characters: self
                .characters
                .into_iter()
                .map(GeneratedCharacter::into_character)
                .collect(),
            evidence: self
                .evidence
                .into_iter()
                .map(|e| Evidence {
                    id: new_id(),
                    name: e.name,
                    description: e.description,
                    location_found: e.location_found,
                    significance: e.significance,
                    is_key_evidence: e.is_key_evidence,
                })
                .collect(),
            visual_scenes: Vec::new(),
            solution: self.solution,
            created_at: now,
            difficulty: default_difficulty(),
        }
    }
}

/// A person mentioned in testimony who is not yet a character
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterMention {
    pub role: String,
    #[serde(default)]
    pub context: String,
}

/// Character created from a mention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredCharacter {
    pub character: Character,
    pub discovered_through: String,
    pub context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRequest {
    pub case_id: String,
    /// Character id (names are accepted too)
    pub character_id: String,
    pub question: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub character_name: String,
    pub response: String,
    pub new_character_mentions: Vec<CharacterMention>,
    pub new_characters_discovered: Vec<DiscoveredCharacter>,
    /// Set when a testimony scene was queued for illustration
    pub visual_scene_queued: bool,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub case_id: String,
    #[serde(default)]
    pub evidence_ids: Vec<String>,
    pub theory: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub analysis: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateCaseRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedCaseResponse {
    /// Redacted case
    pub case: DetectiveCase,
    pub session_id: String,
    /// True when the canned fallback case was served
    pub fallback: bool,
}

/// Add a character to a case on demand
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicCharacterRequest {
    pub case_id: String,
    /// Who the character is, e.g. "gardener"
    pub role: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicCharacterResponse {
    pub character: Character,
    pub session_id: String,
}

fn default_scene_type() -> String {
    "manual".to_string()
}

/// Illustrate a scene on demand
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualSceneRequest {
    pub case_id: String,
    pub scene_context: String,
    /// Stored as the scene's `generated_from`
    #[serde(default = "default_scene_type")]
    pub scene_type: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualSceneResponse {
    pub scene: VisualScene,
    pub session_id: String,
}
