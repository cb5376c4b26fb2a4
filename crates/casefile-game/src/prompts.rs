//! Prompt templates for the storyteller, logic and image services
//!
//! Templates are pure functions over borrowed context so the game and the
//! prompt test harness build exactly the same prompts.

use casefile_core::ServiceKind;

use crate::models::{Character, DetectiveCase, Evidence};

pub const STORYTELLER_SYSTEM_PROMPT: &str = "You are the Storyteller AI of a two-model detective game. \
You write immersive mysteries: vivid settings, characters with believable motives and alibis, \
atmospheric crime scenes and in-character dialogue when suspects are questioned. \
Keep every detail consistent with the case you are given.";

pub const LOGIC_SYSTEM_PROMPT: &str = "You are the Logic AI of a two-model detective game. \
You analyse evidence, check testimony and theories for contradictions, and guide the player's \
deductions. Reason step by step and keep to the facts of the case.";

/// System prompt for a service (empty for the image service)
pub fn system_prompt(service: ServiceKind) -> &'static str {
    match service {
        ServiceKind::Storyteller => STORYTELLER_SYSTEM_PROMPT,
        ServiceKind::Logic => LOGIC_SYSTEM_PROMPT,
        ServiceKind::Image => "",
    }
}

/// Top-level keys a generated case must contain
pub const CASE_FIELDS: [&str; 7] = [
    "title",
    "setting",
    "crime_scene_description",
    "victim_name",
    "characters",
    "evidence",
    "solution",
];

/// The case facts every prompt about a case needs
#[derive(Debug, Clone, Copy)]
pub struct CaseContext<'a> {
    pub title: &'a str,
    pub setting: &'a str,
    pub victim_name: &'a str,
    pub crime_scene_description: &'a str,
}

impl<'a> From<&'a DetectiveCase> for CaseContext<'a> {
    fn from(case: &'a DetectiveCase) -> Self {
        Self {
            title: &case.title,
            setting: &case.setting,
            victim_name: &case.victim_name,
            crime_scene_description: &case.crime_scene_description,
        }
    }
}

/// Ask the storyteller for a complete case as JSON
pub fn case_generation(setting_hint: Option<&str>, difficulty: &str) -> String {
    let setting = setting_hint
        .map(|hint| format!("Set the mystery in: {}.", hint))
        .unwrap_or_else(|| {
            "Choose an evocative location such as a country mansion, an ocean liner or a remote resort."
                .to_string()
        });

    format!(
        r#"Write a complete detective mystery of {difficulty} difficulty.

{setting}

Include:
1. A title and a setting (place and period)
2. The victim and a description of the crime scene
3. Four or five characters, each with a background, an alibi and a motive
4. Six to eight pieces of evidence, each with where it was found and why it matters
5. A solution explaining who did it and how

The case must be solvable, with red herrings and several plausible suspects.

Reply with JSON only, using exactly this structure:
{{
  "title": "...",
  "setting": "...",
  "crime_scene_description": "...",
  "victim_name": "...",
  "characters": [
    {{"name": "...", "description": "...", "background": "...", "alibi": "...", "motive": "...", "is_culprit": false}}
  ],
  "evidence": [
    {{"name": "...", "description": "...", "location_found": "...", "significance": "...", "is_key_evidence": false}}
  ],
  "solution": "..."
}}"#
    )
}

/// Have the storyteller answer a question in character
pub fn character_question(case: CaseContext<'_>, character: &Character, others: &[String], question: &str) -> String {
    format!(
        r#"You are {name}, a character in the detective mystery "{title}".

WHO YOU ARE:
- Description: {description}
- Background: {background}
- Your alibi: {alibi}
- Possible motive: {motive}
- You are the culprit: {culprit}

THE CASE:
- Victim: {victim}
- Setting: {setting}
- Crime scene: {scene}
- Others involved: {others}

The detective asks: "{question}"

Answer as {name}, in the first person:
- Stay consistent with your background and alibi
- Show fitting emotion; if guilty, deflect subtly rather than confess
- Feel free to mention other people who were around (staff, visitors, neighbours)

Keep the answer conversational and under 150 words."#,
        name = character.name,
        title = case.title,
        description = character.description,
        background = character.background,
        alibi = character.alibi,
        motive = character.motive.as_deref().unwrap_or("No clear motive"),
        culprit = if character.is_culprit { "Yes" } else { "No" },
        victim = case.victim_name,
        setting = case.setting,
        scene = case.crime_scene_description,
        others = others.join(", "),
    )
}

/// Ask the logic model which new people a testimony mentions
pub fn character_detection(question: &str, character_name: &str, answer: &str, existing: &[String]) -> String {
    format!(
        r#"Read this exchange from a detective interview and list every NEW person mentioned who could be questioned.

Detective: "{question}"
{character_name}: "{answer}"

Already known (do not list): {existing}

Look for staff (gardener, cook, maid, butler, driver...), visitors, neighbours, relatives not yet listed and tradespeople.

Reply with a JSON array only:
[
  {{"role": "role or title", "context": "what was said about them"}}
]
Reply with [] if nobody new is mentioned."#,
        existing = existing.join(", "),
    )
}

/// Ask the logic model to critique a theory against evidence
pub fn evidence_analysis(case: CaseContext<'_>, evidence: &[&Evidence], suspects: &[&Character], theory: &str) -> String {
    let evidence_text = if evidence.is_empty() {
        "No specific evidence selected".to_string()
    } else {
        evidence
            .iter()
            .map(|e| {
                format!(
                    "- {}: {} (found: {}, significance: {})",
                    e.name, e.description, e.location_found, e.significance
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    let suspects_text = suspects
        .iter()
        .map(|c| format!("{} ({})", c.name, c.description))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"Assess the detective's theory for the case "{title}".

CASE:
- Victim: {victim}
- Setting: {setting}
- Crime scene: {scene}

THEORY:
{theory}

EVIDENCE CONSIDERED:
{evidence_text}

SUSPECTS:
{suspects_text}

Cover:
1. Strengths: which evidence supports the theory
2. Weaknesses and gaps: what does not fit or is missing
3. How the selected evidence connects
4. What to investigate next
5. Alternative explanations
6. Whether the timeline is logically consistent"#,
        title = case.title,
        victim = case.victim_name,
        setting = case.setting,
        scene = case.crime_scene_description,
    )
}

/// Ask the storyteller for a new character matching a mention, as JSON
pub fn dynamic_character(case: CaseContext<'_>, role: &str, context: &str) -> String {
    format!(
        r#"Create a new character for the detective mystery "{title}" from this mention.

CASE:
- Setting: {setting}
- Victim: {victim}
- Crime scene: {scene}

MENTION:
- Role: {role}
- Context: {context}

The character needs a period-appropriate name, a short description, a background tying them to the case, an alibi and a motive (even a weak one). Make them a person of interest without making them obviously guilty.

Reply with a JSON object only:
{{"name": "...", "description": "...", "background": "...", "alibi": "...", "motive": "..."}}"#,
        title = case.title,
        setting = case.setting,
        victim = case.victim_name,
        scene = case.crime_scene_description,
    )
}

/// Ask the logic model to vet a generated character; a sound character gets `VALID`
pub fn character_review(case: CaseContext<'_>, character_json: &str, context: &str) -> String {
    format!(
        r#"Check this generated character for consistency with the case.

CASE: {title}
SETTING: {setting}
CHARACTER: {character_json}
ORIGINAL MENTION: "{context}"

Does the character fit the setting and period, have a realistic background and alibi, and a believable motive?
If so reply with VALID. Otherwise reply with ISSUES: followed by the problems."#,
        title = case.title,
        setting = case.setting,
    )
}

/// Ask the storyteller for an image prompt of the crime scene
pub fn crime_scene_image_request(case: CaseContext<'_>) -> String {
    format!(
        r#"Write an image generation prompt for this crime scene.

CASE: {title}
SETTING: {setting}
CRIME SCENE: {scene}
VICTIM: {victim}

Show the location itself with noir lighting, period details and visible clues. Keep it mysterious, not graphic.
Reply with the image prompt only."#,
        title = case.title,
        setting = case.setting,
        scene = case.crime_scene_description,
        victim = case.victim_name,
    )
}

/// Ask the storyteller for an image prompt illustrating a scene from the case
pub fn scene_image_request(case: CaseContext<'_>, scene_context: &str) -> String {
    format!(
        r#"Write an image generation prompt for a scene from the detective case "{title}".

SETTING: {setting}
CRIME SCENE: {scene}

SCENE TO SHOW:
{scene_context}

Use a cinematic noir style with period details and moody lighting. Keep it under 200 words and not graphic.
Reply with the image prompt only."#,
        title = case.title,
        setting = case.setting,
        scene = case.crime_scene_description,
    )
}

/// Final prompt sent to the image service
pub fn image_prompt(style: &str, description: &str) -> String {
    format!("{}: {}", style, description.trim())
}

pub const CRIME_SCENE_STYLE: &str = "Detective noir crime scene, atmospheric lighting, cinematic mystery";
pub const SCENE_STYLE: &str = "Detective noir style, atmospheric lighting, cinematic composition";

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_case_generation_lists_required_fields() {
        let prompt = case_generation(Some("a lighthouse"), "hard");
        for field in CASE_FIELDS {
            assert!(prompt.contains(&format!("\"{}\"", field)), "missing {}", field);
        }
        assert!(prompt.contains("a lighthouse"));
        assert!(prompt.contains("hard difficulty"));
    }

    #[test]
    fn test_character_question_uses_character() {
        let case = DetectiveCase::fallback(Utc::now());
        let character = &case.characters[1];
        let prompt = character_question((&case).into(), character, &case.character_names(), "Where were you?");
        assert!(prompt.contains("You are Dr. Harrison"));
        assert!(prompt.contains("You are the culprit: Yes"));
        assert!(prompt.contains("\"Where were you?\""));
        assert!(prompt.contains("Lady Margaret Blackwood"));
    }

    #[test]
    fn test_evidence_analysis_without_evidence() {
        let case = DetectiveCase::fallback(Utc::now());
        let suspects: Vec<&Character> = case.characters.iter().collect();
        let prompt = evidence_analysis((&case).into(), &[], &suspects, "The wife did it");
        assert!(prompt.contains("No specific evidence selected"));
        assert!(prompt.contains("Dr. Harrison (The family physician and old friend)"));
    }

    #[test]
    fn test_image_prompt_trims_description() {
        assert_eq!(image_prompt(SCENE_STYLE, "  a study  \n"), format!("{}: a study", SCENE_STYLE));
    }

    #[test]
    fn test_system_prompts() {
        assert!(system_prompt(ServiceKind::Storyteller).contains("Storyteller"));
        assert!(system_prompt(ServiceKind::Logic).contains("Logic"));
        assert!(system_prompt(ServiceKind::Image).is_empty());
    }
}
