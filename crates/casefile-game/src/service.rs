//! Detective game operations
//!
//! Every AI call goes through the tracked invoker so it is accounted for,
//! and every operation is gated by the rate limiter before the first call.

use casefile_core::{
    Clock, DocumentStore, Error, Invocation, Result, ServiceKind, ServiceModels, Update, parse_model_json,
};
use casefile_usage::{RateLimiter, TrackedInvoker};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::images::{ImageJob, ImageJobKind, ImageJobQueue};
use crate::models::{
    AnalysisRequest, AnalysisResponse, CASES_COLLECTION, Character, CharacterMention, DetectiveCase,
    DiscoveredCharacter, DynamicCharacterRequest, DynamicCharacterResponse, GeneratedCase, GeneratedCaseResponse,
    GeneratedCharacter, QuestionRequest, QuestionResponse, VisualScene, VisualSceneRequest, VisualSceneResponse,
    new_id,
};
use crate::prompts::{self, CaseContext};

/// Phrases in testimony that describe something worth illustrating
const VISUAL_TRIGGERS: [&str; 7] = [
    "i saw",
    "i witnessed",
    "there was",
    "i noticed",
    "i remember seeing",
    "picture this",
    "imagine",
];

/// Testimony shorter than this is never illustrated
const MIN_VISUAL_TESTIMONY_CHARS: usize = 50;

/// Mentions turned into characters per answer
const MAX_DISCOVERIES_PER_ANSWER: usize = 3;

pub struct DetectiveService {
    invoker: TrackedInvoker,
    limiter: Arc<RateLimiter>,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    models: ServiceModels,
    images: Arc<ImageJobQueue>,
}

impl DetectiveService {
    pub fn new(
        invoker: TrackedInvoker,
        limiter: Arc<RateLimiter>,
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        models: ServiceModels,
        images: Arc<ImageJobQueue>,
    ) -> Self {
        Self {
            invoker,
            limiter,
            store,
            clock,
            models,
            images,
        }
    }

    pub fn images(&self) -> &Arc<ImageJobQueue> {
        &self.images
    }

    fn invocation(&self, service: ServiceKind, prompt: String) -> Invocation {
        Invocation::new(
            service,
            self.models.model_for(service),
            prompts::system_prompt(service),
            prompt,
        )
    }

    /// Generate and store a new case, returning it without its solution.
    ///
    /// An unparseable storyteller reply yields the canned fallback case. The
    /// crime scene image is generated in the background.
    pub async fn generate_case(&self, session_id: Option<String>) -> Result<GeneratedCaseResponse> {
        let session_id = session_id.unwrap_or_else(new_id);
        self.limiter.enforce(&session_id).await?;

        let case_id = new_id();
        let reply = self
            .invoker
            .invoke(
                &session_id,
                Some(&case_id),
                "case_generation",
                &self.invocation(ServiceKind::Storyteller, prompts::case_generation(None, "medium")),
            )
            .await?;

        let now = self.clock.now();
        let (mut case, fallback) = match parse_generated_case(&reply) {
            Ok(generated) => (generated.into_case(now), false),
            Err(err) => {
                warn!(session_id = %session_id, "Storyteller returned an unusable case, serving fallback: {}", err);
                (DetectiveCase::fallback(now), true)
            }
        };
        case.id = case_id;

        self.store.insert_as(CASES_COLLECTION, &case).await?;
        info!(case_id = %case.id, session_id = %session_id, fallback, "Generated case '{}'", case.title);

        self.images.submit(ImageJob {
            case_id: case.id.clone(),
            session_id: session_id.clone(),
            kind: ImageJobKind::CrimeScene,
        });

        Ok(GeneratedCaseResponse {
            case: case.redacted(),
            session_id,
            fallback,
        })
    }

    async fn load_case(&self, case_id: &str) -> Result<DetectiveCase> {
        self.store
            .find_by_id_as(CASES_COLLECTION, case_id)
            .await?
            .ok_or_else(|| Error::NotFound("Case not found".to_string()))
    }

    /// A stored case without its solution
    pub async fn get_case(&self, case_id: &str) -> Result<DetectiveCase> {
        Ok(self.load_case(case_id).await?.redacted())
    }

    pub async fn case_scenes(&self, case_id: &str) -> Result<Vec<VisualScene>> {
        Ok(self.load_case(case_id).await?.visual_scenes)
    }

    /// Put a question to a character, then look for newly mentioned people
    pub async fn question_character(&self, request: QuestionRequest) -> Result<QuestionResponse> {
        let session_id = request.session_id.clone().unwrap_or_else(new_id);
        let case = self.load_case(&request.case_id).await?;
        let character = case
            .character(&request.character_id)
            .cloned()
            .ok_or_else(|| Error::NotFound("Character not found".to_string()))?;

        self.limiter.enforce(&session_id).await?;

        let names = case.character_names();
        let answer = self
            .invoker
            .invoke(
                &session_id,
                Some(&case.id),
                "character_question",
                &self.invocation(
                    ServiceKind::Storyteller,
                    prompts::character_question((&case).into(), &character, &names, &request.question),
                ),
            )
            .await?;

        let mentions = self
            .detect_mentions(&session_id, &case, &character, &request.question, &answer)
            .await;

        let mut discovered = Vec::new();
        for mention in mentions.iter().take(MAX_DISCOVERIES_PER_ANSWER) {
            if let Some(new_character) = self.discover_character(&session_id, &case, mention).await {
                discovered.push(DiscoveredCharacter {
                    character: new_character,
                    discovered_through: character.name.clone(),
                    context: mention.context.clone(),
                });
            }
        }

        let visual_scene_queued = is_visual_testimony(&answer)
            && self.images.submit(ImageJob {
                case_id: case.id.clone(),
                session_id: session_id.clone(),
                kind: ImageJobKind::Scene {
                    context: format!("{} testified: {}", character.name, answer),
                    generated_from: "testimony".to_string(),
                    character: Some(character.name.clone()),
                },
            });

        Ok(QuestionResponse {
            character_name: character.name,
            response: answer,
            new_character_mentions: mentions,
            new_characters_discovered: discovered,
            visual_scene_queued,
            session_id,
        })
    }

    /// Ask the logic model who else the answer mentions. Never fails.
    async fn detect_mentions(
        &self,
        session_id: &str,
        case: &DetectiveCase,
        character: &Character,
        question: &str,
        answer: &str,
    ) -> Vec<CharacterMention> {
        let prompt = prompts::character_detection(question, &character.name, answer, &case.character_names());
        match self
            .invoker
            .invoke(
                session_id,
                Some(&case.id),
                "character_detection",
                &self.invocation(ServiceKind::Logic, prompt),
            )
            .await
        {
            Ok(reply) => parse_mentions(&reply),
            Err(err) => {
                warn!(case_id = %case.id, "Mention detection failed: {}", err);
                Vec::new()
            }
        }
    }

    /// Turn a mention into a character. Failures only cost the discovery.
    async fn discover_character(
        &self,
        session_id: &str,
        case: &DetectiveCase,
        mention: &CharacterMention,
    ) -> Option<Character> {
        match self
            .create_character(session_id, case, &mention.role, &mention.context)
            .await
        {
            Ok(character) => Some(character),
            Err(err) => {
                debug!(case_id = %case.id, role = %mention.role, "Character not discovered: {}", err);
                None
            }
        }
    }

    /// Create a character for a role, vetted by the logic model, and add it to the case
    async fn create_character(
        &self,
        session_id: &str,
        case: &DetectiveCase,
        role: &str,
        role_context: &str,
    ) -> Result<Character> {
        let context = CaseContext::from(case);
        let reply = self
            .invoker
            .invoke(
                session_id,
                Some(&case.id),
                "character_generation",
                &self.invocation(
                    ServiceKind::Storyteller,
                    prompts::dynamic_character(context, role, role_context),
                ),
            )
            .await?;

        let raw = parse_model_json(&reply).ok_or_else(|| Error::Parse("character reply is not JSON".to_string()))?;
        let generated: GeneratedCharacter = serde_json::from_value(raw.clone())
            .map_err(|e| Error::Parse(format!("character reply has the wrong shape: {}", e)))?;

        let review = self
            .invoker
            .invoke(
                session_id,
                Some(&case.id),
                "character_validation",
                &self.invocation(
                    ServiceKind::Logic,
                    prompts::character_review(context, &raw.to_string(), role_context),
                ),
            )
            .await?;
        if !review.contains("VALID") || review.contains("ISSUES") {
            info!(case_id = %case.id, role = %role, "Generated character rejected by review");
            return Err(Error::upstream(
                ServiceKind::Logic,
                format!("generated {} was rejected by review", role),
            ));
        }

        let character = Character {
            is_culprit: false,
            ..generated.into_character()
        };
        let pushed = self
            .store
            .update(
                CASES_COLLECTION,
                &case.id,
                &Update::new().push("characters", serde_json::to_value(&character)?),
            )
            .await?;
        if !pushed {
            return Err(Error::NotFound("Case not found".to_string()));
        }
        Ok(character)
    }

    /// Add a character for a role to a case, outside of questioning
    pub async fn generate_dynamic_character(
        &self,
        request: DynamicCharacterRequest,
    ) -> Result<DynamicCharacterResponse> {
        if request.role.trim().is_empty() {
            return Err(Error::InvalidRequest("role must not be empty".to_string()));
        }
        let session_id = request.session_id.clone().unwrap_or_else(new_id);
        let case = self.load_case(&request.case_id).await?;
        self.limiter.enforce(&session_id).await?;

        let character = self
            .create_character(&session_id, &case, &request.role, &request.context)
            .await?;
        info!(case_id = %case.id, role = %request.role, "Added character '{}'", character.name);

        Ok(DynamicCharacterResponse { character, session_id })
    }

    /// Illustrate a scene and attach it to the case before returning
    pub async fn generate_visual_scene(&self, request: VisualSceneRequest) -> Result<VisualSceneResponse> {
        if request.scene_context.trim().is_empty() {
            return Err(Error::InvalidRequest("scene_context must not be empty".to_string()));
        }
        let session_id = request.session_id.clone().unwrap_or_else(new_id);
        let case = self.load_case(&request.case_id).await?;
        self.limiter.enforce(&session_id).await?;

        let scene = self
            .images
            .run_now(ImageJob {
                case_id: case.id.clone(),
                session_id: session_id.clone(),
                kind: ImageJobKind::Scene {
                    context: request.scene_context,
                    generated_from: request.scene_type,
                    character: None,
                },
            })
            .await?
            .ok_or_else(|| Error::Internal("scene job produced no scene".to_string()))?;

        Ok(VisualSceneResponse { scene, session_id })
    }

    /// Have the logic model assess a theory against selected evidence
    pub async fn analyze_evidence(&self, request: AnalysisRequest) -> Result<AnalysisResponse> {
        let session_id = request.session_id.clone().unwrap_or_else(new_id);
        let case = self.load_case(&request.case_id).await?;
        self.limiter.enforce(&session_id).await?;

        let evidence = case.evidence_by_ids(&request.evidence_ids);
        let suspects: Vec<&Character> = case.characters.iter().collect();
        let analysis = self
            .invoker
            .invoke(
                &session_id,
                Some(&case.id),
                "evidence_analysis",
                &self.invocation(
                    ServiceKind::Logic,
                    prompts::evidence_analysis((&case).into(), &evidence, &suspects, &request.theory),
                ),
            )
            .await?;

        Ok(AnalysisResponse { analysis, session_id })
    }
}

fn parse_generated_case(reply: &str) -> Result<GeneratedCase> {
    let value = parse_model_json(reply).ok_or_else(|| Error::Parse("case reply is not JSON".to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::Parse(format!("case reply has the wrong shape: {}", e)))
}

/// Mentions from a detection reply; anything unparseable is no mentions
pub fn parse_mentions(reply: &str) -> Vec<CharacterMention> {
    parse_model_json(reply)
        .and_then(|value| serde_json::from_value::<Vec<CharacterMention>>(value).ok())
        .unwrap_or_default()
}

fn is_visual_testimony(answer: &str) -> bool {
    if answer.chars().count() <= MIN_VISUAL_TESTIMONY_CHARS {
        return false;
    }
    let lower = answer.to_lowercase();
    VISUAL_TRIGGERS.iter().any(|trigger| lower.contains(trigger))
}
