//! Casefile detective game
//!
//! The game glue around the accounting core:
//! - `models`: cases, characters, evidence and request/response shapes
//! - `prompts`: prompt templates shared with the prompt test harness
//! - `service`: rate-limited case generation, questioning, analysis and
//!   on-demand characters and scenes
//! - `images`: detached crime scene and testimony illustration

pub mod images;
pub mod models;
pub mod prompts;
pub mod service;

pub use images::{FailureSink, ImageFailure, ImageJob, ImageJobKind, ImageJobQueue, ImageQueueConfig, ImageWorker};
pub use models::{
    AnalysisRequest, AnalysisResponse, CASES_COLLECTION, Character, CharacterMention, DetectiveCase,
    DiscoveredCharacter, DynamicCharacterRequest, DynamicCharacterResponse, Evidence, GenerateCaseRequest,
    GeneratedCaseResponse, HIDDEN_SOLUTION, QuestionRequest, QuestionResponse, VisualScene, VisualSceneRequest,
    VisualSceneResponse,
};
pub use service::{DetectiveService, parse_mentions};
