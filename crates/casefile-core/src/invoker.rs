//! AI invocation trait definitions

use serde::{Deserialize, Serialize};

use crate::{Result, ServiceKind};

/// A single call to an external AI service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub service: ServiceKind,
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
}

impl Invocation {
    pub fn new(
        service: ServiceKind,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self {
            service,
            model: model.into(),
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
        }
    }
}

/// Talks to the storyteller, logic and image services.
///
/// Text services return the model's reply; the image service returns the
/// URL of the generated image. Network, auth and quota failures surface as
/// `Error::Upstream`.
#[async_trait::async_trait]
pub trait AiInvoker: Send + Sync {
    async fn invoke(&self, invocation: &Invocation) -> Result<String>;
}

/// Model identifier used for each service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceModels {
    #[serde(default = "default_storyteller_model")]
    pub storyteller: String,
    #[serde(default = "default_logic_model")]
    pub logic: String,
    #[serde(default = "default_image_model")]
    pub image: String,
}

fn default_storyteller_model() -> String {
    "gpt-4.1".to_string()
}

fn default_logic_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_image_model() -> String {
    "fal-ai/flux/dev".to_string()
}

impl ServiceModels {
    pub fn model_for(&self, service: ServiceKind) -> &str {
        match service {
            ServiceKind::Storyteller => &self.storyteller,
            ServiceKind::Logic => &self.logic,
            ServiceKind::Image => &self.image,
        }
    }
}

impl Default for ServiceModels {
    fn default() -> Self {
        Self {
            storyteller: default_storyteller_model(),
            logic: default_logic_model(),
            image: default_image_model(),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod scripted;
