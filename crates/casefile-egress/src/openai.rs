//! OpenAI-compatible chat completions connector (storyteller service)

use crate::{
    EgressError, Result,
    client::{HttpClientConfig, create_client, error_for_status, with_retry},
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI connector configuration
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// API key for authentication
    pub api_key: String,

    /// Base URL, without the `/chat/completions` suffix
    pub base_url: String,

    /// Organization ID (optional)
    pub organization: Option<String>,

    /// HTTP client configuration
    pub client_config: HttpClientConfig,
}

impl OpenAIConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            organization: None,
            client_config: HttpClientConfig::default(),
        }
    }

    /// Set the base URL (for compatible endpoints)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI connector
pub struct OpenAIConnector {
    config: OpenAIConfig,
    client: Client,
}

impl OpenAIConnector {
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(EgressError::ConfigError("OpenAI API key is empty".to_string()));
        }
        let client = create_client(&config.client_config)?;
        Ok(Self { config, client })
    }

    /// Send one system + user exchange and return the assistant's text
    #[instrument(skip(self, system_prompt, user_prompt))]
    pub async fn complete(&self, model: &str, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if !system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: system_prompt,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user_prompt,
        });
        let request = ChatRequest { model, messages };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        debug!(url = %url, "Sending chat completion request");

        let (url, request) = (url.as_str(), &request);
        let response: ChatResponse = with_retry(self.config.client_config.max_retries, || async move {
            let mut builder = self
                .client
                .post(url)
                .bearer_auth(&self.config.api_key)
                .json(request);
            if let Some(ref org) = self.config.organization {
                builder = builder.header("OpenAI-Organization", org);
            }
            let response = error_for_status(builder.send().await?).await?;
            response
                .json::<ChatResponse>()
                .await
                .map_err(|e| EgressError::ParseError(format!("Failed to parse OpenAI response: {}", e)))
        })
        .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| EgressError::ParseError("OpenAI response contained no message content".to_string()))
    }
}
