//! Anthropic messages connector (logic service)

use crate::{
    EgressError, Result,
    client::{HttpClientConfig, create_client, error_for_status, with_retry},
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_API_VERSION: &str = "2023-06-01";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic connector configuration
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,

    /// Base URL, without the `/v1/messages` suffix
    pub base_url: String,

    /// Value of the `anthropic-version` header
    pub api_version: String,

    /// Upper bound on reply tokens; the API requires one
    pub max_tokens: u32,

    pub client_config: HttpClientConfig,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            client_config: HttpClientConfig::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: [UserMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Joined text of every `text` block in a reply
fn reply_text(response: MessagesResponse) -> Option<String> {
    let parts: Vec<String> = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect();
    if parts.is_empty() { None } else { Some(parts.join("")) }
}

/// Anthropic connector
pub struct AnthropicConnector {
    config: AnthropicConfig,
    client: Client,
}

impl AnthropicConnector {
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(EgressError::ConfigError("Anthropic API key is empty".to_string()));
        }
        let client = create_client(&config.client_config)?;
        Ok(Self { config, client })
    }

    /// Send one system + user exchange and return the reply text
    #[instrument(skip(self, system_prompt, user_prompt))]
    pub async fn complete(&self, model: &str, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let request = MessagesRequest {
            model,
            max_tokens: self.config.max_tokens,
            system: system_prompt,
            messages: [UserMessage {
                role: "user",
                content: user_prompt,
            }],
        };

        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        debug!(url = %url, anthropic_version = %self.config.api_version, "Sending messages request");

        let (url, request) = (url.as_str(), &request);
        let response = with_retry(self.config.client_config.max_retries, || async move {
            let response = self
                .client
                .post(url)
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", &self.config.api_version)
                .json(request)
                .send()
                .await?;
            error_for_status(response)
                .await?
                .json::<MessagesResponse>()
                .await
                .map_err(|e| EgressError::ParseError(format!("Failed to parse Anthropic response: {}", e)))
        })
        .await?;

        reply_text(response)
            .ok_or_else(|| EgressError::ParseError("Anthropic response contained no text".to_string()))
    }
}
