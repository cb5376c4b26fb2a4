//! FAL-style image generation connector (image service)
//!
//! `POST {base_url}/{model}` with the prompt and generation settings; the
//! reply lists generated images and the first URL is used.

use crate::{
    EgressError, Result,
    client::{HttpClientConfig, create_client, error_for_status, with_retry},
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

pub const DEFAULT_BASE_URL: &str = "https://fal.run";

#[derive(Debug, Clone)]
pub struct FalConfig {
    pub api_key: String,
    pub base_url: String,
    pub image_size: String,
    pub num_inference_steps: u32,
    pub guidance_scale: f64,
    pub client_config: HttpClientConfig,
}

impl FalConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            image_size: "landscape_4_3".to_string(),
            num_inference_steps: 28,
            guidance_scale: 3.5,
            client_config: HttpClientConfig::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    prompt: &'a str,
    image_size: &'a str,
    num_inference_steps: u32,
    guidance_scale: f64,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    images: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    url: String,
}

pub struct FalConnector {
    config: FalConfig,
    client: Client,
}

impl FalConnector {
    pub fn new(config: FalConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(EgressError::ConfigError("FAL key is empty".to_string()));
        }
        let client = create_client(&config.client_config)?;
        Ok(Self { config, client })
    }

    /// Generate one image and return its URL
    #[instrument(skip(self, prompt))]
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        let request = ImageRequest {
            prompt,
            image_size: &self.config.image_size,
            num_inference_steps: self.config.num_inference_steps,
            guidance_scale: self.config.guidance_scale,
        };
        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            model.trim_start_matches('/')
        );
        debug!(url = %url, "Submitting image generation request");

        let (url, request) = (url.as_str(), &request);
        let response = with_retry(self.config.client_config.max_retries, || async move {
            let response = self
                .client
                .post(url)
                .header("Authorization", format!("Key {}", self.config.api_key))
                .json(request)
                .send()
                .await?;
            error_for_status(response)
                .await?
                .json::<ImageResponse>()
                .await
                .map_err(|e| EgressError::ParseError(format!("Failed to parse image response: {}", e)))
        })
        .await?;

        response
            .images
            .into_iter()
            .next()
            .map(|image| image.url)
            .ok_or_else(|| EgressError::ParseError("Image response contained no images".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_defaults() {
        let config = FalConfig::new("key");
        assert_eq!(config.image_size, "landscape_4_3");
        assert_eq!(config.num_inference_steps, 28);
        assert_eq!(config.guidance_scale, 3.5);
    }

    #[test]
    fn test_connector_requires_key() {
        assert!(FalConnector::new(FalConfig::new("")).is_err());
    }
}
