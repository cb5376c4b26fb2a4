//! Dispatch invocations to the connector for each service

use async_trait::async_trait;
use casefile_core::{AiInvoker, Error, Invocation, ServiceKind};
use tracing::debug;

use crate::anthropic::AnthropicConnector;
use crate::fal::FalConnector;
use crate::openai::OpenAIConnector;

/// Storyteller over OpenAI chat, logic over Anthropic messages, images over FAL.
///
/// A service without a connector fails its invocations with
/// `Error::Upstream` rather than at startup, so the server can run with only
/// some keys configured.
#[derive(Default)]
pub struct ServiceRouter {
    storyteller: Option<OpenAIConnector>,
    logic: Option<AnthropicConnector>,
    image: Option<FalConnector>,
}

impl ServiceRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storyteller(mut self, connector: OpenAIConnector) -> Self {
        self.storyteller = Some(connector);
        self
    }

    pub fn with_logic(mut self, connector: AnthropicConnector) -> Self {
        self.logic = Some(connector);
        self
    }

    pub fn with_image(mut self, connector: FalConnector) -> Self {
        self.image = Some(connector);
        self
    }

    /// Services that have a connector
    pub fn configured(&self) -> Vec<ServiceKind> {
        ServiceKind::ALL
            .into_iter()
            .filter(|service| match service {
                ServiceKind::Storyteller => self.storyteller.is_some(),
                ServiceKind::Logic => self.logic.is_some(),
                ServiceKind::Image => self.image.is_some(),
            })
            .collect()
    }
}

fn not_configured(service: ServiceKind) -> Error {
    Error::upstream(service, "service is not configured")
}

#[async_trait]
impl AiInvoker for ServiceRouter {
    async fn invoke(&self, invocation: &Invocation) -> casefile_core::Result<String> {
        let service = invocation.service;
        debug!(service = %service, model = %invocation.model, "Dispatching invocation");

        let result = match service {
            ServiceKind::Storyteller => {
                let connector = self.storyteller.as_ref().ok_or_else(|| not_configured(service))?;
                connector
                    .complete(&invocation.model, &invocation.system_prompt, &invocation.user_prompt)
                    .await
            }
            ServiceKind::Logic => {
                let connector = self.logic.as_ref().ok_or_else(|| not_configured(service))?;
                connector
                    .complete(&invocation.model, &invocation.system_prompt, &invocation.user_prompt)
                    .await
            }
            ServiceKind::Image => {
                let connector = self.image.as_ref().ok_or_else(|| not_configured(service))?;
                connector.generate(&invocation.model, &invocation.user_prompt).await
            }
        };

        result.map_err(|e| e.into_upstream(service))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai::OpenAIConfig;

    #[tokio::test]
    async fn test_unconfigured_service_is_upstream_error() {
        let router = ServiceRouter::new();
        let err = router
            .invoke(&Invocation::new(ServiceKind::Image, "fal-ai/flux/dev", "", "a foggy pier"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream { service: ServiceKind::Image, .. }));
    }

    #[test]
    fn test_configured_services() {
        let router = ServiceRouter::new().with_storyteller(OpenAIConnector::new(OpenAIConfig::new("sk-test")).unwrap());
        assert_eq!(router.configured(), vec![ServiceKind::Storyteller]);
    }
}
