//! Wire stores, services and the accounting core from configuration

use anyhow::Context;
use casefile_core::{AiInvoker, Clock, DocumentStore, MemoryDocumentStore, ServiceKind, SystemClock};
use casefile_egress::anthropic::{AnthropicConfig, AnthropicConnector};
use casefile_egress::fal::{FalConfig, FalConnector};
use casefile_egress::openai::{OpenAIConfig, OpenAIConnector};
use casefile_egress::ServiceRouter;
use casefile_game::{DetectiveService, ImageJobQueue, ImageQueueConfig, ImageWorker};
use casefile_observability::Metrics;
use casefile_prompt_tests::TestRunner;
use casefile_store_sqlite::SqliteDocumentStore;
use casefile_usage::{CostModel, RateLimiter, TrackedInvoker, UsageLedger};
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::config::{ServerConfig, StorageBackend};

/// Open the configured document store
pub async fn open_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    match config.storage.backend {
        StorageBackend::Sqlite => {
            let store = SqliteDocumentStore::open(&config.storage.path)
                .await
                .with_context(|| format!("Failed to open SQLite store at {}", config.storage.path))?;
            info!("💾 SQLite document store: {}", config.storage.path);
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            warn!("💾 In-memory document store: usage and cases are lost on restart");
            Ok(Arc::new(MemoryDocumentStore::new()))
        }
    }
}

/// Connectors for every service that has a usable key
pub fn build_router(config: &ServerConfig) -> anyhow::Result<ServiceRouter> {
    let services = &config.services;
    let mut router = ServiceRouter::new();

    if let Some(key) = services.storyteller.usable_key() {
        let mut openai = OpenAIConfig::new(key);
        if let Some(url) = &services.storyteller.base_url {
            openai = openai.with_base_url(url);
        }
        router = router.with_storyteller(OpenAIConnector::new(openai).context("storyteller connector")?);
    }
    if let Some(key) = services.logic.usable_key() {
        let mut anthropic = AnthropicConfig::new(key);
        if let Some(url) = &services.logic.base_url {
            anthropic = anthropic.with_base_url(url);
        }
        router = router.with_logic(AnthropicConnector::new(anthropic).context("logic connector")?);
    }
    if let Some(key) = services.image.usable_key() {
        let mut fal = FalConfig::new(key);
        if let Some(url) = &services.image.base_url {
            fal = fal.with_base_url(url);
        }
        router = router.with_image(FalConnector::new(fal).context("image connector")?);
    }

    let configured = router.configured();
    for service in ServiceKind::ALL {
        if configured.contains(&service) {
            info!("🔌 {} enabled", service);
        } else {
            warn!("🔌 {} has no API key; its calls will fail as upstream errors", service);
        }
    }
    Ok(router)
}

/// Build the application from already-constructed store, invoker and clock
pub fn assemble(
    config: &ServerConfig,
    store: Arc<dyn DocumentStore>,
    invoker: Arc<dyn AiInvoker>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
) -> AppState {
    let metrics_handle = Some(metrics.clone());
    let models = config.services.models();

    let ledger = Arc::new(
        UsageLedger::new(store.clone(), clock.clone(), CostModel::with_overrides(&config.pricing))
            .with_metrics(metrics_handle.clone()),
    );
    let limiter = Arc::new(RateLimiter::new(ledger.clone(), config.limits).with_metrics(metrics_handle.clone()));
    let tracked = TrackedInvoker::new(invoker, ledger.clone()).with_metrics(metrics_handle.clone());

    let runner = Arc::new(
        TestRunner::new(
            tracked.clone(),
            store.clone(),
            clock.clone(),
            models.clone(),
            config.prompt_tests.clone(),
        )
        .with_metrics(metrics_handle.clone()),
    );

    let images = Arc::new(ImageJobQueue::spawn(
        ImageWorker::new(tracked.clone(), store.clone(), clock.clone(), models.clone())
            .with_metrics(metrics_handle),
        ImageQueueConfig {
            channel_buffer_size: config.images.channel_buffer_size,
            failure_history: config.images.failure_history,
        },
    ));

    let game = Arc::new(DetectiveService::new(tracked, limiter.clone(), store, clock, models, images));

    AppState {
        ledger,
        limiter,
        runner,
        game,
        metrics,
        statistics_window_days: config.usage.statistics_window_days,
    }
}

/// Build the application for a validated configuration
pub async fn build(config: &ServerConfig, metrics: Arc<Metrics>) -> anyhow::Result<AppState> {
    let store = open_store(config).await?;
    let router = build_router(config)?;
    Ok(assemble(config, store, Arc::new(router), Arc::new(SystemClock), metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceSettings;

    #[test]
    fn test_router_skips_services_without_keys() {
        let mut config = ServerConfig::default();
        config.services.storyteller = ServiceSettings {
            api_key: Some("sk-test".to_string()),
            base_url: Some("http://localhost:4010/v1".to_string()),
            ..Default::default()
        };
        config.services.logic = ServiceSettings {
            api_key: Some("sk-ant-test".to_string()),
            enabled: false,
            ..Default::default()
        };

        let router = build_router(&config).unwrap();
        assert_eq!(router.configured(), vec![ServiceKind::Storyteller]);
    }

    #[tokio::test]
    async fn test_open_sqlite_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = ServerConfig::default();
        config.storage.path = dir.path().join("db").join("casefile.db").to_string_lossy().to_string();

        let store = open_store(&config).await.unwrap();
        assert_eq!(store.count("cases", &casefile_core::Filter::new()).await.unwrap(), 0);
    }
}
