use anyhow::Context;
use casefile_core::{Error, ServiceKind, ServiceModels};
use casefile_prompt_tests::TestRunnerConfig;
use casefile_usage::{PricingOverrides, RateLimitConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub storage: StorageConfig,
    pub services: ServicesConfig,
    pub limits: RateLimitConfig,
    pub prompt_tests: TestRunnerConfig,
    pub usage: UsageConfig,
    pub pricing: PricingOverrides,
    pub images: ImagesConfig,
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8001,
            storage: StorageConfig::default(),
            services: ServicesConfig::default(),
            limits: RateLimitConfig::default(),
            prompt_tests: TestRunnerConfig::default(),
            usage: UsageConfig::default(),
            pricing: PricingOverrides::default(),
            images: ImagesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// SQLite database file; `~` is expanded
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: "~/.casefile/casefile.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub storyteller: ServiceSettings,
    pub logic: ServiceSettings,
    pub image: ServiceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: None,
            enabled: true,
        }
    }
}

impl ServiceSettings {
    /// The API key, if the service is enabled and has a non-empty one
    pub fn usable_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .filter(|key| self.enabled && !key.trim().is_empty())
    }
}

impl ServicesConfig {
    pub fn settings(&self, service: ServiceKind) -> &ServiceSettings {
        match service {
            ServiceKind::Storyteller => &self.storyteller,
            ServiceKind::Logic => &self.logic,
            ServiceKind::Image => &self.image,
        }
    }

    /// Configured models layered over the defaults
    pub fn models(&self) -> ServiceModels {
        let mut models = ServiceModels::default();
        if let Some(model) = &self.storyteller.model {
            models.storyteller = model.clone();
        }
        if let Some(model) = &self.logic.model {
            models.logic = model.clone();
        }
        if let Some(model) = &self.image.model {
            models.image = model.clone();
        }
        models
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    /// Default window for `/api/usage/statistics`
    pub statistics_window_days: u32,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            statistics_window_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    /// Jobs buffered before new ones are dropped
    pub channel_buffer_size: usize,
    pub failure_history: usize,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: 64,
            failure_history: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub log_sql_queries: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            log_sql_queries: false,
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents).with_context(|| format!("Invalid TOML in {}", path.display()))?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents).with_context(|| format!("Invalid YAML in {}", path.display()))?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        self.merge_vars(|key| std::env::var(key).ok());
    }

    fn merge_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Server settings
        if let Some(val) = var("CASEFILE_HOST") {
            self.host = val;
        }
        if let Some(val) = var("CASEFILE_PORT") {
            match val.parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => eprintln!("Warning: Invalid CASEFILE_PORT '{}', keeping {}", val, self.port),
            }
        }
        if let Some(val) = var("CASEFILE_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = var("CASEFILE_DB_PATH") {
            self.storage.backend = StorageBackend::Sqlite;
            self.storage.path = val;
        }

        // Service API keys (no CASEFILE_ prefix for these)
        if let Some(key) = var("OPENAI_API_KEY") {
            self.services.storyteller.api_key = Some(key);
        }
        if let Some(key) = var("ANTHROPIC_API_KEY") {
            self.services.logic.api_key = Some(key);
        }
        if let Some(key) = var("FAL_KEY") {
            self.services.image.api_key = Some(key);
        }

        // Rate limits
        if let Some(val) = var("CASEFILE_MAX_COST_PER_SESSION") {
            match val.parse::<f64>() {
                Ok(max) => self.limits.max_cost_per_session = max,
                Err(_) => eprintln!("Warning: Invalid CASEFILE_MAX_COST_PER_SESSION '{}'", val),
            }
        }
        if let Some(val) = var("CASEFILE_MAX_OPERATIONS_PER_HOUR") {
            match val.parse::<u64>() {
                Ok(max) => self.limits.max_operations_per_hour = max,
                Err(_) => eprintln!("Warning: Invalid CASEFILE_MAX_OPERATIONS_PER_HOUR '{}'", val),
            }
        }
    }

    /// Reject values the rest of the system cannot work with
    pub fn validate(&self) -> casefile_core::Result<()> {
        self.limits.validate()?;
        self.prompt_tests.validate()?;

        let invalid = self.pricing.invalid_entries();
        if !invalid.is_empty() {
            return Err(Error::Config(format!(
                "pricing entries must be non-negative numbers: {}",
                invalid.join(", ")
            )));
        }
        if self.usage.statistics_window_days == 0 {
            return Err(Error::Config("usage.statistics_window_days must be at least 1".to_string()));
        }
        if self.storage.backend == StorageBackend::Sqlite && self.storage.path.trim().is_empty() {
            return Err(Error::Config("storage.path must be set for the sqlite backend".to_string()));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
