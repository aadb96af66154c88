// LLM providers (OpenRouter, ZenMux, Anthropic), model paths and the list of
// models the user has enabled (data/models.json).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use gede_llm::claude::{ClaudeClient, ANTHROPIC_API_BASE, ANTHROPIC_VERSION};
use gede_llm::models::{full_model_id, ModelCatalog, ModelInfo};
use gede_llm::openai::OpenAiCompatible;
use gede_llm::{ChatCompletion, ModelSettings};

use crate::config::{ProviderConfig, ProvidersConfig};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const ZENMUX_BASE_URL: &str = "https://zenmux.ai/api/v1";

const MODEL_LIST_TIMEOUT: Duration = Duration::from_secs(10);

const GATEWAY_DEFAULT_MODELS: &[&str] = &[
    "openai/gpt-5.2",
    "anthropic/claude-sonnet-4.5",
    "x-ai/grok-4-fast",
    "google/gemini-3-pro-preview",
];

const ANTHROPIC_DEFAULT_MODELS: &[&str] = &["claude-sonnet-4-5", "claude-opus-4-1", "claude-haiku-4-5"];

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid model path `{0}`, expected `provider:model_id`")]
    InvalidModelPath(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("API key for {0} is not set")]
    MissingApiKey(String),

    #[error("model list request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model list request returned status {0}")]
    Status(u16),

    #[error("invalid models file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// ModelPath
// ---------------------------------------------------------------------------

/// `provider:model_id`, split on the first colon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPath {
    pub provider_id: String,
    pub model_id: String,
}

impl ModelPath {
    pub fn new(provider_id: &str, model_id: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            model_id: model_id.to_string(),
        }
    }
}

impl FromStr for ModelPath {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once(':') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                Ok(Self::new(provider, model))
            }
            _ => Err(ProviderError::InvalidModelPath(s.to_string())),
        }
    }
}

impl fmt::Display for ModelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&full_model_id(&self.provider_id, &self.model_id))
    }
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// A streaming-capable client for `model_id` with the chat's settings.
    fn chat_client(&self, model_id: &str, settings: ModelSettings) -> Box<dyn ChatCompletion>;

    /// Models enabled on first run.
    fn default_models(&self) -> &[&str];

    /// Every model the provider serves that the catalog knows about. Failures
    /// are logged and yield an empty list.
    async fn load_models(&self, catalog: &ModelCatalog) -> Vec<ModelInfo>;
}

async fn resolve_models(provider_id: &str, ids: Vec<String>, catalog: &ModelCatalog) -> Vec<ModelInfo> {
    let mut models = Vec::new();
    for id in ids {
        let path = full_model_id(provider_id, &id.to_lowercase());
        match catalog.get(&path).await {
            Some(info) => models.push(info),
            None => debug!(path = path.as_str(), "model info not found"),
        }
    }
    debug!(provider = provider_id, count = models.len(), "models loaded");
    models
}

fn model_ids(listing: &Value) -> Vec<String> {
    listing
        .get("data")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|r| r.get("id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

async fn fetch_listing(request: reqwest::RequestBuilder) -> Result<Value, ProviderError> {
    let response = request.timeout(MODEL_LIST_TIMEOUT).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::Status(status.as_u16()));
    }
    Ok(response.json().await?)
}

// ---------------------------------------------------------------------------
// OpenAI-compatible gateways
// ---------------------------------------------------------------------------

/// A gateway speaking the OpenAI chat completions protocol.
pub struct GatewayProvider {
    id: &'static str,
    name: &'static str,
    api_key: Option<String>,
    base_url: String,
    http: reqwest::Client,
}

impl GatewayProvider {
    pub fn openrouter(config: &ProviderConfig) -> Self {
        Self {
            id: "openrouter",
            name: "OpenRouter",
            api_key: config.api_key_or_env("OPENROUTER_API_KEY"),
            base_url: config.base_url_or_env("OPENROUTER_BASE_URL", OPENROUTER_BASE_URL),
            http: reqwest::Client::new(),
        }
    }

    pub fn zenmux(config: &ProviderConfig) -> Self {
        Self {
            id: "zenmux",
            name: "ZenMux",
            api_key: config.api_key_or_env("ZENMUX_API_KEY"),
            base_url: config.base_url_or_env("ZENMUX_BASE_URL", ZENMUX_BASE_URL),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Provider for GatewayProvider {
    fn id(&self) -> &str {
        self.id
    }

    fn name(&self) -> &str {
        self.name
    }

    fn chat_client(&self, model_id: &str, settings: ModelSettings) -> Box<dyn ChatCompletion> {
        Box::new(OpenAiCompatible::new(
            self.api_key.clone().unwrap_or_default(),
            self.base_url.clone(),
            model_id,
            settings,
        ))
    }

    fn default_models(&self) -> &[&str] {
        GATEWAY_DEFAULT_MODELS
    }

    async fn load_models(&self, catalog: &ModelCatalog) -> Vec<ModelInfo> {
        let Some(api_key) = &self.api_key else {
            warn!("{} API key is not set, skipping model loading", self.name);
            return Vec::new();
        };
        let request = self
            .http
            .get(format!("{}/models", self.base_url))
            .bearer_auth(api_key);
        match fetch_listing(request).await {
            Ok(listing) => resolve_models(self.id, model_ids(&listing), catalog).await,
            Err(e) => {
                error!("{} load models error: {e}", self.name);
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

pub struct AnthropicProvider {
    api_key: Option<String>,
    base_url: String,
    http: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            api_key: config.api_key_or_env("ANTHROPIC_API_KEY"),
            base_url: config.base_url_or_env("ANTHROPIC_BASE_URL", ANTHROPIC_API_BASE),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn name(&self) -> &str {
        "Anthropic"
    }

    fn chat_client(&self, model_id: &str, settings: ModelSettings) -> Box<dyn ChatCompletion> {
        Box::new(ClaudeClient::new(
            self.api_key.clone().unwrap_or_default(),
            Some(self.base_url.clone()),
            model_id,
            settings,
        ))
    }

    fn default_models(&self) -> &[&str] {
        ANTHROPIC_DEFAULT_MODELS
    }

    async fn load_models(&self, catalog: &ModelCatalog) -> Vec<ModelInfo> {
        let Some(api_key) = &self.api_key else {
            warn!("Anthropic API key is not set, skipping model loading");
            return Vec::new();
        };
        let request = self
            .http
            .get(format!("{}/v1/models", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);
        match fetch_listing(request).await {
            Ok(listing) => resolve_models("anthropic", model_ids(&listing), catalog).await,
            Err(e) => {
                error!("Anthropic load models error: {e}");
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ProviderRegistry
// ---------------------------------------------------------------------------

pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self { providers }
    }

    pub fn from_config(config: &ProvidersConfig) -> Self {
        Self::new(vec![
            Arc::new(GatewayProvider::openrouter(&config.openrouter)),
            Arc::new(GatewayProvider::zenmux(&config.zenmux)),
            Arc::new(AnthropicProvider::new(&config.anthropic)),
        ])
    }

    pub fn by_id(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.id() == id).cloned()
    }

    pub fn for_model_path(&self, path: &str) -> Option<(Arc<dyn Provider>, ModelPath)> {
        let path: ModelPath = path.parse().ok()?;
        let provider = self.by_id(&path.provider_id)?;
        Some((provider, path))
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub fn ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id()).collect()
    }
}

// ---------------------------------------------------------------------------
// EnabledModels (data/models.json)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnabledModel {
    pub model_id: String,
    pub name: String,
    pub model_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderModels {
    pub provider_id: String,
    pub name: String,
    #[serde(default)]
    pub models: Vec<EnabledModel>,
}

/// Models shown by `/models`, grouped by provider.
#[derive(Debug, Clone)]
pub struct EnabledModels {
    path: PathBuf,
    providers: Vec<ProviderModels>,
}

async fn enabled_model(provider_id: &str, model_id: &str, catalog: &ModelCatalog) -> EnabledModel {
    let model_path = full_model_id(provider_id, model_id);
    let name = match catalog.get(&model_path).await {
        Some(info) => info.display_name().to_string(),
        None => {
            warn!(path = model_path.as_str(), "model info not found, using id as name");
            model_id.to_string()
        }
    };
    EnabledModel {
        model_id: model_id.to_string(),
        name,
        model_path,
    }
}

impl EnabledModels {
    /// Load `path`, or build it from every provider's defaults and save.
    pub async fn prepare(
        path: &Path,
        registry: &ProviderRegistry,
        catalog: &ModelCatalog,
    ) -> Result<Self, ProviderError> {
        if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|source| ProviderError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let providers: Vec<ProviderModels> = serde_json::from_str(&text)?;
            if !providers.is_empty() {
                return Ok(Self {
                    path: path.to_path_buf(),
                    providers,
                });
            }
        }

        let mut providers = Vec::new();
        for provider in registry.providers() {
            let mut models = Vec::new();
            for model_id in provider.default_models() {
                models.push(enabled_model(provider.id(), model_id, catalog).await);
            }
            providers.push(ProviderModels {
                provider_id: provider.id().to_string(),
                name: provider.name().to_string(),
                models,
            });
        }
        let enabled = Self {
            path: path.to_path_buf(),
            providers,
        };
        enabled.save()?;
        Ok(enabled)
    }

    pub fn providers(&self) -> &[ProviderModels] {
        &self.providers
    }

    pub fn all_paths(&self) -> Vec<String> {
        self.providers
            .iter()
            .flat_map(|p| p.models.iter().map(|m| m.model_path.clone()))
            .collect()
    }

    pub fn contains(&self, model_path: &str) -> bool {
        self.providers
            .iter()
            .any(|p| p.models.iter().any(|m| m.model_path == model_path))
    }

    /// Enable a model. Returns `false` when it was already enabled.
    pub async fn add_model(
        &mut self,
        registry: &ProviderRegistry,
        catalog: &ModelCatalog,
        provider_id: &str,
        model_id: &str,
    ) -> Result<bool, ProviderError> {
        let provider = registry
            .by_id(provider_id)
            .ok_or_else(|| ProviderError::UnknownProvider(provider_id.to_string()))?;

        let index = match self.providers.iter().position(|p| p.provider_id == provider_id) {
            Some(index) => index,
            None => {
                self.providers.push(ProviderModels {
                    provider_id: provider_id.to_string(),
                    name: provider.name().to_string(),
                    models: Vec::new(),
                });
                self.providers.len() - 1
            }
        };
        if self.providers[index].models.iter().any(|m| m.model_id == model_id) {
            return Ok(false);
        }
        let model = enabled_model(provider_id, model_id, catalog).await;
        self.providers[index].models.push(model);
        self.save()?;
        Ok(true)
    }

    /// Disable a model. Returns `false` when it was not enabled.
    pub fn remove_model(&mut self, provider_id: &str, model_id: &str) -> Result<bool, ProviderError> {
        let Some(provider) = self.providers.iter_mut().find(|p| p.provider_id == provider_id) else {
            return Err(ProviderError::UnknownProvider(provider_id.to_string()));
        };
        let before = provider.models.len();
        provider.models.retain(|m| m.model_id != model_id);
        let removed = provider.models.len() != before;
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn save(&self) -> Result<(), ProviderError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ProviderError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&self.providers)?).map_err(
            |source| ProviderError::Io {
                path: self.path.clone(),
                source,
            },
        )?;
        debug!("enabled models saved");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_with_key(base_url: &str) -> ProviderRegistry {
        let cfg = ProviderConfig {
            api_key: Some("test-key".into()),
            base_url: Some(base_url.into()),
        };
        ProviderRegistry::new(vec![
            Arc::new(GatewayProvider::openrouter(&cfg)),
            Arc::new(AnthropicProvider::new(&cfg)),
        ])
    }

    /// A catalog backed by a pre-written cache file.
    async fn catalog(dir: &Path, models: &[(&str, &str, &str)]) -> ModelCatalog {
        let map: serde_json::Map<String, Value> = models
            .iter()
            .map(|(provider, id, name)| {
                (
                    full_model_id(provider, id),
                    json!({"provider_id": provider, "model_id": id, "model_name": name}),
                )
            })
            .collect();
        std::fs::write(dir.join("model_info_list.json"), Value::Object(map).to_string()).unwrap();
        let catalog = ModelCatalog::new(dir, None);
        catalog.load().await.unwrap();
        catalog
    }

    #[test]
    fn model_path_parsing() {
        let path: ModelPath = "openrouter:google/gemini-3-pro-preview".parse().unwrap();
        assert_eq!(path.provider_id, "openrouter");
        assert_eq!(path.model_id, "google/gemini-3-pro-preview");
        assert_eq!(path.to_string(), "openrouter:google/gemini-3-pro-preview");

        let path: ModelPath = "zenmux:vendor/model:free".parse().unwrap();
        assert_eq!(path.model_id, "vendor/model:free");

        for bad in ["gpt-4o", ":model", "provider:", ""] {
            assert!(bad.parse::<ModelPath>().is_err(), "{bad}");
        }
    }

    #[test]
    fn registry_lookup() {
        let registry = ProviderRegistry::from_config(&ProvidersConfig::default());
        assert_eq!(registry.ids(), vec!["openrouter", "zenmux", "anthropic"]);
        assert_eq!(registry.by_id("zenmux").unwrap().name(), "ZenMux");
        let (provider, path) = registry.for_model_path("anthropic:claude-sonnet-4-5").unwrap();
        assert_eq!(provider.id(), "anthropic");
        assert_eq!(path.model_id, "claude-sonnet-4-5");
        assert!(registry.for_model_path("nobody:model").is_none());
        assert!(registry.for_model_path("no-colon").is_none());
    }

    #[test]
    fn chat_client_uses_model_id() {
        let registry = registry_with_key("http://localhost:1");
        let client = registry
            .by_id("openrouter")
            .unwrap()
            .chat_client("openai/gpt-5.2", ModelSettings::default());
        assert_eq!(client.model(), "openai/gpt-5.2");
    }

    #[tokio::test]
    async fn prepare_builds_defaults_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path(), &[("openrouter", "openai/gpt-5.2", "GPT-5.2")]).await;
        let registry = registry_with_key("http://localhost:1");
        let path = dir.path().join("data/models.json");

        let enabled = EnabledModels::prepare(&path, &registry, &catalog).await.unwrap();
        assert!(path.exists());
        assert_eq!(enabled.providers().len(), 2);
        let openrouter = &enabled.providers()[0];
        assert_eq!(openrouter.models.len(), GATEWAY_DEFAULT_MODELS.len());
        assert_eq!(openrouter.models[0].name, "GPT-5.2");
        // Unknown to the catalog: id doubles as name.
        assert_eq!(openrouter.models[1].name, "anthropic/claude-sonnet-4.5");
        assert!(enabled.contains("anthropic:claude-sonnet-4-5"));

        // Second call reads the file back unchanged.
        let again = EnabledModels::prepare(&path, &registry, &catalog).await.unwrap();
        assert_eq!(again.providers(), enabled.providers());
    }

    #[tokio::test]
    async fn add_and_remove_models() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path(), &[]).await;
        let registry = registry_with_key("http://localhost:1");
        let path = dir.path().join("models.json");
        let mut enabled = EnabledModels::prepare(&path, &registry, &catalog).await.unwrap();

        assert!(enabled
            .add_model(&registry, &catalog, "openrouter", "qwen/qwen3-max")
            .await
            .unwrap());
        assert!(!enabled
            .add_model(&registry, &catalog, "openrouter", "qwen/qwen3-max")
            .await
            .unwrap());
        assert!(matches!(
            enabled.add_model(&registry, &catalog, "nobody", "m").await,
            Err(ProviderError::UnknownProvider(_))
        ));
        assert!(enabled.all_paths().contains(&"openrouter:qwen/qwen3-max".to_string()));

        assert!(enabled.remove_model("openrouter", "qwen/qwen3-max").unwrap());
        assert!(!enabled.remove_model("openrouter", "qwen/qwen3-max").unwrap());
        assert!(!enabled.contains("openrouter:qwen/qwen3-max"));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("qwen3-max"));
    }

    #[tokio::test]
    async fn load_models_without_key_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path(), &[]).await;
        let provider = GatewayProvider::zenmux(&ProviderConfig {
            api_key: Some(String::new()),
            base_url: None,
        });
        // An empty configured key falls back to the environment; only assert
        // when the variable is unset.
        if std::env::var("ZENMUX_API_KEY").is_err() {
            assert!(provider.load_models(&catalog).await.is_empty());
        }
    }

    #[test]
    fn listing_ids_are_extracted() {
        let listing = json!({"data": [{"id": "A/B"}, {"name": "no id"}, {"id": "c"}]});
        assert_eq!(model_ids(&listing), vec!["A/B", "c"]);
        assert!(model_ids(&json!({})).is_empty());
    }
}
