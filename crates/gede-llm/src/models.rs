// Model metadata catalog.
//
// Aggregates capabilities, limits and prices from the LiteLLM price map and
// models.dev (plus an optional custom source), caches the merged map on disk,
// and refreshes it in the background once it is older than 32 hours.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::error::LlmError;

pub const LITELLM_URL: &str =
    "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json";
pub const MODELS_DEV_URL: &str = "https://models.dev/api.json";

const CACHE_FILE: &str = "model_info_list.json";
const REFRESH_AFTER: Duration = Duration::from_secs(32 * 60 * 60);

// ---------------------------------------------------------------------------
// ModelInfo
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider_id: String,
    #[serde(default)]
    pub provider_name: Option<String>,
    pub model_id: String,
    #[serde(default)]
    pub model_name: Option<String>,

    #[serde(default)]
    pub supports_tool_choice: Option<bool>,
    #[serde(default)]
    pub supports_function_calling: Option<bool>,
    #[serde(default)]
    pub supports_parallel_function_calling: Option<bool>,
    #[serde(default)]
    pub supports_vision: Option<bool>,
    #[serde(default)]
    pub supports_audio_input: Option<bool>,
    #[serde(default)]
    pub supports_pdf_input: Option<bool>,
    #[serde(default)]
    pub supports_audio_output: Option<bool>,
    #[serde(default)]
    pub supports_prompt_caching: Option<bool>,
    #[serde(default)]
    pub supports_response_schema: Option<bool>,
    #[serde(default)]
    pub supports_reasoning: Option<bool>,
    #[serde(default)]
    pub supports_web_search: Option<bool>,

    /// `chat`, `embedding`, `completion`, `image_generation`, ...
    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub max_input_tokens: Option<u64>,
    #[serde(default)]
    pub max_output_tokens: Option<u64>,

    #[serde(default)]
    pub input_cost_per_token: Option<f64>,
    #[serde(default)]
    pub output_cost_per_token: Option<f64>,
    #[serde(default, alias = "output_const_per_reasoning_token")]
    pub output_cost_per_reasoning_token: Option<f64>,
}

impl ModelInfo {
    /// Enabled features, in a fixed order, joined by `, `.
    pub fn supports_description(&self) -> String {
        let features = [
            (self.supports_function_calling, "Function Calling"),
            (self.supports_tool_choice, "Tool Choice"),
            (self.supports_parallel_function_calling, "Parallel Function Calling"),
            (self.supports_vision, "Vision"),
            (self.supports_audio_input, "Audio Input"),
            (self.supports_pdf_input, "PDF Input"),
            (self.supports_audio_output, "Audio Output"),
            (self.supports_prompt_caching, "Prompt Caching"),
            (self.supports_response_schema, "Structured Output"),
            (self.supports_reasoning, "Reasoning"),
            (self.supports_web_search, "Web Search"),
        ];
        features
            .iter()
            .filter(|(flag, _)| flag.unwrap_or(false))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Human-readable model name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.model_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.model_id)
    }
}

pub type ModelInfoMap = BTreeMap<String, ModelInfo>;

/// Catalog key for a model.
pub fn full_model_id(provider_id: &str, model_id: &str) -> String {
    format!("{provider_id}:{model_id}")
}

// ---------------------------------------------------------------------------
// Source parsers
// ---------------------------------------------------------------------------

/// Parse the LiteLLM price map. Only `provider/model` keys are kept.
pub fn parse_litellm(rows: &Value) -> ModelInfoMap {
    let mut out = ModelInfoMap::new();
    let Some(rows) = rows.as_object() else {
        return out;
    };
    for (key, row) in rows {
        if key == "sample_spec" {
            continue;
        }
        let parts: Vec<&str> = key.split('/').collect();
        let [provider_id, model_id] = parts.as_slice() else {
            continue;
        };
        let flag = |k: &str| row.get(k).and_then(Value::as_bool);
        let int = |k: &str| row.get(k).and_then(Value::as_u64);
        let float = |k: &str| row.get(k).and_then(Value::as_f64);

        out.insert(
            full_model_id(provider_id, model_id),
            ModelInfo {
                provider_id: provider_id.to_string(),
                provider_name: Some(provider_id.to_string()),
                model_id: model_id.to_string(),
                model_name: Some(model_id.to_string()),
                supports_tool_choice: flag("supports_tool_choice"),
                supports_function_calling: flag("supports_function_calling"),
                supports_parallel_function_calling: flag("supports_parallel_function_calling"),
                supports_vision: flag("supports_vision"),
                supports_audio_input: flag("supports_audio_input"),
                supports_pdf_input: flag("supports_pdf_input"),
                supports_audio_output: flag("supports_audio_output"),
                supports_prompt_caching: flag("supports_prompt_caching"),
                supports_response_schema: flag("supports_response_schema"),
                supports_reasoning: flag("supports_reasoning"),
                supports_web_search: flag("supports_web_search"),
                mode: row.get("mode").and_then(Value::as_str).map(str::to_string),
                max_tokens: int("max_tokens"),
                max_input_tokens: int("max_input_tokens"),
                max_output_tokens: int("max_output_tokens"),
                input_cost_per_token: float("input_cost_per_token"),
                output_cost_per_token: float("output_cost_per_token"),
                output_cost_per_reasoning_token: float("output_cost_per_reasoning_token"),
            },
        );
    }
    out
}

/// Parse the models.dev provider directory.
pub fn parse_models_dev(result: &Value) -> ModelInfoMap {
    let mut out = ModelInfoMap::new();
    let Some(providers) = result.as_object() else {
        return out;
    };
    for (provider_id, provider) in providers {
        let provider_name = provider.get("name").and_then(Value::as_str).unwrap_or_default();
        let Some(models) = provider.get("models").and_then(Value::as_object) else {
            continue;
        };
        for (model_id, model) in models {
            let flag = |k: &str| Some(model.get(k).and_then(Value::as_bool).unwrap_or(false));
            let inputs: Vec<&str> = model
                .pointer("/modalities/input")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            out.insert(
                full_model_id(provider_id, model_id),
                ModelInfo {
                    provider_id: provider_id.clone(),
                    provider_name: Some(provider_name.to_string()),
                    model_id: model_id.clone(),
                    model_name: Some(
                        model.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                    ),
                    supports_function_calling: flag("tool_call"),
                    supports_reasoning: flag("reasoning"),
                    supports_response_schema: flag("structured_output"),
                    supports_vision: Some(inputs.contains(&"image")),
                    supports_pdf_input: Some(inputs.contains(&"pdf")),
                    mode: Some("chat".to_string()),
                    max_tokens: model.pointer("/limit/tokens").and_then(Value::as_u64),
                    max_output_tokens: model.pointer("/limit/output").and_then(Value::as_u64),
                    ..Default::default()
                },
            );
        }
    }
    out
}

// ---------------------------------------------------------------------------
// ModelCatalog
// ---------------------------------------------------------------------------

/// Shared, lazily loaded model catalog. Clones share the same map.
#[derive(Clone)]
pub struct ModelCatalog {
    models: Arc<RwLock<ModelInfoMap>>,
    cache_file: PathBuf,
    litellm_url: String,
    models_dev_url: String,
    custom_url: Option<String>,
    http: reqwest::Client,
}

impl ModelCatalog {
    pub fn new(cache_dir: &Path, custom_url: Option<String>) -> Self {
        Self {
            models: Arc::new(RwLock::new(ModelInfoMap::new())),
            cache_file: cache_dir.join(CACHE_FILE),
            litellm_url: LITELLM_URL.to_string(),
            models_dev_url: MODELS_DEV_URL.to_string(),
            custom_url,
            http: reqwest::Client::new(),
        }
    }

    /// Override the public source URLs.
    pub fn with_sources(mut self, litellm_url: &str, models_dev_url: &str) -> Self {
        self.litellm_url = litellm_url.to_string();
        self.models_dev_url = models_dev_url.to_string();
        self
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    /// Populate the in-memory map: from the cache file when present
    /// (refreshing stale files in the background), else from the network.
    pub async fn load(&self) -> Result<(), LlmError> {
        if !self.models.read().await.is_empty() {
            return Ok(());
        }
        if !self.cache_file.exists() {
            debug!("model info cache not found, fetching");
            return self.refresh().await;
        }

        debug!("loading model info from cache");
        let data = tokio::fs::read_to_string(&self.cache_file)
            .await
            .map_err(|e| LlmError::InvalidRequest(format!("failed to read model cache: {e}")))?;
        if data.trim().is_empty() {
            return Err(LlmError::InvalidRequest("model info cache file is empty".to_string()));
        }
        let cached: ModelInfoMap = serde_json::from_str(&data)?;
        *self.models.write().await = cached;

        if self.is_stale() {
            info!("model info cache is outdated, refreshing in background");
            let catalog = self.clone();
            tokio::spawn(async move {
                if let Err(e) = catalog.refresh().await {
                    error!("error refreshing model info cache: {e}");
                }
            });
        }
        Ok(())
    }

    fn is_stale(&self) -> bool {
        std::fs::metadata(&self.cache_file)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
            .is_some_and(|age| age > REFRESH_AFTER)
    }

    async fn fetch_json(&self, url: &str) -> Result<Value, LlmError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Fetch every source, overlay them in order and rewrite the cache file.
    /// A failing source is logged and skipped.
    pub async fn refresh(&self) -> Result<(), LlmError> {
        let mut merged = self.models.read().await.clone();

        match self.fetch_json(&self.litellm_url).await {
            Ok(rows) => merged.extend(parse_litellm(&rows)),
            Err(e) => error!("failed to fetch LiteLLM model list: {e}"),
        }
        match self.fetch_json(&self.models_dev_url).await {
            Ok(rows) => merged.extend(parse_models_dev(&rows)),
            Err(e) => error!("failed to fetch models.dev model list: {e}"),
        }
        if let Some(url) = &self.custom_url {
            match self.fetch_json(url).await {
                Ok(rows) => match serde_json::from_value::<ModelInfoMap>(rows) {
                    Ok(custom) => merged.extend(custom),
                    Err(e) => error!("invalid custom model list: {e}"),
                },
                Err(e) => error!("failed to fetch custom model list: {e}"),
            }
        }

        if merged.is_empty() {
            return Err(LlmError::InvalidRequest("no model information available".to_string()));
        }

        if let Some(dir) = self.cache_file.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| LlmError::InvalidRequest(format!("failed to create cache dir: {e}")))?;
        }
        let json = serde_json::to_string_pretty(&merged)?;
        tokio::fs::write(&self.cache_file, json)
            .await
            .map_err(|e| LlmError::InvalidRequest(format!("failed to write model cache: {e}")))?;
        info!(count = merged.len(), "model info cache updated");

        *self.models.write().await = merged;
        Ok(())
    }

    /// Look up a model by `provider:model` key.
    pub async fn get(&self, full_id: &str) -> Option<ModelInfo> {
        self.models.read().await.get(full_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.models.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.models.read().await.is_empty()
    }

    async fn capability(&self, full_id: &str, flag: fn(&ModelInfo) -> Option<bool>) -> bool {
        self.get(full_id)
            .await
            .and_then(|m| flag(&m))
            .unwrap_or(false)
    }

    pub async fn supports_reasoning(&self, full_id: &str) -> bool {
        self.capability(full_id, |m| m.supports_reasoning).await
    }

    pub async fn supports_vision(&self, full_id: &str) -> bool {
        self.capability(full_id, |m| m.supports_vision).await
    }

    pub async fn supports_function_calling(&self, full_id: &str) -> bool {
        self.capability(full_id, |m| m.supports_function_calling).await
    }

    pub async fn supports_response_schema(&self, full_id: &str) -> bool {
        self.capability(full_id, |m| m.supports_response_schema).await
    }

    pub async fn supports_web_search(&self, full_id: &str) -> bool {
        self.capability(full_id, |m| m.supports_web_search).await
    }

    pub async fn supports_prompt_caching(&self, full_id: &str) -> bool {
        self.capability(full_id, |m| m.supports_prompt_caching).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{json_response, serve_once};
    use serde_json::json;

    fn litellm_rows() -> Value {
        json!({
            "sample_spec": {"max_tokens": 1},
            "gpt-4o": {"max_tokens": 16384},
            "openrouter/openai/gpt-4o": {"max_tokens": 16384},
            "openai/gpt-4o": {
                "max_tokens": 16384,
                "max_input_tokens": 128000,
                "input_cost_per_token": 0.0000025,
                "supports_function_calling": true,
                "supports_vision": true,
                "mode": "chat"
            }
        })
    }

    fn models_dev_rows() -> Value {
        json!({
            "anthropic": {
                "name": "Anthropic",
                "models": {
                    "claude-sonnet-4-5": {
                        "name": "Claude Sonnet 4.5",
                        "tool_call": true,
                        "reasoning": true,
                        "modalities": {"input": ["text", "image", "pdf"], "output": ["text"]},
                        "limit": {"context": 200000, "output": 64000}
                    }
                }
            }
        })
    }

    #[test]
    fn litellm_keeps_only_provider_model_keys() {
        let map = parse_litellm(&litellm_rows());
        assert_eq!(map.len(), 1);
        let info = &map["openai:gpt-4o"];
        assert_eq!(info.max_input_tokens, Some(128000));
        assert_eq!(info.supports_vision, Some(true));
        assert_eq!(info.supports_reasoning, None);
        assert_eq!(info.mode.as_deref(), Some("chat"));
    }

    #[test]
    fn models_dev_maps_modalities_and_limits() {
        let map = parse_models_dev(&models_dev_rows());
        let info = &map["anthropic:claude-sonnet-4-5"];
        assert_eq!(info.provider_name.as_deref(), Some("Anthropic"));
        assert_eq!(info.display_name(), "Claude Sonnet 4.5");
        assert_eq!(info.supports_vision, Some(true));
        assert_eq!(info.supports_pdf_input, Some(true));
        assert_eq!(info.supports_response_schema, Some(false));
        assert_eq!(info.max_output_tokens, Some(64000));
    }

    #[test]
    fn supports_description_uses_fixed_order() {
        let info = ModelInfo {
            supports_reasoning: Some(true),
            supports_function_calling: Some(true),
            supports_vision: Some(false),
            supports_web_search: Some(true),
            ..Default::default()
        };
        assert_eq!(info.supports_description(), "Function Calling, Reasoning, Web Search");
        assert_eq!(ModelInfo::default().supports_description(), "");
    }

    #[tokio::test]
    async fn fresh_cache_file_is_used_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let map = parse_litellm(&litellm_rows());
        std::fs::write(dir.path().join(CACHE_FILE), serde_json::to_string(&map).unwrap()).unwrap();

        let catalog = ModelCatalog::new(dir.path(), None)
            .with_sources("http://127.0.0.1:9/litellm", "http://127.0.0.1:9/dev");
        catalog.load().await.unwrap();

        assert!(catalog.supports_vision("openai:gpt-4o").await);
        assert!(!catalog.supports_reasoning("openai:gpt-4o").await);
        assert!(!catalog.supports_vision("nobody:nothing").await);
    }

    #[tokio::test]
    async fn stale_cache_is_served_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CACHE_FILE);
        let map = parse_litellm(&litellm_rows());
        std::fs::write(&path, serde_json::to_string(&map).unwrap()).unwrap();
        let old = SystemTime::now() - Duration::from_secs(40 * 60 * 60);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(old)
            .unwrap();

        let catalog = ModelCatalog::new(dir.path(), None)
            .with_sources("http://127.0.0.1:9/litellm", "http://127.0.0.1:9/dev");
        assert!(catalog.is_stale());
        catalog.load().await.unwrap();
        assert!(catalog.get("openai:gpt-4o").await.is_some());
    }

    #[tokio::test]
    async fn empty_cache_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CACHE_FILE), "").unwrap();
        let catalog = ModelCatalog::new(dir.path(), None);
        assert!(catalog.load().await.is_err());
    }

    #[tokio::test]
    async fn missing_cache_is_fetched_and_written() {
        let (litellm, _a) = serve_once(json_response(200, &litellm_rows().to_string())).await;
        let (dev, _b) = serve_once(json_response(200, &models_dev_rows().to_string())).await;

        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        let catalog = ModelCatalog::new(&cache_dir, None).with_sources(&litellm, &dev);
        catalog.load().await.unwrap();

        assert_eq!(catalog.len().await, 2);
        assert!(catalog.supports_reasoning("anthropic:claude-sonnet-4-5").await);
        assert!(catalog.cache_file().exists());

        let written: ModelInfoMap =
            serde_json::from_str(&std::fs::read_to_string(catalog.cache_file()).unwrap()).unwrap();
        assert_eq!(written.len(), 2);
    }
}
