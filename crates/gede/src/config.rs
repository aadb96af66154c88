// Configuration loading (~/.gede/config.toml) and the gede home directory layout.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_MODEL_PATH: &str = "openrouter:google/gemini-3-pro-preview";
pub const DEFAULT_INSTRUCTION: &str = "You are a helpful assistant.";
pub const DEFAULT_MESSAGE_NUM_IN_CONTEXT: i64 = 6;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not determine the home directory")]
    NoHomeDir,
}

// ---------------------------------------------------------------------------
// Directory layout
// ---------------------------------------------------------------------------

/// Paths under the gede home directory (`~/.gede` unless `GEDE_HOME` is set).
#[derive(Debug, Clone)]
pub struct GedeDirs {
    pub home: PathBuf,
}

impl GedeDirs {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn resolve() -> Result<Self, ConfigError> {
        if let Some(home) = std::env::var_os("GEDE_HOME").filter(|v| !v.is_empty()) {
            return Ok(Self::new(home));
        }
        let base = directories::BaseDirs::new().ok_or(ConfigError::NoHomeDir)?;
        Ok(Self::new(base.home_dir().join(".gede")))
    }

    pub fn cache(&self) -> PathBuf {
        self.home.join("cache")
    }

    pub fn data(&self) -> PathBuf {
        self.home.join("data")
    }

    pub fn logs(&self) -> PathBuf {
        self.home.join("logs")
    }

    pub fn chats(&self, private: bool) -> PathBuf {
        self.home
            .join("chats")
            .join(if private { "private" } else { "public" })
    }

    pub fn config_file(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    pub fn input_history(&self) -> PathBuf {
        self.cache().join("input_history.txt")
    }

    /// Create every subdirectory that does not exist yet.
    pub fn ensure(&self) -> Result<(), ConfigError> {
        for dir in [
            self.cache(),
            self.data(),
            self.logs(),
            self.chats(false),
            self.chats(true),
        ] {
            std::fs::create_dir_all(&dir).map_err(|source| ConfigError::Io { path: dir, source })?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// config.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chat: ChatConfig,
    pub mcp: McpConfig,
    pub providers: ProvidersConfig,
    pub models: ModelsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub default_model: String,
    pub instruction: String,
    /// Messages kept in the context window after the system message; 0 or
    /// less sends the whole history.
    pub message_num_in_context: i64,
    pub max_rounds: usize,
    pub builtin_tools: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL_PATH.to_string(),
            instruction: DEFAULT_INSTRUCTION.to_string(),
            message_num_in_context: DEFAULT_MESSAGE_NUM_IN_CONTEXT,
            max_rounds: gede_llm::runner::DEFAULT_MAX_ROUNDS,
            builtin_tools: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Path of the MCP servers JSON file; `~` is expanded.
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openrouter: ProviderConfig,
    pub zenmux: ProviderConfig,
    pub anthropic: ProviderConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl ProviderConfig {
    /// API key from the file, else from the environment variable `env`.
    pub fn api_key_or_env(&self, env: &str) -> Option<String> {
        non_empty(self.api_key.clone()).or_else(|| non_empty(std::env::var(env).ok()))
    }

    /// Base URL from the file, else the environment, else `default`.
    pub fn base_url_or_env(&self, env: &str, default: &str) -> String {
        non_empty(self.base_url.clone())
            .or_else(|| non_empty(std::env::var(env).ok()))
            .unwrap_or_else(|| default.to_string())
            .trim_end_matches('/')
            .to_string()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Extra model-info source, a JSON map keyed by `provider:model`.
    pub catalog_url: Option<String>,
}

impl Config {
    /// MCP servers file: configured path, else `<home>/mcp.json`.
    pub fn mcp_config_path(&self, dirs: &GedeDirs) -> PathBuf {
        match &self.mcp.config_path {
            Some(path) => PathBuf::from(gede_llm::mcp::config::expand_path(path)),
            None => dirs.home.join("mcp.json"),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config.toml` at `path`. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config = if path.exists() {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        Config::default()
    };

    validate(&config)?;
    Ok(config)
}

/// Convenience wrapper: loads `config.toml` from the gede home directory.
pub fn load_config(dirs: &GedeDirs) -> Result<Config, ConfigError> {
    load_config_from(&dirs.config_file())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let model = &config.chat.default_model;
    let valid_path = model
        .split_once(':')
        .is_some_and(|(provider, id)| !provider.is_empty() && !id.is_empty());
    if !valid_path {
        return Err(ConfigError::ValidationError {
            field: "chat.default_model".into(),
            message: format!("expected `provider:model_id`, got `{model}`"),
        });
    }

    if config.chat.max_rounds == 0 {
        return Err(ConfigError::ValidationError {
            field: "chat.max_rounds".into(),
            message: "must be greater than 0".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
