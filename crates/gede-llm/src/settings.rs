// Per-chat model parameters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LlmError;

/// Tool selection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// `auto`, `none` or `required`.
    Mode(String),
    /// Force a specific function.
    Function { name: String },
}

/// Optional generation parameters. Unset fields are left to the provider's
/// defaults and never serialized.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    /// `minimal`, `low`, `medium` or `high`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_usage: Option<bool>,
    /// `low`, `medium` or `high`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Merged verbatim into the request body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_body: Option<Map<String, Value>>,
    /// Appended to the request URL as query parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_query: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<Map<String, Value>>,
}

/// Keys accepted by [`ModelSettings::set`].
pub const SETTING_KEYS: &[&str] = &[
    "max_tokens",
    "temperature",
    "top_p",
    "frequency_penalty",
    "presence_penalty",
    "reasoning_effort",
    "parallel_tool_calls",
    "include_usage",
    "verbosity",
    "tool_choice",
    "extra_body",
];

/// Every serialized field name.
const STORED_KEYS: &[&str] = &[
    "max_tokens",
    "temperature",
    "top_p",
    "frequency_penalty",
    "presence_penalty",
    "reasoning_effort",
    "parallel_tool_calls",
    "include_usage",
    "verbosity",
    "tool_choice",
    "metadata",
    "extra_body",
    "extra_query",
    "extra_headers",
];

impl ModelSettings {
    /// JSON object view with unset fields dropped.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Rebuild settings from a stored object, ignoring unknown keys and nulls.
    pub fn from_json_lenient(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        let mut settings = Self::default();
        for (key, val) in obj {
            if val.is_null() || !STORED_KEYS.contains(&key.as_str()) {
                continue;
            }
            let mut single = Map::new();
            single.insert(key.clone(), val.clone());
            match serde_json::from_value::<ModelSettings>(Value::Object(single)) {
                Ok(parsed) => settings.merge(parsed),
                Err(e) => tracing::warn!(key = key.as_str(), "ignoring invalid model setting: {e}"),
            }
        }
        settings
    }

    /// Overlay every field that is set in `other`.
    pub fn merge(&mut self, other: ModelSettings) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            max_tokens,
            temperature,
            top_p,
            frequency_penalty,
            presence_penalty,
            reasoning_effort,
            parallel_tool_calls,
            include_usage,
            verbosity,
            tool_choice,
            metadata,
            extra_body,
            extra_query,
            extra_headers
        );
    }

    /// Set one field from its textual form. `none` or `null` clears it
    /// (only `null` for `tool_choice`).
    pub fn set(&mut self, key: &str, raw: &str) -> Result<(), LlmError> {
        let raw = raw.trim();
        let clear = raw.eq_ignore_ascii_case("none") || raw.eq_ignore_ascii_case("null");

        fn num<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, LlmError> {
            raw.parse::<T>()
                .map_err(|_| LlmError::InvalidRequest(format!("invalid value for {key}: {raw}")))
        }
        fn boolean(key: &str, raw: &str) -> Result<bool, LlmError> {
            match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                _ => Err(LlmError::InvalidRequest(format!("invalid value for {key}: {raw}"))),
            }
        }

        match key {
            "max_tokens" => self.max_tokens = if clear { None } else { Some(num(key, raw)?) },
            "temperature" => self.temperature = if clear { None } else { Some(num(key, raw)?) },
            "top_p" => self.top_p = if clear { None } else { Some(num(key, raw)?) },
            "frequency_penalty" => {
                self.frequency_penalty = if clear { None } else { Some(num(key, raw)?) }
            }
            "presence_penalty" => {
                self.presence_penalty = if clear { None } else { Some(num(key, raw)?) }
            }
            "reasoning_effort" => {
                self.reasoning_effort = if clear { None } else { Some(raw.to_string()) }
            }
            "parallel_tool_calls" => {
                self.parallel_tool_calls = if clear { None } else { Some(boolean(key, raw)?) }
            }
            "include_usage" => {
                self.include_usage = if clear { None } else { Some(boolean(key, raw)?) }
            }
            "verbosity" => self.verbosity = if clear { None } else { Some(raw.to_string()) },
            // `none` is a real tool_choice mode, so only `null` clears it.
            "tool_choice" => {
                self.tool_choice = if raw.eq_ignore_ascii_case("null") {
                    None
                } else {
                    match raw {
                        "auto" | "none" | "required" => Some(ToolChoice::Mode(raw.to_string())),
                        name => Some(ToolChoice::Function {
                            name: name.to_string(),
                        }),
                    }
                }
            }
            "extra_body" => {
                self.extra_body = if clear {
                    None
                } else {
                    match serde_json::from_str::<Value>(raw)? {
                        Value::Object(map) => Some(map),
                        _ => {
                            return Err(LlmError::InvalidRequest(
                                "extra_body must be a JSON object".to_string(),
                            ))
                        }
                    }
                }
            }
            other => {
                return Err(LlmError::InvalidRequest(format!(
                    "unknown setting `{other}` (known: {})",
                    SETTING_KEYS.join(", ")
                )))
            }
        }
        Ok(())
    }
}
