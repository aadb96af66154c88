// Provider-neutral message and response types.
//
// Every client converts to and from these shapes, so nothing outside
// `openai.rs` and `claude.rs` ever sees a vendor payload.

use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LlmError;

// ---------------------------------------------------------------------------
// Roles and content
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Image detail hint; only OpenAI-style APIs honour it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Auto,
    Low,
    High,
}

/// A single piece of multimodal content.
///
/// `image_url` / `document_url` hold either an http(s) URL or the raw base64
/// payload; `media_type` is required in the base64 case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "content_block_type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        image_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<ImageDetail>,
    },
    Document {
        document_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

const IMAGE_MEDIA_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
];

const DOCUMENT_MEDIA_TYPES: &[(&str, &str)] = &[("pdf", "application/pdf")];

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn image_from_url(url: impl Into<String>, detail: Option<ImageDetail>) -> Self {
        ContentBlock::Image {
            image_url: url.into(),
            media_type: None,
            detail,
        }
    }

    pub fn image_from_base64(data: impl Into<String>, media_type: &str) -> Self {
        ContentBlock::Image {
            image_url: data.into(),
            media_type: Some(media_type.to_string()),
            detail: None,
        }
    }

    /// Read an image from disk, detecting the media type from its extension.
    pub fn image_from_file(path: &Path, detail: Option<ImageDetail>) -> Result<Self, LlmError> {
        let media_type = media_type_for(path, IMAGE_MEDIA_TYPES)?;
        let data = read_base64(path)?;
        Ok(ContentBlock::Image {
            image_url: data,
            media_type: Some(media_type.to_string()),
            detail,
        })
    }

    /// Reference a remote document. The filename defaults to the last path
    /// segment of the URL, without query string.
    pub fn document_from_url(url: impl Into<String>, filename: Option<String>) -> Self {
        let url = url.into();
        let filename = filename.unwrap_or_else(|| {
            let last = url.rsplit('/').next().unwrap_or("");
            let name = last.split('?').next().unwrap_or("");
            if name.is_empty() {
                "document.pdf".to_string()
            } else {
                name.to_string()
            }
        });
        ContentBlock::Document {
            document_url: url,
            media_type: None,
            filename: Some(filename),
        }
    }

    pub fn document_from_base64(
        data: impl Into<String>,
        media_type: &str,
        filename: Option<String>,
    ) -> Self {
        let filename = filename.unwrap_or_else(|| {
            if media_type == "application/pdf" {
                "document.pdf".to_string()
            } else {
                "document.bin".to_string()
            }
        });
        ContentBlock::Document {
            document_url: data.into(),
            media_type: Some(media_type.to_string()),
            filename: Some(filename),
        }
    }

    /// Read a PDF from disk. The filename defaults to the file's own name.
    pub fn document_from_file(path: &Path, filename: Option<String>) -> Result<Self, LlmError> {
        let media_type = media_type_for(path, DOCUMENT_MEDIA_TYPES)?;
        let data = read_base64(path)?;
        let filename = filename.or_else(|| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
        });
        Ok(Self::document_from_base64(data, media_type, filename))
    }

    /// Decode a block from its stored JSON form, failing on unknown types or
    /// missing required fields.
    pub fn from_value(value: Value) -> Result<Self, LlmError> {
        Ok(serde_json::from_value(value)?)
    }
}

fn media_type_for(path: &Path, table: &[(&str, &'static str)]) -> Result<&'static str, LlmError> {
    if !path.exists() {
        return Err(LlmError::InvalidRequest(format!(
            "file not found: {}",
            path.display()
        )));
    }
    let suffix = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    table
        .iter()
        .find(|(ext, _)| *ext == suffix)
        .map(|(_, media)| *media)
        .ok_or_else(|| {
            let supported: Vec<String> = table.iter().map(|(ext, _)| format!(".{ext}")).collect();
            LlmError::InvalidRequest(format!(
                "unsupported file type: .{suffix} (supported: {})",
                supported.join(", ")
            ))
        })
}

fn read_base64(path: &Path) -> Result<String, LlmError> {
    let bytes = std::fs::read(path).map_err(|e| {
        LlmError::InvalidRequest(format!("failed to read {}: {e}", path.display()))
    })?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Message content: plain text or a list of blocks. Untagged on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Content {
    /// Concatenated text of the content, ignoring non-text blocks.
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(s) => s.is_empty(),
            Content::Blocks(b) => b.is_empty(),
        }
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

// ---------------------------------------------------------------------------
// Tool calls, usage and messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments, possibly incomplete while streaming.
    pub arguments: String,
    /// Opaque per-call data some providers require echoed back (Gemini's
    /// thought signature).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_content: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub completion_tokens: u64,
    pub prompt_tokens: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    /// Provider-specific fields that must survive a round trip (Claude's
    /// thinking signature, OpenRouter's reasoning details).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_metadata: Option<Map<String, Value>>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<Content>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            reasoning_content: None,
            vendor_metadata: None,
        }
    }

    pub fn system(content: impl Into<Content>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<Content>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<Content>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<Content>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    /// Build a user message from optional text and images (URLs or blocks).
    /// Text alone stays a plain string.
    pub fn user_with_images(
        text: Option<&str>,
        images: Vec<ContentBlock>,
    ) -> Result<Self, LlmError> {
        let text = text.filter(|t| !t.is_empty());
        match (text, images.is_empty()) {
            (None, true) => Err(LlmError::InvalidRequest(
                "a user message needs text or images".to_string(),
            )),
            (Some(t), true) => Ok(Self::user(t)),
            (text, false) => {
                let mut blocks = Vec::with_capacity(images.len() + 1);
                if let Some(t) = text {
                    blocks.push(ContentBlock::text(t));
                }
                blocks.extend(images);
                Ok(Self::user(Content::Blocks(blocks)))
            }
        }
    }

    /// Text of the message content, empty when there is none.
    pub fn text(&self) -> String {
        self.content.as_ref().map(Content::as_text).unwrap_or_default()
    }

    /// Look up a vendor metadata string by key.
    pub fn vendor_str(&self, key: &str) -> Option<&str> {
        self.vendor_metadata.as_ref()?.get(key)?.as_str()
    }
}

// ---------------------------------------------------------------------------
// Streaming and non-streaming results
// ---------------------------------------------------------------------------

/// One streaming fragment. `tool_calls`, when present, is the full
/// accumulated state of every call seen so far in the stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Chunk {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub usage: Option<Usage>,
    pub vendor_metadata: Option<Map<String, Value>>,
}

impl Chunk {
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.reasoning_content.is_none()
            && self.tool_calls.is_none()
            && self.usage.is_none()
            && self.vendor_metadata.is_none()
    }
}

/// A complete non-streaming reply.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Response {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub usage: Option<Usage>,
    pub vendor_metadata: Option<Map<String, Value>>,
}

/// Tool definition advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

/// Structured-output request.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFormat {
    JsonObject,
    JsonSchema { name: String, schema: Value },
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
