// Chat session: history, context window, persistence (optionally encrypted)
// and title generation.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gede_llm::models::ModelInfo;
use gede_llm::{ChatCompletion, Content, ContentBlock, LlmError, Message, ModelSettings, Request, Role};

use crate::config::{GedeDirs, DEFAULT_INSTRUCTION, DEFAULT_MESSAGE_NUM_IN_CONTEXT, DEFAULT_MODEL_PATH};
use crate::crypto::{self, CryptoError};

pub const NEW_CHAT_TITLE: &str = "New Chat";

const TITLE_PROMPT: &str = "Generate a short, descriptive title (at most six words) for the \
conversation below. Reply with the title only, without quotes or punctuation at the end.";
const TITLE_EXCERPT_CHARS: usize = 500;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat file not found: {0}")]
    NotFound(PathBuf),

    #[error("chat privacy mode does not match")]
    PrivacyMismatch,

    #[error("private chat requires a password")]
    PasswordRequired,

    #[error("failed to decrypt message (wrong password?): {0}")]
    Decrypt(#[from] CryptoError),

    #[error("invalid chat file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("title generation failed: {0}")]
    Llm(#[from] LlmError),

    #[error("invalid chat file name: {0}")]
    InvalidFilename(String),
}

/// Chat file names are plain names inside the chats directory: no path
/// separators, no `..`, not absolute.
pub fn check_filename(name: &str) -> Result<(), ChatError> {
    let bad = name.trim().is_empty()
        || name.contains(['/', '\\'])
        || name.contains("..")
        || Path::new(name).is_absolute();
    if bad {
        return Err(ChatError::InvalidFilename(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// On-disk format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct ChatFile {
    #[serde(default)]
    chat_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    model_path: Option<String>,
    #[serde(default)]
    is_private: bool,
    #[serde(default)]
    model_settings: Value,
    #[serde(default)]
    messages: Vec<StoredMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: Value,
}

// ---------------------------------------------------------------------------
// ChatStore
// ---------------------------------------------------------------------------

/// Where chat files live: `chats/public` and `chats/private`.
#[derive(Debug, Clone)]
pub struct ChatStore {
    public_dir: PathBuf,
    private_dir: PathBuf,
}

/// A saved chat as shown by `/list`.
#[derive(Debug, Clone)]
pub struct ChatEntry {
    pub filename: String,
    pub title: Option<String>,
    pub modified: DateTime<Local>,
}

impl ChatStore {
    pub fn new(dirs: &GedeDirs) -> Self {
        Self {
            public_dir: dirs.chats(false),
            private_dir: dirs.chats(true),
        }
    }

    pub fn dir(&self, private: bool) -> &Path {
        if private {
            &self.private_dir
        } else {
            &self.public_dir
        }
    }

    /// Saved chats, newest first. A missing directory lists nothing.
    pub fn list(&self, private: bool) -> Result<Vec<ChatEntry>, ChatError> {
        let dir = self.dir(private);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let io_err = |source| ChatError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let modified = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .map(DateTime::<Local>::from)
                .unwrap_or_else(|_| Local::now());
            let title = std::fs::read_to_string(&path)
                .ok()
                .and_then(|text| serde_json::from_str::<ChatFile>(&text).ok())
                .and_then(|file| file.title);
            entries.push(ChatEntry {
                filename: filename.to_string(),
                title,
                modified,
            });
        }
        entries.sort_by(|a, b| b.modified.cmp(&a.modified).then(b.filename.cmp(&a.filename)));
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Chat {
    pub chat_id: String,
    pub filename: Option<String>,
    pub instruction: String,
    pub model_path: String,
    pub title: String,
    pub is_private: bool,
    pub private_password: Option<String>,
    pub message_num_in_context: i64,
    /// Parameters set with `/settings`.
    pub user_model_settings: ModelSettings,
    pub messages: Vec<Message>,
}

impl Default for Chat {
    fn default() -> Self {
        Self::new(false, DEFAULT_INSTRUCTION, DEFAULT_MODEL_PATH)
    }
}

impl Chat {
    /// A fresh chat holding only the system instruction.
    pub fn new(is_private: bool, instruction: &str, model_path: &str) -> Self {
        Self {
            chat_id: format!("cht-{}", Uuid::new_v4()),
            filename: None,
            instruction: instruction.to_string(),
            model_path: model_path.to_string(),
            title: NEW_CHAT_TITLE.to_string(),
            is_private,
            private_password: None,
            message_num_in_context: DEFAULT_MESSAGE_NUM_IN_CONTEXT,
            user_model_settings: ModelSettings::default(),
            messages: vec![Message::system(instruction)],
        }
    }

    /// Replace the system instruction: the last system message is dropped and
    /// the new one goes first.
    pub fn set_instruction(&mut self, instruction: &str) {
        self.instruction = instruction.to_string();
        if let Some(pos) = self.messages.iter().rposition(|m| m.role == Role::System) {
            self.messages.remove(pos);
        }
        self.messages.insert(0, Message::system(instruction));
    }

    pub fn append_user_message(&mut self, text: &str, store: &ChatStore) -> Result<(), ChatError> {
        self.messages.push(Message::user(text));
        self.save(store).map(|_| ())
    }

    pub fn append_assistant_message(&mut self, text: &str, store: &ChatStore) -> Result<(), ChatError> {
        self.messages.push(Message::assistant(text));
        self.save(store).map(|_| ())
    }

    /// The window sent to the model: everything when the limit is off or not
    /// reached, else the first message plus the last `message_num_in_context`.
    pub fn messages_to_talk(&self) -> Vec<Message> {
        let n = self.message_num_in_context;
        if n <= 0 || self.messages.len() <= n as usize {
            return self.messages.clone();
        }
        let n = n as usize;
        let mut window = Vec::with_capacity(n + 1);
        window.push(self.messages[0].clone());
        window.extend_from_slice(&self.messages[self.messages.len() - n..]);
        window
    }

    /// Keep the current filename, else assign a timestamped one.
    pub fn generate_filename(&mut self) -> &str {
        self.filename
            .get_or_insert_with(|| format!("{}.json", Local::now().format("%Y%m%d%H%M%S")))
    }

    pub fn is_untitled(&self) -> bool {
        matches!(self.title.as_str(), "" | NEW_CHAT_TITLE | "Untitled")
    }

    // -- persistence --

    /// Write the chat file. Returns `None` when there is nowhere to save yet:
    /// no filename, or a private chat without a password.
    pub fn save(&self, store: &ChatStore) -> Result<Option<PathBuf>, ChatError> {
        let Some(filename) = &self.filename else {
            debug!("chat filename is not set, skipping save");
            return Ok(None);
        };
        check_filename(filename)?;
        let password = match (&self.private_password, self.is_private) {
            (None, true) => return Ok(None),
            (password, true) => password.as_deref(),
            (_, false) => None,
        };

        let mut messages = Vec::with_capacity(self.messages.len());
        for message in &self.messages {
            let Some(content) = message.content.as_ref().filter(|c| !c.is_empty()) else {
                continue;
            };
            let content = serde_json::to_value(content)?;
            let content = match password {
                Some(pw) => Value::String(crypto::encrypt(&serde_json::to_string(&content)?, pw)?),
                None => content,
            };
            messages.push(StoredMessage {
                role: message.role.as_str().to_string(),
                content,
            });
        }

        let file = ChatFile {
            chat_id: Some(self.chat_id.clone()),
            title: Some(self.title.clone()),
            model_path: Some(self.model_path.clone()),
            is_private: self.is_private,
            model_settings: self.user_model_settings.to_json(),
            messages,
        };

        let dir = store.dir(self.is_private);
        std::fs::create_dir_all(dir).map_err(|source| ChatError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(filename);
        std::fs::write(&path, serde_json::to_string_pretty(&file)?).map_err(|source| {
            ChatError::Io {
                path: path.clone(),
                source,
            }
        })?;
        debug!(path = %path.display(), "saved chat");
        Ok(Some(path))
    }

    /// Load a saved chat. `.json` is appended to `filename` when missing.
    pub fn load(
        store: &ChatStore,
        filename: &str,
        is_private: bool,
        password: Option<&str>,
    ) -> Result<Chat, ChatError> {
        let filename = if filename.ends_with(".json") {
            filename.to_string()
        } else {
            format!("{filename}.json")
        };
        check_filename(&filename)?;
        let path = store.dir(is_private).join(&filename);
        if !path.exists() {
            return Err(ChatError::NotFound(path));
        }
        let text = std::fs::read_to_string(&path).map_err(|source| ChatError::Io {
            path: path.clone(),
            source,
        })?;
        let file: ChatFile = serde_json::from_str(&text)?;

        if file.is_private != is_private {
            return Err(ChatError::PrivacyMismatch);
        }
        let password = password.filter(|p| is_private && !p.is_empty());
        if is_private && password.is_none() {
            return Err(ChatError::PasswordRequired);
        }

        let mut chat = Chat::new(is_private, DEFAULT_INSTRUCTION, DEFAULT_MODEL_PATH);
        if let Some(id) = file.chat_id {
            chat.chat_id = id;
        }
        chat.filename = Some(filename);
        chat.title = file.title.unwrap_or_else(|| "Chat".to_string());
        chat.private_password = password.map(str::to_string);
        if let Some(model_path) = file.model_path.filter(|p| !p.is_empty()) {
            chat.model_path = model_path;
        }
        chat.user_model_settings = ModelSettings::from_json_lenient(&file.model_settings);

        let mut messages = Vec::with_capacity(file.messages.len());
        for stored in file.messages {
            if stored.role.is_empty() || is_blank(&stored.content) {
                continue;
            }
            let Ok(role) = serde_json::from_value::<Role>(Value::String(stored.role.clone())) else {
                warn!(role = stored.role.as_str(), "skipping message with unknown role");
                continue;
            };
            let content = match (password, stored.content) {
                (Some(pw), Value::String(sealed)) => {
                    let plain = crypto::decrypt(&sealed, pw)?;
                    serde_json::from_str(&plain).unwrap_or(Value::String(plain))
                }
                (_, content) => content,
            };
            let content = decode_content(content);

            if role == Role::System {
                if let Content::Text(text) = &content {
                    chat.instruction = text.clone();
                }
            }
            messages.push(Message::new(role, content));
        }
        chat.messages = messages;

        info!(path = %path.display(), "loaded chat");
        Ok(chat)
    }

    // -- title --

    /// Ask the model for a title. Skipped (returns `None`) for private chats
    /// and chats that already have a title.
    pub async fn generate_title(
        &mut self,
        client: &dyn ChatCompletion,
    ) -> Result<Option<String>, ChatError> {
        if self.is_private {
            warn!("private chat cannot generate title automatically");
            return Ok(None);
        }
        if !self.is_untitled() {
            debug!(title = self.title.as_str(), "chat title already set");
            return Ok(None);
        }

        let transcript: Vec<String> = self
            .messages
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
            .map(|m| {
                let text: String = m.text().chars().take(TITLE_EXCERPT_CHARS).collect();
                format!("{}: {}", m.role.as_str(), text)
            })
            .collect();
        if transcript.is_empty() {
            return Ok(None);
        }

        let prompt = [
            Message::system(TITLE_PROMPT),
            Message::user(transcript.join("\n\n")),
        ];
        let response = client.create(Request::new(&prompt)).await?;
        let title = response
            .content
            .unwrap_or_default()
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_default()
            .trim()
            .trim_matches(|c| c == '"' || c == '\'' || c == '*')
            .trim()
            .to_string();

        if title.is_empty() {
            return Ok(None);
        }
        debug!(title = title.as_str(), "generated chat title");
        self.title = title.clone();
        Ok(Some(title))
    }

    // -- info --

    /// Multi-line summary for `/info`.
    pub fn info(&self, model: Option<&ModelInfo>) -> String {
        let model_line = match model {
            Some(m) => format!(
                "{}:{}",
                m.provider_name.as_deref().unwrap_or(&m.provider_id),
                m.display_name()
            ),
            None => self.model_path.clone(),
        };
        let supports = model.map(ModelInfo::supports_description).unwrap_or_default();
        let settings = serde_json::to_string(&self.user_model_settings.to_json())
            .unwrap_or_else(|_| "{}".to_string());

        [
            format!("chat_id: {}", self.chat_id),
            format!("title: {}", self.title),
            format!("filename: {}", self.filename.as_deref().unwrap_or("")),
            format!("private: {}", self.is_private),
            format!(
                "private_password: {}",
                if self.private_password.is_some() { "Set" } else { "Not Set" }
            ),
            format!("model: {model_line}"),
            format!("model_path: {}", self.model_path),
            format!("instruction: {}", self.instruction),
            format!("message_num_in_context: {}", self.message_num_in_context),
            format!("message count: {}", self.messages.len()),
            format!("model_supports: {supports}"),
            format!("model_settings: {settings}"),
        ]
        .join("\n")
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

/// Stored content: a string, or a block list with a string fallback.
fn decode_content(value: Value) -> Content {
    match value {
        Value::String(s) => Content::Text(s),
        Value::Array(items) => {
            let raw = Value::Array(items.clone()).to_string();
            match items
                .into_iter()
                .map(ContentBlock::from_value)
                .collect::<Result<Vec<_>, _>>()
            {
                Ok(blocks) => Content::Blocks(blocks),
                Err(e) => {
                    warn!("failed to decode content blocks, using text fallback: {e}");
                    Content::Text(raw)
                }
            }
        }
        other => Content::Text(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
