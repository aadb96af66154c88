// OpenAI-compatible chat completions client (OpenRouter, ZenMux, ...).
//
// Converts unified messages into the `/chat/completions` wire format and the
// streamed `chat.completion.chunk` payloads back into `Chunk`s.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest_eventsource::{Event, EventSource, RequestBuilderExt};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::client::{ChatCompletion, ChunkStream, Request};
use crate::error::{from_eventsource, LlmError};
use crate::settings::{ModelSettings, ToolChoice};
use crate::types::{
    Chunk, Content, ContentBlock, Message, Response, ResponseFormat, ToolCall, ToolParam, Usage,
};

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenAiCompatible {
    http: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
    settings: ModelSettings,
}

impl OpenAiCompatible {
    pub fn new(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        model: impl Into<String>,
        settings: ModelSettings,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            api_base: api_base.into(),
            model: model.into(),
            settings,
        }
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    /// Assemble the JSON request body.
    pub(crate) fn build_body(
        &self,
        messages: &[Message],
        tools: &[ToolParam],
        response_format: Option<&ResponseFormat>,
        stream: bool,
    ) -> Result<Value, LlmError> {
        let s = &self.settings;
        let mut body = Map::new();
        body.insert("model".into(), json!(self.model));
        body.insert("messages".into(), Value::Array(convert_messages(messages)?));
        body.insert("stream".into(), json!(stream));

        if !tools.is_empty() {
            body.insert("tools".into(), Value::Array(convert_tools(tools)));
        }
        if let Some(effort) = &s.reasoning_effort {
            body.insert("reasoning_effort".into(), json!(effort));
        }
        if let Some(v) = s.frequency_penalty {
            body.insert("frequency_penalty".into(), json!(v));
        }
        if let Some(v) = s.max_tokens {
            body.insert("max_completion_tokens".into(), json!(v));
        }
        if let Some(v) = &s.metadata {
            body.insert("metadata".into(), Value::Object(v.clone()));
        }
        if let Some(v) = s.parallel_tool_calls {
            body.insert("parallel_tool_calls".into(), json!(v));
        }
        if let Some(v) = s.temperature {
            body.insert("temperature".into(), json!(v));
        }
        if let Some(v) = s.top_p {
            body.insert("top_p".into(), json!(v));
        }
        if let Some(v) = s.presence_penalty {
            body.insert("presence_penalty".into(), json!(v));
        }
        if stream {
            if let Some(v) = s.include_usage {
                body.insert("stream_options".into(), json!({ "include_usage": v }));
            }
        }
        if let Some(v) = &s.verbosity {
            body.insert("verbosity".into(), json!(v));
        }
        if let Some(choice) = &s.tool_choice {
            let value = match choice {
                ToolChoice::Mode(mode) => json!(mode),
                ToolChoice::Function { name } => {
                    json!({ "type": "function", "function": { "name": name } })
                }
            };
            body.insert("tool_choice".into(), value);
        }
        if let Some(format) = response_format {
            body.insert("response_format".into(), convert_response_format(format));
        }
        if let Some(extra) = &s.extra_body {
            for (k, v) in extra {
                body.insert(k.clone(), v.clone());
            }
        }
        Ok(Value::Object(body))
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        let mut request = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(body);

        if let Some(query) = &self.settings.extra_query {
            let pairs: Vec<(String, String)> = query
                .iter()
                .map(|(k, v)| (k.clone(), value_to_text(v)))
                .collect();
            request = request.query(&pairs);
        }
        if let Some(headers) = &self.settings.extra_headers {
            for (k, v) in headers {
                request = request.header(k.as_str(), value_to_text(v));
            }
        }
        request
    }

    async fn prepare(&self, request: &Request<'_>, stream: bool) -> Result<Value, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        let tools = request.tool_params().await;
        let body = self.build_body(request.messages, &tools, request.response_format, stream)?;
        debug!(model = %self.model, stream, tools = tools.len(), "chat completion request");
        Ok(body)
    }
}

fn value_to_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ChatCompletion for OpenAiCompatible {
    fn model(&self) -> &str {
        &self.model
    }

    async fn create_stream(&self, request: Request<'_>) -> Result<ChunkStream, LlmError> {
        let body = self.prepare(&request, true).await?;
        let es = self
            .post(&body)
            .eventsource()
            .map_err(|e| LlmError::Stream(format!("failed to create event source: {e}")))?;
        Ok(chunk_stream(es))
    }

    async fn create(&self, request: Request<'_>) -> Result<Response, LlmError> {
        let body = self.prepare(&request, false).await?;
        let response = self.post(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), &text));
        }
        let value: Value = serde_json::from_str(&text)?;
        debug!("chat completion response: {value}");
        Ok(convert_response(&value))
    }
}

struct StreamState {
    es: EventSource,
    converter: ChunkConverter,
    done: bool,
}

/// Turn an event source into converted chunks, ending at `[DONE]`.
fn chunk_stream(es: EventSource) -> ChunkStream {
    let state = StreamState {
        es,
        converter: ChunkConverter::default(),
        done: false,
    };
    futures_util::stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }
        while let Some(event) = st.es.next().await {
            match event {
                Ok(Event::Open) => debug!("SSE connection opened"),
                Ok(Event::Message(msg)) => {
                    let data = msg.data.trim();
                    if data == "[DONE]" {
                        st.es.close();
                        return None;
                    }
                    let value: Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("skipping malformed chunk: {e}");
                            continue;
                        }
                    };
                    if let Some(err) = value.get("error") {
                        st.es.close();
                        st.done = true;
                        let message = err
                            .get("message")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| err.to_string());
                        return Some((Err(LlmError::Stream(message)), st));
                    }
                    let chunk = st.converter.convert(&value);
                    return Some((Ok(chunk), st));
                }
                Err(reqwest_eventsource::Error::StreamEnded) => {
                    st.es.close();
                    return None;
                }
                Err(err) => {
                    warn!(?err, "SSE stream error");
                    st.es.close();
                    st.done = true;
                    return Some((Err(from_eventsource(err).await), st));
                }
            }
        }
        None
    })
    .boxed()
}

// ---------------------------------------------------------------------------
// Request conversion
// ---------------------------------------------------------------------------

/// Convert unified messages to the chat completions format.
pub(crate) fn convert_messages(messages: &[Message]) -> Result<Vec<Value>, LlmError> {
    messages.iter().map(convert_message).collect()
}

fn convert_message(msg: &Message) -> Result<Value, LlmError> {
    let mut out = Map::new();
    out.insert("role".into(), json!(msg.role.as_str()));

    match &msg.content {
        Some(Content::Text(text)) => {
            out.insert("content".into(), json!(text));
        }
        Some(Content::Blocks(blocks)) => {
            let parts = blocks.iter().map(convert_block).collect::<Result<Vec<_>, _>>()?;
            out.insert("content".into(), Value::Array(parts));
        }
        None => {}
    }

    if let Some(calls) = msg.tool_calls.as_ref().filter(|c| !c.is_empty()) {
        let calls: Vec<Value> = calls
            .iter()
            .map(|tc| {
                let mut call = json!({
                    "id": tc.id,
                    "type": "function",
                    "function": { "name": tc.name, "arguments": tc.arguments }
                });
                if let Some(extra) = &tc.extra_content {
                    // Stored chats may hold the value as a JSON string.
                    let extra = match extra {
                        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| extra.clone()),
                        other => other.clone(),
                    };
                    call["extra_content"] = extra;
                }
                call
            })
            .collect();
        out.insert("tool_calls".into(), Value::Array(calls));
    }
    if let Some(id) = &msg.tool_call_id {
        out.insert("tool_call_id".into(), json!(id));
    }
    if let Some(reasoning) = msg.reasoning_content.as_ref().filter(|r| !r.is_empty()) {
        out.insert("reasoning_content".into(), json!(reasoning));
    }
    if let Some(meta) = &msg.vendor_metadata {
        for (k, v) in meta {
            out.insert(k.clone(), v.clone());
        }
    }
    Ok(Value::Object(out))
}

fn convert_block(block: &ContentBlock) -> Result<Value, LlmError> {
    match block {
        ContentBlock::Text { text } => Ok(json!({ "type": "text", "text": text })),
        ContentBlock::Image {
            image_url,
            media_type,
            detail,
        } => {
            let url = if image_url.starts_with("http") {
                image_url.clone()
            } else {
                format!(
                    "data:{};base64,{image_url}",
                    media_type.as_deref().unwrap_or("image/png")
                )
            };
            let mut image = json!({ "url": url });
            if let Some(detail) = detail {
                image["detail"] = json!(detail);
            }
            Ok(json!({ "type": "image_url", "image_url": image }))
        }
        ContentBlock::Document {
            document_url,
            media_type,
            filename,
        } => {
            if document_url.starts_with("http") {
                return Err(LlmError::InvalidRequest(format!(
                    "documents must be sent as base64 or local files, not URLs: {document_url}"
                )));
            }
            let Some(filename) = filename else {
                return Err(LlmError::InvalidRequest(
                    "document input requires a filename".to_string(),
                ));
            };
            Ok(json!({
                "type": "file",
                "file": {
                    "filename": filename,
                    "file_data": format!(
                        "data:{};base64,{document_url}",
                        media_type.as_deref().unwrap_or("application/pdf")
                    ),
                }
            }))
        }
    }
}

fn convert_tools(tools: &[ToolParam]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect()
}

fn convert_response_format(format: &ResponseFormat) -> Value {
    match format {
        ResponseFormat::JsonObject => json!({ "type": "json_object" }),
        ResponseFormat::JsonSchema { name, schema } => {
            let mut schema = schema.clone();
            if let Some(obj) = schema.as_object_mut() {
                obj.insert("additionalProperties".into(), json!(false));
            }
            json!({
                "type": "json_schema",
                "json_schema": { "name": name, "schema": schema, "strict": true }
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Response conversion
// ---------------------------------------------------------------------------

fn parse_usage(usage: &Value, model: Option<&str>) -> Usage {
    let count = |v: Option<&Value>| v.and_then(Value::as_u64);
    Usage {
        completion_tokens: count(usage.get("completion_tokens")).unwrap_or(0),
        prompt_tokens: count(usage.get("prompt_tokens")).unwrap_or(0),
        total_tokens: count(usage.get("total_tokens")).unwrap_or(0),
        reasoning_tokens: count(usage.pointer("/completion_tokens_details/reasoning_tokens")),
        cached_tokens: count(usage.pointer("/prompt_tokens_details/cached_tokens")),
        model: model.map(str::to_string),
    }
}

fn non_empty_str(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `reasoning` (Gemini style) or `reasoning_content` (DeepSeek style).
fn reasoning_of(v: &Value) -> Option<String> {
    non_empty_str(v.get("reasoning_content")).or_else(|| non_empty_str(v.get("reasoning")))
}

fn reasoning_details_of(v: &Value) -> Option<Map<String, Value>> {
    let details = v.get("reasoning_details")?;
    let empty = match details {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        _ => false,
    };
    if empty {
        return None;
    }
    let mut meta = Map::new();
    meta.insert("reasoning_details".into(), details.clone());
    Some(meta)
}

/// Per-stream converter that accumulates tool call fragments by index.
#[derive(Debug, Default)]
pub(crate) struct ChunkConverter {
    tool_calls: BTreeMap<u64, ToolCall>,
}

impl ChunkConverter {
    pub(crate) fn convert(&mut self, chunk: &Value) -> Chunk {
        let mut out = Chunk::default();

        if let Some(usage) = chunk.get("usage").filter(|u| u.is_object()) {
            out.usage = Some(parse_usage(usage, chunk.get("model").and_then(Value::as_str)));
        }

        let Some(delta) = chunk.pointer("/choices/0/delta") else {
            return out;
        };

        out.content = non_empty_str(delta.get("content"));
        out.reasoning_content = reasoning_of(delta);
        out.vendor_metadata = reasoning_details_of(delta);

        if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for tc in calls {
                let index = tc.get("index").and_then(Value::as_u64).unwrap_or(0);
                let entry = self.tool_calls.entry(index).or_default();
                if let Some(id) = non_empty_str(tc.get("id")) {
                    entry.id = id;
                }
                if let Some(name) = non_empty_str(tc.pointer("/function/name")) {
                    entry.name = name;
                }
                if let Some(args) = tc.pointer("/function/arguments").and_then(Value::as_str) {
                    entry.arguments.push_str(args);
                }
                if let Some(extra) = tc.get("extra_content").filter(|v| !v.is_null()) {
                    entry.extra_content = Some(extra.clone());
                }
            }
            out.tool_calls = Some(self.tool_calls.values().cloned().collect());
        }
        out
    }
}

/// Convert a non-streaming `chat.completion` body.
pub(crate) fn convert_response(value: &Value) -> Response {
    let mut out = Response::default();
    if let Some(usage) = value.get("usage").filter(|u| u.is_object()) {
        out.usage = Some(parse_usage(usage, value.get("model").and_then(Value::as_str)));
    }
    let Some(message) = value.pointer("/choices/0/message") else {
        return out;
    };

    out.content = non_empty_str(message.get("content"));
    out.reasoning_content = reasoning_of(message);
    out.vendor_metadata = reasoning_details_of(message);

    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        out.tool_calls = Some(
            calls
                .iter()
                .map(|tc| ToolCall {
                    id: non_empty_str(tc.get("id")).unwrap_or_default(),
                    name: non_empty_str(tc.pointer("/function/name")).unwrap_or_default(),
                    arguments: tc
                        .pointer("/function/arguments")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    extra_content: tc.get("extra_content").filter(|v| !v.is_null()).cloned(),
                })
                .collect(),
        );
    }
    out
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
