// Claude API client using reqwest-eventsource.
//
// Sends unified messages to the Anthropic Messages API and parses the
// Server-Sent Events (`message_start`, `content_block_*`, `message_delta`,
// `message_stop`) into `Chunk`s.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest_eventsource::{Event, EventSource, RequestBuilderExt};
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};

use crate::client::{ChatCompletion, ChunkStream, Request};
use crate::error::{from_eventsource, LlmError};
use crate::settings::ModelSettings;
use crate::types::{
    Chunk, Content, ContentBlock, Message, Response, ResponseFormat, Role, ToolCall, ToolParam,
    Usage,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const STRUCTURED_OUTPUTS_BETA: &str = "structured-outputs-2025-11-13";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Vendor metadata key holding the signature of a thinking block.
pub const THINKING_SIGNATURE: &str = "thinking_signature";

// ---------------------------------------------------------------------------
// ClaudeClient
// ---------------------------------------------------------------------------

/// Claude Messages API client.
pub struct ClaudeClient {
    http: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
    settings: ModelSettings,
}

impl ClaudeClient {
    /// Create a new client. `api_base` defaults to the public Anthropic API.
    pub fn new(
        api_key: impl Into<String>,
        api_base: Option<String>,
        model: impl Into<String>,
        settings: ModelSettings,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            api_base: api_base
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| ANTHROPIC_API_BASE.to_string()),
            model: model.into(),
            settings,
        }
    }

    pub(crate) fn build_body(
        &self,
        messages: &[Message],
        tools: &[ToolParam],
        response_format: Option<&ResponseFormat>,
        stream: bool,
    ) -> Result<Value, LlmError> {
        let mut body = Map::new();
        body.insert("model".into(), json!(self.model));
        body.insert("messages".into(), Value::Array(convert_messages(messages)?));
        body.insert(
            "max_tokens".into(),
            json!(self.settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );
        if stream {
            body.insert("stream".into(), json!(true));
        }

        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(Message::text)
            .filter(|s| !s.is_empty());
        if let Some(system) = system {
            body.insert("system".into(), json!(system));
        }

        if !tools.is_empty() {
            let tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body.insert("tools".into(), Value::Array(tools));
        }

        match response_format {
            Some(ResponseFormat::JsonSchema { schema, .. }) => {
                body.insert(
                    "output_format".into(),
                    json!({ "type": "json_schema", "schema": schema }),
                );
            }
            Some(ResponseFormat::JsonObject) => {
                error!("Claude only supports JSON schema response formats; ignoring json_object");
            }
            None => {}
        }

        if let Some(thinking) = self.settings.extra_body.as_ref().and_then(|b| b.get("thinking")) {
            body.insert("thinking".into(), thinking.clone());
        }
        Ok(Value::Object(body))
    }

    fn post(&self, body: &Value, structured: bool) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .post(format!("{}/v1/messages", self.api_base.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body);
        if structured {
            request = request.header("anthropic-beta", STRUCTURED_OUTPUTS_BETA);
        }
        request
    }

    async fn prepare(&self, request: &Request<'_>, stream: bool) -> Result<(Value, bool), LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        let tools = request.tool_params().await;
        let body = self.build_body(request.messages, &tools, request.response_format, stream)?;
        let structured = matches!(request.response_format, Some(ResponseFormat::JsonSchema { .. }));
        debug!(model = %self.model, stream, tools = tools.len(), "Claude request");
        Ok((body, structured))
    }
}

#[async_trait]
impl ChatCompletion for ClaudeClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn create_stream(&self, request: Request<'_>) -> Result<ChunkStream, LlmError> {
        let (body, structured) = self.prepare(&request, true).await?;
        let es = self
            .post(&body, structured)
            .eventsource()
            .map_err(|e| LlmError::Stream(format!("failed to create event source: {e}")))?;
        Ok(event_stream(es))
    }

    async fn create(&self, request: Request<'_>) -> Result<Response, LlmError> {
        let (body, structured) = self.prepare(&request, false).await?;
        let response = self.post(&body, structured).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), &text));
        }
        let value: Value = serde_json::from_str(&text)?;
        debug!("Claude response: {value}");
        Ok(convert_response(&value))
    }
}

struct StreamState {
    es: EventSource,
    converter: EventConverter,
    done: bool,
}

fn event_stream(es: EventSource) -> ChunkStream {
    let state = StreamState {
        es,
        converter: EventConverter::default(),
        done: false,
    };
    futures_util::stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }
        while let Some(event) = st.es.next().await {
            match event {
                Ok(Event::Open) => debug!("SSE connection opened"),
                Ok(Event::Message(msg)) => match st.converter.convert(&msg.event, &msg.data) {
                    Converted::Chunk(chunk) => return Some((Ok(chunk), st)),
                    Converted::Skip => continue,
                    Converted::Stop => {
                        debug!("message_stop, streaming complete");
                        st.es.close();
                        return None;
                    }
                    Converted::Error(message) => {
                        st.es.close();
                        st.done = true;
                        return Some((Err(LlmError::Stream(message)), st));
                    }
                },
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
// Message conversion
// ---------------------------------------------------------------------------

fn source_of(url: &str, media_type: Option<&str>) -> Value {
    if url.starts_with("http") {
        json!({ "type": "url", "url": url })
    } else {
        json!({ "type": "base64", "media_type": media_type, "data": url })
    }
}

fn user_blocks(content: Option<&Content>) -> Vec<Value> {
    match content {
        None => Vec::new(),
        Some(Content::Text(text)) if text.is_empty() => Vec::new(),
        Some(Content::Text(text)) => vec![json!({ "type": "text", "text": text })],
        Some(Content::Blocks(blocks)) => blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
                ContentBlock::Image {
                    image_url,
                    media_type,
                    ..
                } => json!({ "type": "image", "source": source_of(image_url, media_type.as_deref()) }),
                ContentBlock::Document {
                    document_url,
                    media_type,
                    ..
                } => json!({
                    "type": "document",
                    "source": source_of(document_url, media_type.as_deref())
                }),
            })
            .collect(),
    }
}

fn assistant_blocks(msg: &Message) -> Vec<Value> {
    let mut blocks = Vec::new();
    // Thinking can only be replayed together with its signature.
    if let (Some(reasoning), Some(signature)) = (
        msg.reasoning_content.as_ref().filter(|r| !r.is_empty()),
        msg.vendor_str(THINKING_SIGNATURE),
    ) {
        blocks.push(json!({ "type": "thinking", "thinking": reasoning, "signature": signature }));
    }

    let text = msg.text();
    if !text.is_empty() {
        blocks.push(json!({ "type": "text", "text": text }));
    }

    for tc in msg.tool_calls.iter().flatten() {
        let input = if tc.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&tc.arguments).unwrap_or_else(|e| {
                warn!(tool = %tc.name, "unparseable tool arguments in history: {e}");
                json!({})
            })
        };
        blocks.push(json!({ "type": "tool_use", "id": tc.id, "name": tc.name, "input": input }));
    }
    blocks
}

/// Convert unified messages to Messages API turns. System messages are
/// dropped (sent separately); tool results are folded into user turns.
pub(crate) fn convert_messages(messages: &[Message]) -> Result<Vec<Value>, LlmError> {
    let mut out: Vec<Value> = Vec::new();
    for msg in messages {
        match msg.role {
            Role::System => {}
            Role::User => {
                out.push(json!({ "role": "user", "content": user_blocks(msg.content.as_ref()) }));
            }
            Role::Assistant => {
                out.push(json!({ "role": "assistant", "content": assistant_blocks(msg) }));
            }
            Role::Tool => {
                let Some(tool_use_id) = &msg.tool_call_id else {
                    return Err(LlmError::InvalidRequest(
                        "tool message without tool_call_id".to_string(),
                    ));
                };
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": msg.text(),
                });
                let last_is_user = out.last().is_some_and(|m| m["role"] == "user");
                let previous = out
                    .last_mut()
                    .filter(|_| last_is_user)
                    .and_then(|m| m["content"].as_array_mut());
                match previous {
                    Some(content) => content.push(block),
                    None => out.push(json!({ "role": "user", "content": [block] })),
                }
            }
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// SSE JSON parsing helpers
// ---------------------------------------------------------------------------

/// Extract `input_tokens` from a `message_start` event's JSON.
///
/// Expected shape: `{ "type": "message_start", "message": { "usage": { "input_tokens": N } } }`
pub(crate) fn parse_input_tokens(v: &Value) -> Option<u64> {
    v.get("message")?.get("usage")?.get("input_tokens")?.as_u64()
}

/// Extract `output_tokens` from a `message_delta` event's JSON.
///
/// Expected shape: `{ "type": "message_delta", "usage": { "output_tokens": N } }`
pub(crate) fn parse_output_tokens(v: &Value) -> Option<u64> {
    v.get("usage")?.get("output_tokens")?.as_u64()
}

/// Outcome of converting one SSE event.
#[derive(Debug, PartialEq)]
pub(crate) enum Converted {
    Chunk(Chunk),
    Skip,
    Stop,
    Error(String),
}

/// Per-stream state: tool_use blocks by content index and the prompt token
/// count from `message_start`.
#[derive(Debug, Default)]
pub(crate) struct EventConverter {
    tool_calls: BTreeMap<u64, ToolCall>,
    input_tokens: u64,
    model: Option<String>,
}

impl EventConverter {
    fn snapshot(&self) -> Option<Vec<ToolCall>> {
        Some(self.tool_calls.values().cloned().collect())
    }

    pub(crate) fn convert(&mut self, event: &str, data: &str) -> Converted {
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                warn!(event, "failed to parse SSE payload: {e}");
                return Converted::Skip;
            }
        };
        let event_type = v.get("type").and_then(Value::as_str).unwrap_or(event);
        let mut chunk = Chunk::default();

        match event_type {
            "message_start" => {
                match parse_input_tokens(&v) {
                    Some(n) => self.input_tokens = n,
                    None => warn!("failed to parse input_tokens from message_start"),
                }
                self.model = v
                    .pointer("/message/model")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                debug!(input_tokens = self.input_tokens, "message_start");
                return Converted::Skip;
            }
            "content_block_start" => {
                let block = v.get("content_block");
                if block.and_then(|b| b.get("type")).and_then(Value::as_str) != Some("tool_use") {
                    return Converted::Skip;
                }
                let index = v.get("index").and_then(Value::as_u64).unwrap_or(0);
                let field = |k: &str| {
                    block
                        .and_then(|b| b.get(k))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                self.tool_calls.insert(
                    index,
                    ToolCall {
                        id: field("id"),
                        name: field("name"),
                        ..Default::default()
                    },
                );
                chunk.tool_calls = self.snapshot();
            }
            "content_block_delta" => {
                let delta = v.get("delta").cloned().unwrap_or(Value::Null);
                let text = |k: &str| delta.get(k).and_then(Value::as_str).map(str::to_string);
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => chunk.content = text("text"),
                    Some("thinking_delta") => chunk.reasoning_content = text("thinking"),
                    Some("signature_delta") => {
                        if let Some(sig) = text("signature") {
                            let mut meta = Map::new();
                            meta.insert(THINKING_SIGNATURE.into(), json!(sig));
                            chunk.vendor_metadata = Some(meta);
                        }
                    }
                    Some("input_json_delta") => {
                        let index = v.get("index").and_then(Value::as_u64).unwrap_or(0);
                        let Some(call) = self.tool_calls.get_mut(&index) else {
                            return Converted::Skip;
                        };
                        call.arguments.push_str(&text("partial_json").unwrap_or_default());
                        chunk.tool_calls = self.snapshot();
                    }
                    _ => return Converted::Skip,
                }
            }
            "message_delta" => {
                let Some(output_tokens) = parse_output_tokens(&v) else {
                    warn!("failed to parse output_tokens from message_delta");
                    return Converted::Skip;
                };
                debug!(output_tokens, "message_delta");
                chunk.usage = Some(Usage {
                    completion_tokens: output_tokens,
                    prompt_tokens: self.input_tokens,
                    total_tokens: self.input_tokens + output_tokens,
                    model: self.model.clone(),
                    ..Default::default()
                });
            }
            "message_stop" => return Converted::Stop,
            "error" => {
                let message = v
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown stream error")
                    .to_string();
                return Converted::Error(message);
            }
            // ping, content_block_stop, ...
            other => {
                debug!(event_type = other, "ignoring SSE event");
                return Converted::Skip;
            }
        }

        if chunk.is_empty() {
            Converted::Skip
        } else {
            Converted::Chunk(chunk)
        }
    }
}

/// Convert a non-streaming Messages API response.
pub(crate) fn convert_response(v: &Value) -> Response {
    let mut out = Response::default();
    if let Some(usage) = v.get("usage") {
        let input = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
        let output = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
        out.usage = Some(Usage {
            completion_tokens: output,
            prompt_tokens: input,
            total_tokens: input + output,
            model: v.get("model").and_then(Value::as_str).map(str::to_string),
            ..Default::default()
        });
    }

    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();
    let mut signature = None;
    for block in v.get("content").and_then(Value::as_array).into_iter().flatten() {
        let s = |k: &str| block.get(k).and_then(Value::as_str).unwrap_or_default();
        match s("type") {
            "text" => content.push_str(s("text")),
            "thinking" => {
                reasoning.push_str(s("thinking"));
                if !s("signature").is_empty() {
                    signature = Some(s("signature").to_string());
                }
            }
            "tool_use" => tool_calls.push(ToolCall {
                id: s("id").to_string(),
                name: s("name").to_string(),
                arguments: block
                    .get("input")
                    .filter(|i| !i.is_null())
                    .map(Value::to_string)
                    .unwrap_or_else(|| "{}".to_string()),
                extra_content: None,
            }),
            _ => {}
        }
    }

    out.content = Some(content).filter(|c| !c.is_empty());
    out.reasoning_content = Some(reasoning).filter(|r| !r.is_empty());
    out.tool_calls = Some(tool_calls).filter(|t| !t.is_empty());
    out.vendor_metadata = signature.map(|sig| {
        let mut meta = Map::new();
        meta.insert(THINKING_SIGNATURE.into(), json!(sig));
        meta
    });
    out
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{request_body, serve_once, sse_response};

    fn parse(data: &str) -> Value {
        serde_json::from_str(data).unwrap()
    }

    // -- SSE JSON parsing tests --

    #[test]
    fn parse_message_start_input_tokens() {
        let data = r#"{
            "type": "message_start",
            "message": {
                "id": "msg_123",
                "type": "message",
                "role": "assistant",
                "content": [],
                "model": "claude-sonnet-4-5-20250929",
                "usage": { "input_tokens": 42, "output_tokens": 0 }
            }
        }"#;
        assert_eq!(parse_input_tokens(&parse(data)), Some(42));
    }

    #[test]
    fn parse_message_start_missing_usage() {
        let data = r#"{ "type": "message_start", "message": { "id": "msg_1" } }"#;
        assert_eq!(parse_input_tokens(&parse(data)), None);
    }

    #[test]
    fn parse_message_delta_output_tokens() {
        let data = r#"{
            "type": "message_delta",
            "delta": { "stop_reason": "end_turn", "stop_sequence": null },
            "usage": { "output_tokens": 128 }
        }"#;
        assert_eq!(parse_output_tokens(&parse(data)), Some(128));
    }

    #[test]
    fn parse_message_delta_missing_usage() {
        let data = r#"{ "type": "message_delta", "delta": {} }"#;
        assert_eq!(parse_output_tokens(&parse(data)), None);
    }

    // -- Event conversion --

    #[test]
    fn text_and_thinking_deltas_become_chunks() {
        let mut conv = EventConverter::default();
        let text = conv.convert(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Shohei Ohtani (大谷)"}}"#,
        );
        match text {
            Converted::Chunk(c) => assert!(c.content.unwrap().contains('\u{5927}')),
            other => panic!("unexpected: {other:?}"),
        }

        let thinking = conv.convert(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"Let me see"}}"#,
        );
        assert!(matches!(thinking, Converted::Chunk(ref c) if c.reasoning_content.as_deref() == Some("Let me see")));

        let sig = conv.convert(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"signature_delta","signature":"EqQB"}}"#,
        );
        match sig {
            Converted::Chunk(c) => assert_eq!(c.vendor_metadata.unwrap()[THINKING_SIGNATURE], "EqQB"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn tool_use_blocks_accumulate_json() {
        let mut conv = EventConverter::default();
        let start = conv.convert(
            "content_block_start",
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"get_time","input":{}}}"#,
        );
        assert!(matches!(start, Converted::Chunk(ref c) if c.tool_calls.as_ref().unwrap()[0].arguments.is_empty()));

        conv.convert(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"tz\":"}}"#,
        );
        let last = conv.convert(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"UTC\"}"}}"#,
        );
        match last {
            Converted::Chunk(c) => {
                let calls = c.tool_calls.unwrap();
                assert_eq!(calls[0].id, "toolu_1");
                assert_eq!(calls[0].arguments, r#"{"tz":"UTC"}"#);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn usage_combines_start_and_delta() {
        let mut conv = EventConverter::default();
        let start = conv.convert(
            "message_start",
            r#"{"type":"message_start","message":{"model":"claude-x","usage":{"input_tokens":25}}}"#,
        );
        assert_eq!(start, Converted::Skip);

        let delta = conv.convert(
            "message_delta",
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":10}}"#,
        );
        match delta {
            Converted::Chunk(c) => {
                let u = c.usage.unwrap();
                assert_eq!((u.prompt_tokens, u.completion_tokens, u.total_tokens), (25, 10, 35));
                assert_eq!(u.model.as_deref(), Some("claude-x"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn stop_ping_and_error_events() {
        let mut conv = EventConverter::default();
        assert_eq!(conv.convert("ping", r#"{"type":"ping"}"#), Converted::Skip);
        assert_eq!(conv.convert("message_stop", r#"{"type":"message_stop"}"#), Converted::Stop);
        assert_eq!(
            conv.convert(
                "error",
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#
            ),
            Converted::Error("Overloaded".into())
        );
        assert_eq!(conv.convert("content_block_delta", "{broken"), Converted::Skip);
    }

    // -- Request conversion --

    #[test]
    fn tool_results_fold_into_user_turn() {
        let mut meta = Map::new();
        meta.insert(THINKING_SIGNATURE.into(), json!("sig"));
        let msgs = vec![
            Message::system("be brief"),
            Message::user("what time is it?"),
            Message {
                tool_calls: Some(vec![
                    ToolCall {
                        id: "t1".into(),
                        name: "now".into(),
                        arguments: String::new(),
                        extra_content: None,
                    },
                    ToolCall {
                        id: "t2".into(),
                        name: "tz".into(),
                        arguments: r#"{"city":"Paris"}"#.into(),
                        extra_content: None,
                    },
                ]),
                reasoning_content: Some("need tools".into()),
                vendor_metadata: Some(meta),
                ..Message::assistant("")
            },
            Message::tool_result("t1", "12:00"),
            Message::tool_result("t2", "CET"),
        ];
        let out = convert_messages(&msgs).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0]["content"][0], json!({"type": "text", "text": "what time is it?"}));

        let assistant = out[1]["content"].as_array().unwrap();
        assert_eq!(assistant[0]["type"], "thinking");
        assert_eq!(assistant[0]["signature"], "sig");
        assert_eq!(assistant[1]["input"], json!({}));
        assert_eq!(assistant[2]["input"]["city"], "Paris");

        let results = out[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1]["tool_use_id"], "t2");
    }

    #[test]
    fn thinking_without_signature_is_dropped() {
        let msg = Message {
            reasoning_content: Some("hidden".into()),
            ..Message::assistant("answer")
        };
        let out = convert_messages(&[msg]).unwrap();
        assert_eq!(out[0]["content"], json!([{"type": "text", "text": "answer"}]));
    }

    #[test]
    fn images_use_url_or_base64_source() {
        let msg = Message::user(Content::Blocks(vec![
            ContentBlock::image_from_url("https://e.com/a.png", None),
            ContentBlock::image_from_base64("QUJD", "image/png"),
        ]));
        let out = convert_messages(&[msg]).unwrap();
        assert_eq!(out[0]["content"][0]["source"]["type"], "url");
        assert_eq!(out[0]["content"][1]["source"]["media_type"], "image/png");
    }

    #[test]
    fn body_carries_system_thinking_and_schema() {
        let mut settings = ModelSettings::default();
        settings
            .set("extra_body", r#"{"thinking":{"type":"enabled","budget_tokens":2000}}"#)
            .unwrap();
        let client = ClaudeClient::new("k", None, "claude-x", settings);
        let format = ResponseFormat::JsonSchema {
            name: "A".into(),
            schema: json!({"type": "object"}),
        };
        let body = client
            .build_body(&[Message::system("sys"), Message::user("hi")], &[], Some(&format), false)
            .unwrap();
        assert_eq!(body["system"], "sys");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["thinking"]["budget_tokens"], 2000);
        assert_eq!(body["output_format"]["type"], "json_schema");
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn non_streaming_response_collects_blocks() {
        let r = convert_response(&json!({
            "model": "claude-x",
            "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "s1"},
                {"type": "text", "text": "Hi"},
                {"type": "tool_use", "id": "t", "name": "now", "input": {}}
            ],
            "usage": {"input_tokens": 3, "output_tokens": 4}
        }));
        assert_eq!(r.content.as_deref(), Some("Hi"));
        assert_eq!(r.reasoning_content.as_deref(), Some("hmm"));
        assert_eq!(r.tool_calls.unwrap()[0].arguments, "{}");
        assert_eq!(r.usage.unwrap().total_tokens, 7);
        assert_eq!(r.vendor_metadata.unwrap()[THINKING_SIGNATURE], "s1");
    }

    // -- ClaudeClient with empty API key --

    #[tokio::test]
    async fn empty_api_key_is_rejected() {
        let client = ClaudeClient::new(String::new(), None, "model", ModelSettings::default());
        let msgs = [Message::user("hi")];
        let Err(err) = client.create_stream(Request::new(&msgs)).await else {
            panic!("expected missing key error");
        };
        assert_eq!(err.to_string(), "API key not configured");
    }

    // -- Integration-style test with mock TCP server --

    #[tokio::test]
    async fn mock_sse_server_full_flow() {
        let (base, server) = serve_once(sse_response(&[
            (Some("message_start"), r#"{"type":"message_start","message":{"id":"msg_1","type":"message","role":"assistant","content":[],"model":"test","usage":{"input_tokens":15}}}"#),
            (Some("content_block_start"), r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#),
            (Some("content_block_delta"), r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Draft"}}"#),
            (Some("content_block_delta"), r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":" analysis"}}"#),
            (Some("content_block_stop"), r#"{"type":"content_block_stop","index":0}"#),
            (Some("message_delta"), r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":7}}"#),
            (Some("message_stop"), r#"{"type":"message_stop"}"#),
        ]))
        .await;

        let client = ClaudeClient::new("sk-ant-test", Some(base), "test", ModelSettings::default());
        let msgs = [Message::system("sys"), Message::user("hello")];
        let mut stream = client.create_stream(Request::new(&msgs)).await.unwrap();

        let mut text = String::new();
        let mut usage = None;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            if let Some(c) = chunk.content {
                text.push_str(&c);
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
        }
        assert_eq!(text, "Draft analysis");
        let usage = usage.unwrap();
        assert_eq!((usage.prompt_tokens, usage.completion_tokens), (15, 7));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/messages"));
        assert!(request.to_ascii_lowercase().contains("x-api-key: sk-ant-test"));
        let body = request_body(&request);
        assert_eq!(body["system"], "sys");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }
}
