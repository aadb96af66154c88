// Integration tests for gede-llm.
//
// These drive the public API against a local HTTP server that replays
// scripted responses, covering a streamed run with a tool round-trip on the
// OpenAI-compatible wire format, the Anthropic Messages stream, and catalog
// refresh through the on-disk cache.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use gede_llm::claude::ClaudeClient;
use gede_llm::models::ModelCatalog;
use gede_llm::openai::OpenAiCompatible;
use gede_llm::runner::{run, run_stream, RunOptions};
use gede_llm::tools::{Tool, ToolFunctions};
use gede_llm::{LlmError, Message, ModelSettings, Role, StreamEvent, ToolParam};

// ===========================================================================
// Test helpers
// ===========================================================================

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Serve `responses` to consecutive connections, returning the captured
/// requests once all have been answered.
async fn serve(responses: Vec<String>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            requests.push(read_request(&mut socket).await);
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            let _ = socket.shutdown().await;
        }
        requests
    });
    (format!("http://{addr}"), handle)
}

fn sse(events: &[(Option<&str>, &str)]) -> String {
    let mut out = String::from(
        "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n",
    );
    for (name, data) in events {
        if let Some(name) = name {
            out.push_str(&format!("event: {name}\r\n"));
        }
        out.push_str(&format!("data: {data}\r\n\r\n"));
    }
    out
}

fn json_ok(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn body_of(request: &str) -> Value {
    serde_json::from_str(request.split("\r\n\r\n").nth(1).unwrap_or("")).unwrap()
}

async fn collect(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

struct Add;

#[async_trait]
impl Tool for Add {
    fn param(&self) -> ToolParam {
        ToolParam {
            name: "add".into(),
            description: "Add two integers".into(),
            parameters: json!({
                "type": "object",
                "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
                "required": ["a", "b"]
            }),
        }
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        let a = args["a"].as_i64().unwrap_or(0);
        let b = args["b"].as_i64().unwrap_or(0);
        Ok(json!(a + b))
    }
}

// ===========================================================================
// Streaming runs
// ===========================================================================

#[tokio::test]
async fn openai_stream_with_tool_round_trip() {
    let (base, server) = serve(vec![
        sse(&[
            (None, r#"{"choices":[{"index":0,"delta":{"role":"assistant","tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"add","arguments":"{\"a\":1,"}}]}}]}"#),
            (None, r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"b\":2}"}}]}}]}"#),
            (None, r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#),
            (None, "[DONE]"),
        ]),
        sse(&[
            (None, r#"{"choices":[{"index":0,"delta":{"content":"The sum is "}}]}"#),
            (None, r#"{"choices":[{"index":0,"delta":{"content":"3."}}]}"#),
            (None, r#"{"choices":[],"usage":{"prompt_tokens":20,"completion_tokens":4,"total_tokens":24}}"#),
            (None, "[DONE]"),
        ]),
    ])
    .await;

    let client = OpenAiCompatible::new("sk-test", base, "test/model", ModelSettings::default());
    let options = RunOptions {
        tools: Some(ToolFunctions::new().register(Add)),
        ..Default::default()
    };
    let (tx, rx) = mpsc::channel(64);
    let events = tokio::spawn(collect(rx));

    let messages = vec![Message::system("be brief"), Message::user("1 + 2?")];
    let result = run_stream(&client, messages, &options, tx).await.unwrap();
    let events = events.await.unwrap();

    assert_eq!(result.last_content.as_deref(), Some("The sum is 3."));
    assert_eq!(result.usages.len(), 2);
    let new = result.new_messages(2);
    assert_eq!(new.len(), 3);
    assert_eq!(new[0].role, Role::Assistant);
    assert_eq!(new[1].role, Role::Tool);
    assert_eq!(new[1].text(), "3");
    assert_eq!(new[2].text(), "The sum is 3.");

    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::ToolCallStart { name, arguments } if name == "add" && arguments == r#"{"a":1,"b":2}"#
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::ToolCallResult { name, result } if name == "add" && result == "3"
    )));
    let content: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Content(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(content, "The sum is 3.");

    let requests = server.await.unwrap();
    let first = body_of(&requests[0]);
    assert_eq!(first["tools"][0]["function"]["name"], "add");
    assert_eq!(first["stream"], true);
    let second = body_of(&requests[1]);
    let sent = second["messages"].as_array().unwrap();
    assert_eq!(sent.len(), 4);
    assert_eq!(sent[3]["role"], "tool");
    assert_eq!(sent[3]["tool_call_id"], "call_1");
}

#[tokio::test]
async fn max_rounds_stops_a_tool_loop() {
    let round = sse(&[
        (None, r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_x","function":{"name":"add","arguments":"{\"a\":1,\"b\":1}"}}]}}]}"#),
        (None, "[DONE]"),
    ]);
    let (base, server) = serve(vec![round.clone(), round]).await;

    let client = OpenAiCompatible::new("sk-test", base, "test/model", ModelSettings::default());
    let options = RunOptions {
        tools: Some(ToolFunctions::new().register(Add)),
        max_rounds: 2,
        ..Default::default()
    };
    let (tx, rx) = mpsc::channel(64);
    let events = tokio::spawn(collect(rx));

    let result = run_stream(&client, vec![Message::user("loop")], &options, tx)
        .await
        .unwrap();
    events.await.unwrap();

    assert!(result.last_content.is_none());
    assert_eq!(server.await.unwrap().len(), 2);
}

#[tokio::test]
async fn claude_stream_reports_usage_once() {
    let (base, server) = serve(vec![sse(&[
        (Some("message_start"), r#"{"type":"message_start","message":{"id":"msg_1","type":"message","role":"assistant","content":[],"model":"claude-test","usage":{"input_tokens":12}}}"#),
        (Some("content_block_start"), r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#),
        (Some("content_block_delta"), r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Bonjour"}}"#),
        (Some("content_block_stop"), r#"{"type":"content_block_stop","index":0}"#),
        (Some("message_delta"), r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":3}}"#),
        (Some("message_stop"), r#"{"type":"message_stop"}"#),
    ])])
    .await;

    let client = ClaudeClient::new("sk-ant-test", Some(base), "claude-test", ModelSettings::default());
    let (tx, rx) = mpsc::channel(64);
    let events = tokio::spawn(collect(rx));

    let messages = vec![Message::system("translate"), Message::user("hello")];
    let result = run_stream(&client, messages, &RunOptions::default(), tx)
        .await
        .unwrap();
    let events = events.await.unwrap();

    assert_eq!(result.last_content.as_deref(), Some("Bonjour"));
    let usages: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Usage(u) => Some(u),
            _ => None,
        })
        .collect();
    assert_eq!(usages.len(), 1);
    assert_eq!((usages[0].prompt_tokens, usages[0].completion_tokens), (12, 3));

    let request = &server.await.unwrap()[0];
    assert!(request.starts_with("POST /v1/messages"));
    let body = body_of(request);
    assert_eq!(body["system"], "translate");
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn dropped_receiver_cancels_the_run() {
    let (base, _server) = serve(vec![sse(&[
        (None, r#"{"choices":[{"index":0,"delta":{"content":"a"}}]}"#),
        (None, r#"{"choices":[{"index":0,"delta":{"content":"b"}}]}"#),
        (None, "[DONE]"),
    ])])
    .await;

    let client = OpenAiCompatible::new("sk-test", base, "test/model", ModelSettings::default());
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let err = run_stream(&client, vec![Message::user("hi")], &RunOptions::default(), tx)
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::Cancelled));
}

#[tokio::test]
async fn non_streaming_run_returns_content() {
    let (base, _server) = serve(vec![json_ok(
        r#"{"model":"test/model","choices":[{"message":{"role":"assistant","content":"Paris"}}],"usage":{"prompt_tokens":4,"completion_tokens":1,"total_tokens":5}}"#,
    )])
    .await;

    let client = OpenAiCompatible::new("sk-test", base, "test/model", ModelSettings::default());
    let result = run(&client, vec![Message::user("Capital of France?")], &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(result.last_content.as_deref(), Some("Paris"));
    assert_eq!(result.usages[0].total_tokens, 5);
}

// ===========================================================================
// Model catalog
// ===========================================================================

#[tokio::test]
async fn catalog_refresh_merges_sources_and_caches() {
    let litellm = r#"{
        "sample_spec": {"mode": "chat"},
        "openai/gpt-5": {"litellm_provider": "openai", "mode": "chat", "supports_reasoning": true, "max_input_tokens": 400000}
    }"#;
    let (litellm_base, _a) = serve(vec![json_ok(litellm)]).await;
    let (models_dev_base, _b) = serve(vec![json_ok("{}")]).await;

    let dir = tempfile::tempdir().unwrap();
    let catalog = ModelCatalog::new(dir.path(), None)
        .with_sources(
            &format!("{litellm_base}/model_prices.json"),
            &format!("{models_dev_base}/api.json"),
        );
    catalog.load().await.unwrap();

    assert!(catalog.supports_reasoning("openai:gpt-5").await);
    assert!(!catalog.supports_vision("openai:gpt-5").await);
    assert!(!catalog.supports_reasoning("openai:unknown").await);
    assert!(catalog.cache_file().exists());

    // A second catalog reads the fresh cache without touching the network.
    let cached = ModelCatalog::new(dir.path(), None)
        .with_sources("http://127.0.0.1:9/none", "http://127.0.0.1:9/none");
    cached.load().await.unwrap();
    assert_eq!(cached.len().await, catalog.len().await);
}
