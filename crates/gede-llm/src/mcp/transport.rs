// JSON-RPC transports: newline-delimited stdio to a child process, and
// streamable HTTP (POST per message, JSON or SSE-framed replies).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{parse_rpc_response, McpError};

const SESSION_HEADER: &str = "mcp-session-id";

/// A bidirectional JSON-RPC channel to one server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the matching response's `result`.
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError>;

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError>;

    async fn close(&self);
}

fn request_envelope(id: u64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

fn notification_envelope(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "method": method, "params": params })
}

// ---------------------------------------------------------------------------
// Stdio
// ---------------------------------------------------------------------------

type Pending = Arc<StdMutex<HashMap<u64, oneshot::Sender<Result<Value, McpError>>>>>;

pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pending: Pending,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    timeout: Duration,
}

impl StdioTransport {
    /// Launch `command` with piped stdio. Stderr is discarded so the server
    /// can't scribble over the chat output.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, McpError> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or(McpError::Closed)?;
        let stdout = child.stdout.take().ok_or(McpError::Closed)?;

        let pending: Pending = Arc::new(StdMutex::new(HashMap::new()));
        let reader_pending = Arc::clone(&pending);
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => dispatch_line(&line, &reader_pending),
                    Ok(None) => break,
                    Err(e) => {
                        warn!("MCP stdout read error: {e}");
                        break;
                    }
                }
            }
            // Fail every caller still waiting.
            if let Ok(mut map) = reader_pending.lock() {
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(McpError::Closed));
                }
            }
        });

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            reader,
            timeout,
        })
    }

    async fn write_message(&self, message: &Value) -> Result<(), McpError> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }
}

/// Route one line of server output to the request waiting on its id.
fn dispatch_line(line: &str, pending: &Pending) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let message: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => {
            debug!("ignoring non-JSON MCP output: {line}");
            return;
        }
    };

    let is_response = message.get("result").is_some() || message.get("error").is_some();
    let id = message.get("id").and_then(Value::as_u64);
    match (is_response, id) {
        (true, Some(id)) => {
            let waiter = pending.lock().ok().and_then(|mut map| map.remove(&id));
            match waiter {
                Some(tx) => {
                    let _ = tx.send(parse_rpc_response(message));
                }
                None => debug!(id, "response for unknown MCP request"),
            }
        }
        _ => debug!("ignoring MCP server message: {line}"),
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        if let Ok(mut map) = self.pending.lock() {
            map.insert(id, tx);
        }

        if let Err(e) = self.write_message(&request_envelope(id, method, params)).await {
            if let Ok(mut map) = self.pending.lock() {
                map.remove(&id);
            }
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(McpError::Closed),
            Err(_) => {
                if let Ok(mut map) = self.pending.lock() {
                    map.remove(&id);
                }
                Err(McpError::Timeout(method.to_string()))
            }
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        self.write_message(&notification_envelope(method, params)).await
    }

    async fn close(&self) {
        self.reader.abort();
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            debug!("MCP child already exited: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Streamable HTTP
// ---------------------------------------------------------------------------

pub struct HttpTransport {
    http: reqwest::Client,
    url: String,
    headers: HeaderMap,
    session_id: StdMutex<Option<String>>,
    next_id: AtomicU64,
    terminate_on_close: bool,
}

impl HttpTransport {
    pub fn new(
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
        terminate_on_close: bool,
    ) -> Result<Self, McpError> {
        let mut header_map = HeaderMap::new();
        for (k, v) in headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| McpError::Config(format!("invalid header name {k}: {e}")))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| McpError::Config(format!("invalid header value for {k}: {e}")))?;
            header_map.insert(name, value);
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.to_string(),
            headers: header_map,
            session_id: StdMutex::new(None),
            next_id: AtomicU64::new(1),
            terminate_on_close,
        })
    }

    fn current_session(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|s| s.clone())
    }

    async fn post(&self, message: &Value) -> Result<reqwest::Response, McpError> {
        let mut request = self
            .http
            .post(&self.url)
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .json(message);
        if let Some(session) = self.current_session() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Status { status, body });
        }

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut slot) = self.session_id.lock() {
                *slot = Some(session.to_string());
            }
        }
        Ok(response)
    }
}

/// Find the JSON-RPC response with `id` inside an SSE-framed body.
pub(crate) fn find_sse_response(body: &str, id: u64) -> Option<Value> {
    let mut data = String::new();
    let mut found = None;
    let mut flush = |data: &mut String| {
        if data.is_empty() {
            return;
        }
        if let Ok(v) = serde_json::from_str::<Value>(data) {
            if found.is_none() && v.get("id").and_then(Value::as_u64) == Some(id) {
                found = Some(v);
            }
        }
        data.clear();
    };

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            flush(&mut data);
        } else if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    flush(&mut data);
    found
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let response = self.post(&request_envelope(id, method, params)).await?;

        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let body = response.text().await?;

        let message = if is_sse {
            find_sse_response(&body, id).ok_or(McpError::Closed)?
        } else {
            serde_json::from_str(&body)?
        };
        parse_rpc_response(message)
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        self.post(&notification_envelope(method, params)).await?;
        Ok(())
    }

    async fn close(&self) {
        if !self.terminate_on_close {
            return;
        }
        let Some(session) = self.current_session() else {
            return;
        };
        let result = self
            .http
            .delete(&self.url)
            .headers(self.headers.clone())
            .header(SESSION_HEADER, session)
            .send()
            .await;
        if let Err(e) = result {
            debug!("failed to terminate MCP session: {e}");
        }
    }
}
