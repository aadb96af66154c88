// Model Context Protocol client.
//
// Servers are described in a JSON config file (`config`), reached over a
// child process's stdio or over streamable HTTP (`transport`), and exposed to
// the rest of the kit through the `McpServer` trait (`session`).

pub mod config;
pub mod session;
pub mod transport;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use config::{McpManager, ServerConfig, TransportType};
pub use session::McpSession;

/// JSON-RPC protocol revision announced during `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum McpError {
    #[error("invalid MCP config: {0}")]
    Config(String),

    #[error("transport `{0}` is not supported")]
    UnsupportedTransport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("server error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("connection to MCP server closed")]
    Closed,

    #[error("MCP request `{0}` timed out")]
    Timeout(String),
}

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

/// A tool advertised by a server via `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Result of `tools/call`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(rename = "structuredContent", default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

/// A connected MCP server.
#[async_trait]
pub trait McpServer: Send + Sync {
    fn name(&self) -> &str;

    /// List the server's tools. Results are cached until `force_refresh`.
    async fn list_tools(&self, force_refresh: bool) -> Result<Vec<McpTool>, McpError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError>;

    /// Close the connection and release the child process, if any.
    async fn shutdown(&self);
}

/// Connected servers keyed by configured name.
pub type McpServers = BTreeMap<String, Arc<dyn McpServer>>;

/// Extract the `result` of a JSON-RPC response, mapping `error` objects.
pub(crate) fn parse_rpc_response(response: Value) -> Result<Value, McpError> {
    if let Some(err) = response.get("error") {
        return Err(McpError::Rpc {
            code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        });
    }
    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}
