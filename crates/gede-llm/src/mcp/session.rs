// An initialized MCP client session over any transport.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::transport::Transport;
use super::{CallToolResult, McpError, McpServer, McpTool, PROTOCOL_VERSION};

pub struct McpSession {
    name: String,
    transport: Box<dyn Transport>,
    tools_cache: Mutex<Option<Vec<McpTool>>>,
}

impl std::fmt::Debug for McpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpSession").field("name", &self.name).finish()
    }
}

impl McpSession {
    /// Run the `initialize` handshake and return a ready session.
    pub async fn initialize(name: &str, transport: Box<dyn Transport>) -> Result<Self, McpError> {
        let result = transport
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "gede", "version": env!("CARGO_PKG_VERSION") }
                }),
            )
            .await;
        let result = match result {
            Ok(r) => r,
            Err(e) => {
                transport.close().await;
                return Err(e);
            }
        };

        let server_name = result
            .get("serverInfo")
            .and_then(|s| s.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(server = name, remote = server_name, "MCP session initialized");

        transport
            .notify("notifications/initialized", json!({}))
            .await?;

        Ok(Self {
            name: name.to_string(),
            transport,
            tools_cache: Mutex::new(None),
        })
    }
}

#[async_trait]
impl McpServer for McpSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self, force_refresh: bool) -> Result<Vec<McpTool>, McpError> {
        let mut cache = self.tools_cache.lock().await;
        if !force_refresh {
            if let Some(tools) = cache.as_ref() {
                return Ok(tools.clone());
            }
        }

        let result = self.transport.request("tools/list", json!({})).await?;
        let tools: Vec<McpTool> = match result.get("tools") {
            Some(list) => serde_json::from_value(list.clone())?,
            None => Vec::new(),
        };
        debug!(server = %self.name, count = tools.len(), "listed MCP tools");
        *cache = Some(tools.clone());
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        let result = self
            .transport
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn shutdown(&self) {
        debug!(server = %self.name, "closing MCP session");
        self.transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Scripted transport that records requests and answers by method.
    struct FakeTransport {
        calls: std::sync::Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
            self.calls.lock().unwrap().push(method.to_string());
            match method {
                "initialize" => Ok(json!({"serverInfo": {"name": "fake"}})),
                "tools/list" => Ok(json!({"tools": [{"name": "echo", "description": "Echo"}]})),
                "tools/call" => Ok(json!({
                    "content": [{"type": "text", "text": params["arguments"]["text"]}]
                })),
                other => Err(McpError::Rpc {
                    code: -32601,
                    message: format!("no method {other}"),
                }),
            }
        }

        async fn notify(&self, method: &str, _params: Value) -> Result<(), McpError> {
            self.calls.lock().unwrap().push(method.to_string());
            Ok(())
        }

        async fn close(&self) {
            self.calls.lock().unwrap().push("close".to_string());
        }
    }

    fn fake() -> (Box<dyn Transport>, std::sync::Arc<StdMutex<Vec<String>>>) {
        let calls = std::sync::Arc::new(StdMutex::new(Vec::new()));
        (
            Box::new(FakeTransport {
                calls: calls.clone(),
            }),
            calls,
        )
    }

    #[tokio::test]
    async fn initialize_sends_handshake_then_notification() {
        let (transport, calls) = fake();
        let session = McpSession::initialize("files", transport).await.unwrap();
        assert_eq!(session.name(), "files");
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["initialize".to_string(), "notifications/initialized".to_string()]
        );
    }

    #[tokio::test]
    async fn tool_list_is_cached_until_forced() {
        let (transport, calls) = fake();
        let session = McpSession::initialize("files", transport).await.unwrap();

        let tools = session.list_tools(false).await.unwrap();
        assert_eq!(tools[0].name, "echo");
        session.list_tools(false).await.unwrap();
        session.list_tools(true).await.unwrap();

        let lists = calls
            .lock()
            .unwrap()
            .iter()
            .filter(|m| *m == "tools/list")
            .count();
        assert_eq!(lists, 2);
    }

    #[tokio::test]
    async fn call_tool_decodes_result() {
        let (transport, calls) = fake();
        let session = McpSession::initialize("files", transport).await.unwrap();
        let result = session
            .call_tool("echo", json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(result.content[0]["text"], "hi");
        assert!(!result.is_error);

        session.shutdown().await;
        assert_eq!(calls.lock().unwrap().last().map(String::as_str), Some("close"));
    }
}
