// Builtin tool registry and the executor that dispatches model tool calls to
// builtin tools or MCP servers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info};

use crate::mcp::McpServers;
use crate::types::{ToolCall, ToolParam};

const MCP_PREFIX: &str = "_mcp_";

/// A function the model may call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn param(&self) -> ToolParam;

    async fn call(&self, args: Value) -> anyhow::Result<Value>;
}

/// Ordered set of builtin tools.
#[derive(Clone, Default)]
pub struct ToolFunctions {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool; a later tool with the same name shadows the earlier one.
    pub fn register(mut self, tool: impl Tool + 'static) -> Self {
        let name = tool.param().name;
        self.tools.retain(|t| t.param().name != name);
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn params(&self) -> Vec<ToolParam> {
        self.tools.iter().map(|t| t.param()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.param().name == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.param().name).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolFunctions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

// ---------------------------------------------------------------------------
// MCP tool naming
// ---------------------------------------------------------------------------

/// Name under which an MCP tool is advertised to the model.
pub fn mcp_tool_name(server: &str, tool: &str) -> String {
    format!("{MCP_PREFIX}{server}_{tool}")
}

/// Split an advertised MCP tool name back into `(server, tool)`.
///
/// The server name must not contain `_`; the tool name may.
pub fn parse_mcp_tool_name(name: &str) -> Option<(&str, &str)> {
    let parts: Vec<&str> = name
        .splitn(4, '_')
        .filter(|p| !p.trim().is_empty())
        .collect();
    match parts.as_slice() {
        [_, server, tool] => Some((*server, *tool)),
        _ => None,
    }
}

/// Tool definitions for every tool of every connected MCP server.
/// Servers that fail to list are logged and skipped.
pub async fn mcp_tool_params(servers: &McpServers) -> Vec<ToolParam> {
    let mut params = Vec::new();
    for (server_name, server) in servers {
        match server.list_tools(false).await {
            Ok(tools) => params.extend(tools.into_iter().map(|t| ToolParam {
                name: mcp_tool_name(server_name, &t.name),
                description: t.description.unwrap_or_default(),
                parameters: t.input_schema,
            })),
            Err(e) => error!(server = %server_name, "failed to list MCP tools: {e}"),
        }
    }
    params
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs tool calls. Failures are reported as text for the model and never
/// abort a run.
#[derive(Clone, Default)]
pub struct ToolExecutor {
    tools: Option<ToolFunctions>,
    mcp_servers: Option<McpServers>,
}

impl ToolExecutor {
    pub fn new(tools: Option<ToolFunctions>, mcp_servers: Option<McpServers>) -> Self {
        Self { tools, mcp_servers }
    }

    /// Execute one call. Returns the text to send back to the model and,
    /// on failure, the error description.
    pub async fn execute(&self, call: &ToolCall) -> (String, Option<String>) {
        let arguments = if call.arguments.trim().is_empty() {
            "{}"
        } else {
            call.arguments.as_str()
        };

        if call.name.starts_with(MCP_PREFIX) {
            self.execute_mcp(&call.name, arguments).await
        } else {
            self.execute_builtin(&call.name, arguments).await
        }
    }

    async fn execute_mcp(&self, function_name: &str, arguments: &str) -> (String, Option<String>) {
        let Some((server_name, tool_name)) = parse_mcp_tool_name(function_name) else {
            return failure(format!("Invalid MCP tool name: {function_name}"));
        };
        info!(server = server_name, tool = tool_name, "calling MCP tool");

        let Some(server) = self
            .mcp_servers
            .as_ref()
            .and_then(|servers| servers.get(server_name))
        else {
            return failure(format!("MCP Server {server_name} not found"));
        };

        let args: Value = match serde_json::from_str(arguments) {
            Ok(v) => v,
            Err(e) => return failure(format!("Error calling MCP tool {tool_name}: {e}")),
        };
        match server.call_tool(tool_name, args).await {
            Ok(result) => match serde_json::to_string(&result) {
                Ok(text) => (text, None),
                Err(e) => failure(format!("Error calling MCP tool {tool_name}: {e}")),
            },
            Err(e) => failure(format!("Error calling MCP tool {tool_name}: {e}")),
        }
    }

    async fn execute_builtin(&self, function_name: &str, arguments: &str) -> (String, Option<String>) {
        let Some(tool) = self.tools.as_ref().and_then(|t| t.get(function_name)) else {
            let message = format!("Tool {function_name} not found");
            return (format!("Error: {message}"), Some(message));
        };

        info!(tool = function_name, "executing tool");
        let args: Value = match serde_json::from_str(arguments) {
            Ok(v) => v,
            Err(e) => return builtin_failure(function_name, e.to_string()),
        };
        match tool.call(args).await {
            Ok(Value::String(s)) => (s, None),
            Ok(other) => (other.to_string(), None),
            Err(e) => builtin_failure(function_name, e.to_string()),
        }
    }
}

fn failure(message: String) -> (String, Option<String>) {
    error!("{message}");
    (format!("Error: {message}"), Some(message))
}

fn builtin_failure(function_name: &str, cause: String) -> (String, Option<String>) {
    let message = format!("Error executing {function_name}: {cause}");
    error!("{message}");
    (format!("Error: {cause}"), Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::{CallToolResult, McpError, McpServer, McpTool};
    use serde_json::json;
    use std::collections::BTreeMap;

    struct Add;

    #[async_trait]
    impl Tool for Add {
        fn param(&self) -> ToolParam {
            ToolParam {
                name: "add".into(),
                description: "Add two numbers".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                    "required": ["a", "b"]
                }),
            }
        }

        async fn call(&self, args: Value) -> anyhow::Result<Value> {
            let a = args["a"].as_f64().ok_or_else(|| anyhow::anyhow!("a is required"))?;
            let b = args["b"].as_f64().ok_or_else(|| anyhow::anyhow!("b is required"))?;
            Ok(json!({"sum": a + b}))
        }
    }

    struct Hello;

    #[async_trait]
    impl Tool for Hello {
        fn param(&self) -> ToolParam {
            ToolParam {
                name: "hello".into(),
                description: String::new(),
                parameters: json!({"type": "object", "properties": {}}),
            }
        }

        async fn call(&self, _args: Value) -> anyhow::Result<Value> {
            Ok(Value::String("hi there".into()))
        }
    }

    struct Echo;

    #[async_trait]
    impl McpServer for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        async fn list_tools(&self, _force: bool) -> Result<Vec<McpTool>, McpError> {
            Ok(vec![McpTool {
                name: "say_it".into(),
                description: Some("Say it back".into()),
                input_schema: json!({"type": "object"}),
            }])
        }
        async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
            Ok(CallToolResult {
                content: vec![json!({"type": "text", "text": format!("{name}:{arguments}")})],
                ..Default::default()
            })
        }
        async fn shutdown(&self) {}
    }

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments: arguments.into(),
            extra_content: None,
        }
    }

    fn servers() -> McpServers {
        let mut map: McpServers = BTreeMap::new();
        map.insert("echo".into(), Arc::new(Echo));
        map
    }

    // -- Naming --

    #[test]
    fn mcp_names_round_trip_with_underscored_tool() {
        let name = mcp_tool_name("fs", "read_file");
        assert_eq!(name, "_mcp_fs_read_file");
        assert_eq!(parse_mcp_tool_name(&name), Some(("fs", "read_file")));
    }

    #[test]
    fn malformed_mcp_names_are_rejected() {
        assert_eq!(parse_mcp_tool_name("_mcp_only"), None);
        assert_eq!(parse_mcp_tool_name("_mcp__"), None);
    }

    // -- Registry --

    #[test]
    fn registry_keeps_order_and_replaces_duplicates() {
        let tools = ToolFunctions::new().register(Add).register(Hello).register(Add);
        assert_eq!(tools.names(), vec!["hello", "add"]);
        assert!(tools.get("add").is_some());
        assert!(tools.get("nope").is_none());
    }

    // -- Executor --

    #[tokio::test]
    async fn builtin_result_is_json_encoded() {
        let exec = ToolExecutor::new(Some(ToolFunctions::new().register(Add)), None);
        let (text, err) = exec.execute(&call("add", r#"{"a":1,"b":2}"#)).await;
        assert_eq!(text, r#"{"sum":3.0}"#);
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn string_result_is_passed_through_and_empty_args_allowed() {
        let exec = ToolExecutor::new(Some(ToolFunctions::new().register(Hello)), None);
        let (text, err) = exec.execute(&call("hello", "  ")).await;
        assert_eq!(text, "hi there");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn missing_tool_is_reported() {
        let exec = ToolExecutor::default();
        let (text, err) = exec.execute(&call("ghost", "{}")).await;
        assert_eq!(text, "Error: Tool ghost not found");
        assert_eq!(err.as_deref(), Some("Tool ghost not found"));
    }

    #[tokio::test]
    async fn tool_failure_does_not_panic() {
        let exec = ToolExecutor::new(Some(ToolFunctions::new().register(Add)), None);
        let (text, err) = exec.execute(&call("add", r#"{"a":1}"#)).await;
        assert_eq!(text, "Error: b is required");
        assert_eq!(err.as_deref(), Some("Error executing add: b is required"));
    }

    #[tokio::test]
    async fn mcp_call_is_routed_to_server() {
        let exec = ToolExecutor::new(None, Some(servers()));
        let (text, err) = exec.execute(&call("_mcp_echo_say_it", r#"{"x":1}"#)).await;
        assert!(err.is_none());
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["content"][0]["text"], r#"say_it:{"x":1}"#);
    }

    #[tokio::test]
    async fn unknown_mcp_server_is_reported() {
        let exec = ToolExecutor::new(None, Some(servers()));
        let (text, _) = exec.execute(&call("_mcp_web_fetch", "{}")).await;
        assert_eq!(text, "Error: MCP Server web not found");
    }

    #[tokio::test]
    async fn mcp_params_are_prefixed() {
        let params = mcp_tool_params(&servers()).await;
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "_mcp_echo_say_it");
        assert_eq!(params[0].description, "Say it back");
    }
}
