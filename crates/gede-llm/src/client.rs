// Chat completion abstraction shared by every provider client.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::LlmError;
use crate::mcp::McpServers;
use crate::tools::{mcp_tool_params, ToolFunctions};
use crate::types::{Chunk, Message, Response, ResponseFormat, ToolParam};

/// Stream of converted chunks for one model round.
pub type ChunkStream = BoxStream<'static, Result<Chunk, LlmError>>;

/// Inputs for a single completion call.
#[derive(Clone, Copy)]
pub struct Request<'a> {
    pub messages: &'a [Message],
    pub tools: Option<&'a ToolFunctions>,
    pub mcp_servers: Option<&'a McpServers>,
    pub response_format: Option<&'a ResponseFormat>,
}

impl<'a> Request<'a> {
    pub fn new(messages: &'a [Message]) -> Self {
        Self {
            messages,
            tools: None,
            mcp_servers: None,
            response_format: None,
        }
    }

    pub fn with_tools(mut self, tools: Option<&'a ToolFunctions>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_mcp_servers(mut self, servers: Option<&'a McpServers>) -> Self {
        self.mcp_servers = servers;
        self
    }

    pub fn with_response_format(mut self, format: Option<&'a ResponseFormat>) -> Self {
        self.response_format = format;
        self
    }

    /// Builtin tool definitions followed by every MCP server's tools.
    pub async fn tool_params(&self) -> Vec<ToolParam> {
        let mut params = self.tools.map(ToolFunctions::params).unwrap_or_default();
        if let Some(servers) = self.mcp_servers {
            params.extend(mcp_tool_params(servers).await);
        }
        params
    }
}

/// A provider-specific chat client speaking the unified types.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Model identifier sent to the provider.
    fn model(&self) -> &str;

    /// Start a streaming completion.
    async fn create_stream(&self, request: Request<'_>) -> Result<ChunkStream, LlmError>;

    /// Run a non-streaming completion.
    async fn create(&self, request: Request<'_>) -> Result<Response, LlmError>;
}
