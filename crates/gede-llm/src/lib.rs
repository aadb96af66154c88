// LLM kit: provider-neutral message types, streaming chat clients, tool
// execution, the multi-round runner, model metadata and MCP servers.

pub mod claude;
pub mod client;
pub mod error;
pub mod events;
pub mod mcp;
pub mod models;
pub mod openai;
pub mod processor;
pub mod runner;
pub mod settings;
pub mod tools;
pub mod types;

#[cfg(test)]
mod testing;

pub use client::{ChatCompletion, ChunkStream, Request};
pub use error::LlmError;
pub use events::StreamEvent;
pub use settings::ModelSettings;
pub use types::{Chunk, Content, ContentBlock, Message, Response, Role, ToolCall, ToolParam, Usage};
