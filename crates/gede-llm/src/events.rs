// Events emitted by the streaming runner for the UI to render.

use crate::types::Usage;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A fragment of the answer text.
    Content(String),
    /// A fragment of the model's reasoning/thinking text.
    Reasoning(String),
    /// A tool is about to be executed.
    ToolCallStart { name: String, arguments: String },
    /// A tool finished; `result` is the text sent back to the model.
    ToolCallResult { name: String, result: String },
    /// Token accounting reported by the provider.
    Usage(Usage),
}

impl StreamEvent {
    /// Stable discriminator used to detect section changes while rendering.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Content(_) => "content",
            StreamEvent::Reasoning(_) => "reasoning_content",
            StreamEvent::ToolCallStart { .. } => "tool_call_start",
            StreamEvent::ToolCallResult { .. } => "tool_call_result",
            StreamEvent::Usage(_) => "usage",
        }
    }
}
