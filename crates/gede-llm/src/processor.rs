// Consumes one round's chunk stream: forwards events to the UI channel,
// records the assistant message, then executes any requested tools.

use futures_util::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::client::ChunkStream;
use crate::error::LlmError;
use crate::events::StreamEvent;
use crate::tools::ToolExecutor;
use crate::types::{Content, Message, Role, ToolCall, Usage};

pub struct StreamProcessor<'a> {
    executor: &'a ToolExecutor,
    tx: &'a mpsc::Sender<StreamEvent>,
    pub content: String,
    pub reasoning_content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub vendor_metadata: Option<Map<String, Value>>,
}

impl<'a> StreamProcessor<'a> {
    pub fn new(executor: &'a ToolExecutor, tx: &'a mpsc::Sender<StreamEvent>) -> Self {
        Self {
            executor,
            tx,
            content: String::new(),
            reasoning_content: String::new(),
            tool_calls: Vec::new(),
            usage: None,
            vendor_metadata: None,
        }
    }

    async fn emit(&self, event: StreamEvent) -> Result<(), LlmError> {
        self.tx.send(event).await.map_err(|_| LlmError::Cancelled)
    }

    /// Process the whole round, appending the assistant message and one tool
    /// message per executed call to `messages`.
    pub async fn process(
        &mut self,
        stream: ChunkStream,
        messages: &mut Vec<Message>,
    ) -> Result<(), LlmError> {
        self.consume(stream).await?;
        messages.push(self.assistant_message());
        self.run_tools(messages).await
    }

    async fn consume(&mut self, mut stream: ChunkStream) -> Result<(), LlmError> {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            debug!(?chunk, "chunk");

            if let Some(usage) = chunk.usage {
                self.usage = Some(usage.clone());
                self.emit(StreamEvent::Usage(usage)).await?;
            }
            if let Some(reasoning) = chunk.reasoning_content.filter(|r| !r.is_empty()) {
                self.reasoning_content.push_str(&reasoning);
                self.emit(StreamEvent::Reasoning(reasoning)).await?;
            }
            if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                self.content.push_str(&content);
                self.emit(StreamEvent::Content(content)).await?;
            }
            // Each snapshot carries every call so far.
            if let Some(calls) = chunk.tool_calls.filter(|c| !c.is_empty()) {
                self.tool_calls = calls;
            }
            if chunk.vendor_metadata.is_some() {
                self.vendor_metadata = chunk.vendor_metadata;
            }
        }

        for call in &mut self.tool_calls {
            if call.arguments.trim().is_empty() {
                call.arguments = "{}".to_string();
            }
        }
        Ok(())
    }

    fn assistant_message(&self) -> Message {
        Message {
            role: Role::Assistant,
            content: Some(self.content.clone())
                .filter(|c| !c.is_empty())
                .map(Content::Text),
            tool_calls: Some(self.tool_calls.clone()).filter(|c| !c.is_empty()),
            tool_call_id: None,
            reasoning_content: Some(self.reasoning_content.clone()).filter(|r| !r.is_empty()),
            vendor_metadata: self.vendor_metadata.clone(),
        }
    }

    async fn run_tools(&self, messages: &mut Vec<Message>) -> Result<(), LlmError> {
        for call in &self.tool_calls {
            self.emit(StreamEvent::ToolCallStart {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            })
            .await?;

            let (result, _) = self.executor.execute(call).await;

            self.emit(StreamEvent::ToolCallResult {
                name: call.name.clone(),
                result: result.clone(),
            })
            .await?;
            messages.push(Message::tool_result(call.id.clone(), result));
        }
        Ok(())
    }
}
