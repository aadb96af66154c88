// Multi-round completion loop: call the model, run requested tools, feed the
// results back, and stop once a round makes no tool calls.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::client::{ChatCompletion, Request};
use crate::error::LlmError;
use crate::events::StreamEvent;
use crate::mcp::McpServers;
use crate::processor::StreamProcessor;
use crate::tools::{ToolExecutor, ToolFunctions};
use crate::types::{Content, Message, ResponseFormat, Role, Usage};

pub const DEFAULT_MAX_ROUNDS: usize = 10;

/// Tools, servers and limits for a run.
#[derive(Clone)]
pub struct RunOptions {
    pub tools: Option<ToolFunctions>,
    pub mcp_servers: Option<McpServers>,
    pub max_rounds: usize,
    pub response_format: Option<ResponseFormat>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            tools: None,
            mcp_servers: None,
            max_rounds: DEFAULT_MAX_ROUNDS,
            response_format: None,
        }
    }
}

impl RunOptions {
    fn request<'a>(&'a self, messages: &'a [Message]) -> Request<'a> {
        Request::new(messages)
            .with_tools(self.tools.as_ref())
            .with_mcp_servers(self.mcp_servers.as_ref())
            .with_response_format(self.response_format.as_ref())
    }

    fn executor(&self) -> ToolExecutor {
        ToolExecutor::new(self.tools.clone(), self.mcp_servers.clone())
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone, Default)]
pub struct CompletionResult {
    /// Content of the final round; `None` when the round limit was hit while
    /// the model was still calling tools.
    pub last_content: Option<String>,
    pub usages: Vec<Usage>,
    /// The input history plus every assistant and tool message produced.
    pub messages: Vec<Message>,
}

impl CompletionResult {
    /// Parse the final content as JSON.
    pub fn output_value(&self) -> Option<Value> {
        self.output()
    }

    /// Parse the final content into a structured-output type.
    pub fn output<T: DeserializeOwned>(&self) -> Option<T> {
        let content = self.last_content.as_deref().filter(|c| !c.is_empty())?;
        match serde_json::from_str(content) {
            Ok(v) => Some(v),
            Err(e) => {
                error!("error parsing structured output: {e}");
                None
            }
        }
    }

    /// Messages added by the run, after the input history.
    pub fn new_messages(&self, input_len: usize) -> &[Message] {
        self.messages.get(input_len..).unwrap_or_default()
    }
}

/// Streaming run. Events go to `tx`; dropping the receiver cancels the run
/// with [`LlmError::Cancelled`].
pub async fn run_stream(
    client: &dyn ChatCompletion,
    messages: Vec<Message>,
    options: &RunOptions,
    tx: mpsc::Sender<StreamEvent>,
) -> Result<CompletionResult, LlmError> {
    let executor = options.executor();
    let mut result = CompletionResult {
        messages,
        ..Default::default()
    };

    for round in 0..options.max_rounds {
        info!(round, model = client.model(), "completion round");
        let stream = client.create_stream(options.request(&result.messages)).await?;

        let mut processor = StreamProcessor::new(&executor, &tx);
        processor.process(stream, &mut result.messages).await?;

        if let Some(usage) = processor.usage.take() {
            result.usages.push(usage);
        }
        if processor.tool_calls.is_empty() {
            result.last_content = Some(std::mem::take(&mut processor.content));
            break;
        }
    }
    Ok(result)
}

/// Non-streaming run.
pub async fn run(
    client: &dyn ChatCompletion,
    messages: Vec<Message>,
    options: &RunOptions,
) -> Result<CompletionResult, LlmError> {
    let executor = options.executor();
    let mut result = CompletionResult {
        messages,
        ..Default::default()
    };

    for round in 0..options.max_rounds {
        info!(round, model = client.model(), "completion round");
        let response = client.create(options.request(&result.messages)).await?;

        if let Some(usage) = response.usage {
            result.usages.push(usage);
        }
        let tool_calls = response.tool_calls.filter(|c| !c.is_empty());
        result.messages.push(Message {
            role: Role::Assistant,
            content: response.content.clone().map(Content::Text),
            tool_calls: tool_calls.clone(),
            tool_call_id: None,
            reasoning_content: response.reasoning_content,
            vendor_metadata: response.vendor_metadata,
        });

        let Some(tool_calls) = tool_calls else {
            result.last_content = response.content;
            break;
        };
        for call in &tool_calls {
            let (output, _) = executor.execute(call).await;
            result.messages.push(Message::tool_result(call.id.clone(), output));
        }
    }
    Ok(result)
}
