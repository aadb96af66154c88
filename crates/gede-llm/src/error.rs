// Error type shared by the chat clients, processor and runner.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API key not configured")]
    MissingApiKey,

    #[error("API returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("MCP error: {0}")]
    Mcp(#[from] crate::mcp::McpError),

    /// The event receiver went away mid-run.
    #[error("request cancelled")]
    Cancelled,
}

impl LlmError {
    /// Build a `Status` error from a non-success HTTP response body, pulling
    /// `error.message` out of the JSON envelope when the API sent one.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .and_then(|e| e.get("message").or(Some(e)))
                    .and_then(|m| m.as_str().map(str::to_string))
            })
            .unwrap_or_else(|| body.trim().to_string());
        LlmError::Status { status, message }
    }
}

/// Translate an event-source failure into an `LlmError`.
///
/// Invalid status responses are mapped to `Status` with the body text
/// consumed so the user sees the provider's own error message.
pub(crate) async fn from_eventsource(err: reqwest_eventsource::Error) -> LlmError {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            LlmError::from_status(status.as_u16(), &body)
        }
        reqwest_eventsource::Error::Transport(e) => LlmError::Http(e),
        other => LlmError::Stream(other.to_string()),
    }
}
