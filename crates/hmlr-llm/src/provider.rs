use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single message in the conversation sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Request to a chat model. The caller selects the tier by choosing the
/// model id (`default` for response generation, `governor` for routing,
/// filtering, and metadata synthesis).
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatRequest {
    /// Single-user-message request, the common shape for governor subtasks.
    pub fn single(model: &str, system: &str, content: &str, max_tokens: u32) -> Self {
        Self {
            model: model.to_string(),
            system: system.to_string(),
            messages: vec![Message {
                role: Role::User,
                content: content.to_string(),
            }],
            max_tokens,
            temperature: 0.0,
        }
    }
}

/// Non-streaming response from a chat model.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
}

/// Common interface for chat model providers.
#[async_trait]
pub trait ChatLlm: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send a chat request and wait for the full response.
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, LlmError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

impl LlmError {
    /// Whether the retry wrapper may re-issue the same request.
    /// Auth/quota failures (4xx other than 429) are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http(_) | LlmError::Timeout { .. } | LlmError::Unavailable(_) => true,
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::RateLimited { .. } | LlmError::Parse(_) => false,
        }
    }
}
