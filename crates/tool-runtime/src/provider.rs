use crate::conversation::{AssistantContent, Message};
use crate::tool::ToolDefinition;
use async_trait::async_trait;
use maidx_core::config::LlmConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sampling parameters forwarded with every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub model: String,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub max_tokens: u32,
}

impl ModelParams {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
        }
    }
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            top_p: None,
            max_tokens: 4096,
        }
    }
}

/// One chat-completions round-trip: full history plus the tools on offer.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub params: ModelParams,
}

/// Trait for LLM endpoints that support tool calling.
///
/// Lives in tool-runtime (not in crates/llm) because it's defined by the
/// consumer, the conversation engine. Implementations live in crates/llm.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send the conversation and return the next assistant message.
    async fn complete(&self, request: ChatRequest) -> Result<AssistantContent, LlmError>;

    /// Provider name for logging/debugging (e.g., "openai", "ollama")
    fn provider_name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("Authentication failed")]
    AuthError,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LlmError {
    /// Network faults, timeouts, rate limits and server-side errors may
    /// succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError(_) | Self::Timeout(_) | Self::RateLimited { .. } => true,
            Self::ApiError { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse(_) | Self::AuthError | Self::Other(_) => false,
        }
    }

    /// Server-requested wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }
}

/// Scripted client for testing the engine and scheduler without a network.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use crate::tool::ToolCall;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type Responder = dyn Fn(&ChatRequest) -> Result<AssistantContent, LlmError> + Send + Sync;

    enum Script {
        Queue(Mutex<VecDeque<Result<AssistantContent, LlmError>>>),
        Func(Box<Responder>),
    }

    /// Returns canned replies in FIFO order (or computes them with a
    /// closure) and records every request it receives.
    pub struct ScriptedLlmClient {
        script: Script,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedLlmClient {
        pub fn new() -> Self {
            Self {
                script: Script::Queue(Mutex::new(VecDeque::new())),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Compute each reply from the incoming request.
        pub fn from_fn(
            f: impl Fn(&ChatRequest) -> Result<AssistantContent, LlmError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                script: Script::Func(Box::new(f)),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn push(self, reply: Result<AssistantContent, LlmError>) -> Self {
            if let Script::Queue(queue) = &self.script {
                queue.lock().unwrap().push_back(reply);
            }
            self
        }

        pub fn then_text(self, text: &str) -> Self {
            self.push(Ok(AssistantContent::text(text)))
        }

        pub fn then_tool_call(self, id: &str, name: &str, input: serde_json::Value) -> Self {
            self.push(Ok(AssistantContent::tool_calls(vec![ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                input,
            }])))
        }

        pub fn then_error(self, error: LlmError) -> Self {
            self.push(Err(error))
        }

        pub fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl Default for ScriptedLlmClient {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlmClient {
        async fn complete(&self, request: ChatRequest) -> Result<AssistantContent, LlmError> {
            let reply = match &self.script {
                Script::Queue(queue) => queue.lock().unwrap().pop_front().unwrap_or_else(|| {
                    Err(LlmError::InvalidResponse("script exhausted".to_string()))
                }),
                Script::Func(f) => f(&request),
            };
            self.requests.lock().unwrap().push(request);
            reply
        }

        fn provider_name(&self) -> &str {
            "scripted"
        }
    }
}
