//! OpenAI-compatible implementation of [`LlmClient`](maidx_tool_runtime::LlmClient).
//!
//! Works against api.openai.com and any endpoint speaking the same
//! chat-completions shape (vLLM, Ollama, LM Studio, gateways).

mod client;
mod translate;

pub use self::client::{completions_url, OpenAiClient};

#[cfg(test)]
mod tests;
