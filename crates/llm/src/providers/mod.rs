pub mod openai;

use std::sync::Arc;

use maidx_core::config::LlmConfig;
use maidx_tool_runtime::provider::{LlmClient, LlmError};
use tracing::warn;

/// Create the LLM client for the configured endpoint.
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    if !config.is_configured() {
        warn!(url = %config.base_url, "No LLM_KEY set for a hosted endpoint; requests will likely be rejected");
    }
    Ok(Arc::new(openai::OpenAiClient::new(config)?))
}
