use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use maidx_core::config::LlmConfig;
use maidx_tool_runtime::provider::{ChatRequest, LlmClient, LlmError};
use maidx_tool_runtime::AssistantContent;

use super::translate::{message_to_openai, response_to_assistant, tool_definition_to_openai};

/// Wait assumed when a 429 carries no Retry-After header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| LlmError::Other(anyhow::anyhow!("API key is not a valid header value")))?;
            headers.insert(AUTHORIZATION, value);
        }
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| LlmError::Other(anyhow::anyhow!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| LlmError::Other(anyhow::anyhow!("invalid value for header '{name}': {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()
            .map_err(|e| LlmError::Other(e.into()))?;

        Ok(Self {
            client,
            url: completions_url(&config.base_url),
            timeout: config.timeout(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request_body(request: &ChatRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(message_to_openai).collect();
        let tools: Vec<Value> = request.tools.iter().map(tool_definition_to_openai).collect();

        let mut body = json!({
            "model": request.params.model,
            "messages": messages,
            "temperature": request.params.temperature,
            "max_tokens": request.params.max_tokens,
        });
        if let Some(top_p) = request.params.top_p {
            body["top_p"] = json!(top_p);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        body
    }

    fn send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(self.timeout)
        } else {
            LlmError::NetworkError(e.to_string())
        }
    }
}

/// `{base}/chat/completions`, unless the base already names the endpoint.
pub fn completions_url(base: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: ChatRequest) -> Result<AssistantContent, LlmError> {
        let body = Self::request_body(&request);
        debug!(
            model = %request.params.model,
            url = %self.url,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "OpenAI chat completion request"
        );

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body_text = response.text().await.unwrap_or_default();

            return Err(match status {
                401 | 403 => LlmError::AuthError,
                429 => LlmError::RateLimited {
                    retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
                },
                _ => LlmError::ApiError {
                    status,
                    message: body_text,
                },
            });
        }

        let resp: Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("response is not JSON: {e}")))?;
        response_to_assistant(&resp)
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}
