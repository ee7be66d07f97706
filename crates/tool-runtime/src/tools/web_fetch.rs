//! Outbound HTTP fetch tool.
//!
//! Destinations are unrestricted; every request is bounded by a timeout and
//! the body is cut off at a byte cap.

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use maidx_core::config::ToolsConfig;

use crate::tool::{Tool, ToolContext, ToolDefinition, ToolError};

/// Response headers worth showing to the model.
const SHOWN_HEADERS: &[&str] = &[
    "content-type",
    "content-length",
    "content-language",
    "last-modified",
    "location",
    "retry-after",
];

pub struct WebFetchTool {
    client: Client,
    timeout: Duration,
    max_bytes: usize,
}

impl WebFetchTool {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("maidx/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout,
            max_bytes,
        })
    }

    pub fn from_config(config: &ToolsConfig) -> Result<Self, ToolError> {
        Self::new(config.fetch_timeout(), config.fetch_max_bytes)
    }

    fn parse_url(raw: &str) -> Result<Url, ToolError> {
        let url = Url::parse(raw.trim())
            .map_err(|e| ToolError::InvalidArguments(format!("invalid url '{raw}': {e}")))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ToolError::InvalidArguments(format!(
                "unsupported scheme '{other}', use http:// or https://"
            ))),
        }
    }

    fn parse_method(raw: &str) -> Result<Method, ToolError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            other => Err(ToolError::InvalidArguments(format!(
                "method '{other}' is not supported, use GET or POST"
            ))),
        }
    }

    /// POST bodies are JSON: an object as-is, or a string holding JSON.
    fn parse_body(body: Option<&Value>) -> Result<Option<Value>, ToolError> {
        match body {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => serde_json::from_str(s)
                .map(Some)
                .map_err(|e| ToolError::InvalidArguments(format!("body JSON invalid: {e}"))),
            Some(other) => Ok(Some(other.clone())),
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> ToolError {
        if e.is_timeout() {
            ToolError::Timeout(self.timeout)
        } else {
            ToolError::FetchFailed(e.to_string())
        }
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "web_fetch".to_string(),
            description: format!(
                "Fetch an Internet resource, preferably an API. Specify the URL, the method \
                 (GET or POST) and optionally a JSON body for POST. Returns the status code, \
                 selected headers and the response body (first {} bytes if larger). \
                 Prefer known APIs over HTML pages, which are usually too large.",
                self.max_bytes
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "URL, must start with http:// or https://"
                    },
                    "method": {
                        "type": "string",
                        "description": "GET or POST"
                    },
                    "body": {
                        "type": ["string", "object", "array"],
                        "description": "Optional JSON request body for POST"
                    }
                },
                "required": ["url", "method"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<String, ToolError> {
        let raw_url = input
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("missing 'url' field".to_string()))?;
        let url = Self::parse_url(raw_url)?;
        let method = Self::parse_method(input.get("method").and_then(|v| v.as_str()).unwrap_or("GET"))?;
        let body = Self::parse_body(input.get("body"))?;

        debug!(%url, %method, "Fetching URL");
        let mut request = self.client.request(method.clone(), url.clone());
        if method == Method::POST {
            if let Some(body) = &body {
                request = request.json(body);
            }
        }

        let mut response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();

        let headers = SHOWN_HEADERS
            .iter()
            .filter_map(|name| {
                response
                    .headers()
                    .get(*name)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| format!("{name}: {v}"))
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut buf: Vec<u8> = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response.chunk().await.map_err(|e| self.map_send_error(e))? {
            let room = self.max_bytes.saturating_sub(buf.len());
            if chunk.len() > room {
                buf.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            buf.extend_from_slice(&chunk);
        }
        let mut text = String::from_utf8_lossy(&buf).into_owned();
        if truncated {
            text.push_str(&format!("\n[truncated after {} bytes]", self.max_bytes));
        }

        let rendered = format!(
            "Status Code: {}\nHeaders:\n{}\nResponse: {}",
            status.as_u16(),
            headers,
            text
        );

        if status.is_success() {
            Ok(rendered)
        } else {
            warn!(%url, status = status.as_u16(), "Fetch returned non-success status");
            Err(ToolError::FetchFailed(rendered))
        }
    }
}
