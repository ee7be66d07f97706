use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use maidx_core::{Document, ExtractionSchema};

/// Describes a tool's interface for LLM consumption.
/// Maps to the OpenAI `function` tool format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name (e.g., "run_script", "web_fetch")
    pub name: String,
    /// Human-readable description for the LLM
    pub description: String,
    /// JSON Schema describing the expected arguments
    pub input_schema: Value,
}

/// Represents an LLM requesting execution of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this invocation (used to match results)
    pub id: String,
    /// Tool name to execute
    pub name: String,
    /// JSON input arguments
    pub input: Value,
}

/// Result of executing a tool, sent back to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Must match the ToolCall id
    pub tool_call_id: String,
    pub success: bool,
    /// Payload on success, error description on failure
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            success: true,
            content: content.into(),
            error_kind: None,
        }
    }

    pub fn failed(
        tool_call_id: impl Into<String>,
        kind: ToolErrorKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            success: false,
            content: content.into(),
            error_kind: Some(kind),
        }
    }

    /// Whether the tool asked for the whole job to stop.
    pub fn is_fatal(&self) -> bool {
        self.error_kind == Some(ToolErrorKind::Fatal)
    }
}

/// Read-only state a tool may consult: the document being processed and the
/// shared extraction schema.
#[derive(Clone)]
pub struct ToolContext {
    pub document: Arc<Document>,
    pub schema: Arc<ExtractionSchema>,
}

/// The primary extension point: all tools implement this trait.
///
/// Tools are object-safe, Send + Sync, and async. Arguments have already
/// been checked against `definition().input_schema` when `execute` runs.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's definition (name, description, JSON Schema).
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with the given JSON input, returning the text fed
    /// back to the model.
    async fn execute(&self, input: Value, context: &ToolContext) -> Result<String, ToolError>;
}

/// Classification carried on failed tool results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    InvalidArguments,
    UnknownTool,
    UsageLimitExceeded,
    SandboxViolation,
    SandboxTimeout,
    OutputTooLarge,
    FetchFailed,
    Timeout,
    ExecutionFailed,
    Fatal,
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidArguments => "InvalidArguments",
            Self::UnknownTool => "UnknownTool",
            Self::UsageLimitExceeded => "UsageLimitExceeded",
            Self::SandboxViolation => "SandboxViolation",
            Self::SandboxTimeout => "SandboxTimeout",
            Self::OutputTooLarge => "OutputTooLarge",
            Self::FetchFailed => "FetchFailed",
            Self::Timeout => "Timeout",
            Self::ExecutionFailed => "ExecutionFailed",
            Self::Fatal => "Fatal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Sandbox violation: {0}")]
    SandboxViolation(String),
    #[error("Sandbox timeout: {0}")]
    SandboxTimeout(String),
    #[error("Output too large: exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },
    #[error("Fetch failed: {0}")]
    FetchFailed(String),
    #[error("Timeout after {0:?}")]
    Timeout(Duration),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Fatal: {0}")]
    Fatal(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ToolError {
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            Self::InvalidArguments(_) => ToolErrorKind::InvalidArguments,
            Self::SandboxViolation(_) => ToolErrorKind::SandboxViolation,
            Self::SandboxTimeout(_) => ToolErrorKind::SandboxTimeout,
            Self::OutputTooLarge { .. } => ToolErrorKind::OutputTooLarge,
            Self::FetchFailed(_) => ToolErrorKind::FetchFailed,
            Self::Timeout(_) => ToolErrorKind::Timeout,
            Self::ExecutionFailed(_) | Self::Other(_) => ToolErrorKind::ExecutionFailed,
            Self::Fatal(_) => ToolErrorKind::Fatal,
        }
    }

    /// Convert into the failed result the model sees.
    pub fn into_result(self, tool_call_id: impl Into<String>) -> ToolResult {
        let kind = self.kind();
        ToolResult::failed(tool_call_id, kind, format!("{kind}: {self}"))
    }
}

impl fmt::Display for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}

/// Simple echo tool for testing purposes.
#[cfg(any(test, feature = "test-utils"))]
pub struct EchoTool;

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".to_string(),
            description: "Echoes back the input message. For testing.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "The message to echo back"
                    }
                },
                "required": ["message"]
            }),
        }
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<String, ToolError> {
        let message = input
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("missing 'message' field".to_string()))?;
        if message == "abort" {
            return Err(ToolError::Fatal("echo asked to abort".to_string()));
        }
        Ok(message.to_string())
    }
}

/// Context over a one-line document and a single-field schema.
#[cfg(any(test, feature = "test-utils"))]
pub fn test_context(text: &str) -> ToolContext {
    let schema = ExtractionSchema::from_json_str(
        r#"{"fields": [{"name": "title", "type": "string", "description": "Title"}]}"#,
    )
    .expect("static schema is valid");
    ToolContext {
        document: Arc::new(Document::from_text("test-doc.txt", text)),
        schema: Arc::new(schema),
    }
}
