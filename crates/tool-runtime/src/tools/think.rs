//! Self-reflection tool: a scratchpad with no side effects.

use async_trait::async_trait;
use serde_json::Value;

use crate::tool::{Tool, ToolContext, ToolDefinition, ToolError};

pub struct ThinkTool;

#[async_trait]
impl Tool for ThinkTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "think".to_string(),
            description: "Use this tool to think internally. Your thoughts are not part of the \
                output; only the conclusion is returned to you as the call result."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "thoughts": {
                        "type": "string",
                        "description": "Your internal reasoning"
                    },
                    "conclusion": {
                        "type": "string",
                        "description": "Conclusion of your thoughts, returned as the call result"
                    }
                },
                "required": []
            }),
        }
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<String, ToolError> {
        Ok(input
            .get("conclusion")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }
}
