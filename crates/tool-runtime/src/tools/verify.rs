//! Schema verifier tool: checks a draft answer against the extraction schema.

use async_trait::async_trait;
use serde_json::Value;

use maidx_core::answer::parse_answer;
use maidx_core::FieldDefect;

use crate::tool::{Tool, ToolContext, ToolDefinition, ToolError};

/// Runs the same verification the engine applies to the final answer.
pub struct SchemaVerifierTool {
    title: String,
}

impl SchemaVerifierTool {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

#[async_trait]
impl Tool for SchemaVerifierTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "schema_validation".to_string(),
            description: format!(
                "Validate JSON data against the predefined schema for '{}'. Only provide the \
                 data; the schema is already known. Returns {{\"valid\": bool, \"defects\": [...]}} \
                 listing missing required fields and values that cannot be converted to the \
                 field's type.",
                self.title
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "data": {
                        "type": ["string", "object"],
                        "description": "The candidate record, as a JSON object or a JSON string"
                    }
                },
                "required": ["data"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<String, ToolError> {
        let defects: Vec<FieldDefect> = match input.get("data") {
            Some(Value::String(raw)) => match parse_answer(raw) {
                Ok(candidate) => context.schema.verify(&candidate),
                Err(defect) => vec![defect],
            },
            Some(candidate) => context.schema.verify(candidate),
            None => return Err(ToolError::InvalidArguments("missing 'data' field".to_string())),
        };

        let report = serde_json::json!({
            "valid": defects.is_empty(),
            "defects": defects,
        });
        Ok(report.to_string())
    }
}
