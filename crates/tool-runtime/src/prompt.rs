//! Prompt text sent to the model.

use crate::conversation::UserContent;
use maidx_core::{Document, ExtractionSchema, FieldDefect};

const DEFAULT_TOOL_PROMPT: &str = "Tools: you may call the provided tools before answering. \
Use run_script for date conversion, arithmetic, JSON handling and pattern matching instead of \
computing by hand; use think to reason about ambiguous values; use schema_validation to check a \
draft answer before you submit it. Each tool description states how many calls remain.";

/// System message: role, schema, answer format and tool guidance.
pub fn system_prompt(schema: &ExtractionSchema, tool_prompt: Option<&str>) -> String {
    let json_schema = schema.to_json_schema();
    let tools = tool_prompt.unwrap_or(DEFAULT_TOOL_PROMPT);
    format!(
        "You are a data extraction assistant. Your task is to extract structured data \
         from documents according to a given schema.\n\n\
         Fields ({title}):\n{fields}\n\n\
         Schema: extract data according to the following JSON Schema: {json_schema}\n\n\
         Instructions: extract ONE record from this content.\n\
         - Ensure all data types match the schema specifications\n\
         - Write dates as YYYY-MM-DD and timestamps as RFC 3339\n\
         - Use null for optional fields that are not present; do not make up data\n\n\
         {tools}\n\n\
         IMPORTANT: return ONLY the JSON object that matches the schema, wrapped in a \
         ```json code fence. Do not include the schema itself or any explanatory text.",
        title = schema.display_title(),
        fields = schema.describe(),
    )
}

/// First user message: file header, document text and attached images.
pub fn user_content(document: &Document) -> UserContent {
    let mut text = format!("File: {}\n\n", document.name);
    if !document.text.is_empty() {
        text.push_str("Content:\n");
        text.push_str(&document.text);
    }
    UserContent {
        text,
        images: document.images.clone(),
    }
}

/// Corrective message after the final answer failed verification.
pub fn correction(defects: &[FieldDefect]) -> String {
    let list = defects
        .iter()
        .map(|d| format!("- {d}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Your answer does not match the schema:\n{list}\n\n\
         Fix these problems and reply with the complete corrected JSON object in a ```json code fence."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use maidx_core::ImageRef;

    fn schema() -> ExtractionSchema {
        ExtractionSchema::from_json_str(
            r#"{"title": "Invoice", "fields": [
                {"name": "title", "type": "string", "description": "Document title"},
                {"name": "timestamp", "type": "date", "description": "Issue date"}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_system_prompt_lists_fields_and_tools() {
        let prompt = system_prompt(&schema(), None);
        assert!(prompt.contains("Fields (Invoice):"));
        assert!(prompt.contains("- timestamp (date, required): Issue date"));
        assert!(prompt.contains("run_script"));

        let custom = system_prompt(&schema(), Some("Never call tools."));
        assert!(custom.contains("Never call tools."));
        assert!(!custom.contains("run_script"));
    }

    #[test]
    fn test_user_content_header_and_images() {
        let doc = Document::from_text("in/report.txt", "Jan 5, 2024").with_image(ImageRef {
            mime_type: "image/png".to_string(),
            data_uri: "data:image/png;base64,AAAA".to_string(),
        });
        let content = user_content(&doc);
        assert_eq!(content.text, "File: report.txt\n\nContent:\nJan 5, 2024");
        assert_eq!(content.images.len(), 1);
    }

    #[test]
    fn test_correction_lists_defects() {
        let text = correction(&[FieldDefect::new("timestamp", "missing required field")]);
        assert!(text.contains("- at 'timestamp': missing required field"));
    }
}
