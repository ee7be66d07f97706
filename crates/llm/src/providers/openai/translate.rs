//! Translation between conversation types and the OpenAI chat-completions format.

use serde_json::{json, Value};

use maidx_tool_runtime::{AssistantContent, Message, ToolCall, ToolDefinition};
use maidx_tool_runtime::provider::LlmError;

/// Translate a [`ToolDefinition`] into the OpenAI `function` tool format.
pub(super) fn tool_definition_to_openai(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

/// Translate a [`Message`] into an OpenAI message object.
pub(super) fn message_to_openai(msg: &Message) -> Value {
    match msg {
        Message::System { text } => json!({
            "role": "system",
            "content": text,
        }),
        Message::User(content) if content.images.is_empty() => json!({
            "role": "user",
            "content": content.text,
        }),
        Message::User(content) => {
            let mut parts = vec![json!({"type": "text", "text": content.text})];
            for image in &content.images {
                parts.push(json!({
                    "type": "image_url",
                    "image_url": {"url": image.data_uri},
                }));
            }
            json!({
                "role": "user",
                "content": parts,
            })
        }
        Message::Assistant(content) => {
            let mut msg = json!({
                "role": "assistant",
                "content": content.text,
            });
            if !content.tool_calls.is_empty() {
                let calls: Vec<Value> = content
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.input.to_string(),
                            }
                        })
                    })
                    .collect();
                msg["tool_calls"] = json!(calls);
            }
            msg
        }
        Message::ToolResult(result) => json!({
            "role": "tool",
            "tool_call_id": result.tool_call_id,
            "content": result.content,
        }),
    }
}

/// Extract the assistant message from a chat-completions response body.
///
/// Tool-call arguments that are not valid JSON are passed through as a
/// string so argument validation can report them back to the model.
pub(super) fn response_to_assistant(body: &Value) -> Result<AssistantContent, LlmError> {
    let message = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message".into()))?;

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let function = call
                .get("function")
                .ok_or_else(|| LlmError::InvalidResponse("tool call without function".into()))?;
            let name = function
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| LlmError::InvalidResponse("tool call without name".into()))?;
            let input = match function.get("arguments") {
                Some(Value::String(raw)) if raw.trim().is_empty() => json!({}),
                Some(Value::String(raw)) => {
                    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
                }
                Some(other) => other.clone(),
                None => json!({}),
            };
            tool_calls.push(ToolCall {
                id: call
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: name.to_string(),
                input,
            });
        }
    }

    Ok(AssistantContent { text, tool_calls })
}
