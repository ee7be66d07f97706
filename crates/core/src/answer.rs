//! Final-answer parsing: the model is asked to wrap its JSON in a code fence.

use serde_json::Value;

use crate::schema::FieldDefect;

/// Contents of every fenced block (```` ``` ```` or ```` ```json ````), in order.
pub fn code_fences(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            match current.take() {
                Some(lines) => blocks.push(lines.join("\n")),
                None => {
                    // Single-line fence: ```{"a": 1}```
                    let rest = trimmed.trim_start_matches('`');
                    if let Some(inner) = rest.strip_suffix("```") {
                        blocks.push(strip_language_tag(inner).to_string());
                    } else {
                        current = Some(Vec::new());
                    }
                }
            }
        } else if let Some(lines) = current.as_mut() {
            lines.push(line);
        }
    }
    // Unterminated fence: keep what was collected.
    if let Some(lines) = current {
        blocks.push(lines.join("\n"));
    }
    blocks
}

fn strip_language_tag(inner: &str) -> &str {
    inner.strip_prefix("json").unwrap_or(inner)
}

/// Pull the JSON answer out of a final assistant message.
///
/// Uses the first fenced block, or the whole text when there is none.
pub fn parse_answer(text: &str) -> Result<Value, FieldDefect> {
    let fences = code_fences(text);
    let candidate = fences
        .into_iter()
        .next()
        .unwrap_or_else(|| text.to_string());
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return Err(FieldDefect::new("(parsing)", "the answer is empty"));
    }
    serde_json::from_str(candidate)
        .map_err(|e| FieldDefect::new("(parsing)", format!("invalid JSON: {e}")))
}
