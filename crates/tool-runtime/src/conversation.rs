use crate::tool::{ToolCall, ToolResult};
use maidx_core::ImageRef;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// A message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System { text: String },
    User(UserContent),
    /// Assistant's response (may contain text and/or tool calls)
    Assistant(AssistantContent),
    /// Result of a tool execution
    ToolResult(ToolResult),
}

/// User turn: document text plus any attached images.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContent {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageRef>,
}

impl UserContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }
}

/// Content from the assistant that can contain mixed text and tool calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantContent {
    pub text: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            text: None,
            tool_calls: calls,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    #[error("{0} tool call(s) still awaiting a result")]
    UnansweredToolCalls(usize),
    #[error("tool result '{got}' does not answer the next pending call {expected:?}")]
    UnexpectedToolResult { expected: Option<String>, got: String },
    #[error("turn budget of {0} exhausted")]
    TurnBudgetExhausted(u32),
    #[error("duplicate tool call id '{0}'")]
    DuplicateToolCallId(String),
}

/// Ordered message history for one document.
///
/// Enforces that every tool call receives exactly one result, in call
/// order, before the next assistant turn, and that assistant turns never
/// exceed the configured budget.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<Message>,
    pending: VecDeque<String>,
    seen_ids: HashSet<String>,
    turns: u32,
    max_turns: u32,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>, user: UserContent, max_turns: u32) -> Self {
        Self {
            messages: vec![
                Message::System {
                    text: system_prompt.into(),
                },
                Message::User(user),
            ],
            pending: VecDeque::new(),
            seen_ids: HashSet::new(),
            turns: 0,
            max_turns,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Completed model round-trips.
    pub fn turns(&self) -> u32 {
        self.turns
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn has_turns_left(&self) -> bool {
        self.turns < self.max_turns
    }

    /// Whether every tool call has been answered.
    pub fn is_settled(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn next_pending(&self) -> Option<&str> {
        self.pending.front().map(String::as_str)
    }

    pub fn has_call_id(&self, id: &str) -> bool {
        self.seen_ids.contains(id)
    }

    /// Number of tool calls issued by the assistant so far.
    pub fn tool_call_count(&self) -> u32 {
        self.seen_ids.len() as u32
    }

    /// Check that a model call may be issued now.
    pub fn ensure_ready_for_model(&self) -> Result<(), ConversationError> {
        if !self.pending.is_empty() {
            return Err(ConversationError::UnansweredToolCalls(self.pending.len()));
        }
        if !self.has_turns_left() {
            return Err(ConversationError::TurnBudgetExhausted(self.max_turns));
        }
        Ok(())
    }

    pub fn push_assistant(&mut self, content: AssistantContent) -> Result<(), ConversationError> {
        self.ensure_ready_for_model()?;
        let mut fresh = HashSet::new();
        for call in &content.tool_calls {
            if self.seen_ids.contains(&call.id) || !fresh.insert(call.id.as_str()) {
                return Err(ConversationError::DuplicateToolCallId(call.id.clone()));
            }
        }
        for call in &content.tool_calls {
            self.seen_ids.insert(call.id.clone());
            self.pending.push_back(call.id.clone());
        }
        self.turns += 1;
        self.messages.push(Message::Assistant(content));
        Ok(())
    }

    /// Append a result; it must answer the oldest unanswered call.
    pub fn push_tool_result(&mut self, result: ToolResult) -> Result<(), ConversationError> {
        if self.next_pending() != Some(result.tool_call_id.as_str()) {
            return Err(ConversationError::UnexpectedToolResult {
                expected: self.pending.front().cloned(),
                got: result.tool_call_id,
            });
        }
        self.pending.pop_front();
        self.messages.push(Message::ToolResult(result));
        Ok(())
    }

    pub fn push_user(&mut self, text: impl Into<String>) -> Result<(), ConversationError> {
        if !self.pending.is_empty() {
            return Err(ConversationError::UnansweredToolCalls(self.pending.len()));
        }
        self.messages.push(Message::User(UserContent::text(text)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "echo".to_string(),
            input: json!({"message": id}),
        }
    }

    fn conversation(max_turns: u32) -> Conversation {
        Conversation::new("system", UserContent::text("doc"), max_turns)
    }

    #[test]
    fn test_seeded_with_system_and_user() {
        let conv = conversation(3);
        assert_eq!(conv.messages().len(), 2);
        assert!(matches!(conv.messages()[0], Message::System { .. }));
        assert!(matches!(conv.messages()[1], Message::User(_)));
        assert_eq!(conv.turns(), 0);
    }

    #[test]
    fn test_results_must_follow_call_order() {
        let mut conv = conversation(3);
        conv.push_assistant(AssistantContent::tool_calls(vec![call("a"), call("b")]))
            .unwrap();

        let err = conv.push_tool_result(ToolResult::ok("b", "x")).unwrap_err();
        assert_eq!(
            err,
            ConversationError::UnexpectedToolResult {
                expected: Some("a".to_string()),
                got: "b".to_string()
            }
        );

        conv.push_tool_result(ToolResult::ok("a", "1")).unwrap();
        assert_eq!(
            conv.ensure_ready_for_model(),
            Err(ConversationError::UnansweredToolCalls(1))
        );
        conv.push_tool_result(ToolResult::ok("b", "2")).unwrap();
        assert!(conv.ensure_ready_for_model().is_ok());

        // A second answer for the same call is rejected.
        assert!(conv.push_tool_result(ToolResult::ok("b", "again")).is_err());
        assert_eq!(conv.tool_call_count(), 2);
    }

    #[test]
    fn test_turn_budget() {
        let mut conv = conversation(1);
        conv.push_assistant(AssistantContent::text("hi")).unwrap();
        assert!(!conv.has_turns_left());
        assert_eq!(
            conv.push_assistant(AssistantContent::text("again")),
            Err(ConversationError::TurnBudgetExhausted(1))
        );
        assert_eq!(conv.turns(), 1);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut conv = conversation(3);
        assert_eq!(
            conv.push_assistant(AssistantContent::tool_calls(vec![call("a"), call("a")])),
            Err(ConversationError::DuplicateToolCallId("a".to_string()))
        );
        conv.push_assistant(AssistantContent::tool_calls(vec![call("a")]))
            .unwrap();
        conv.push_tool_result(ToolResult::ok("a", "1")).unwrap();
        assert!(conv
            .push_assistant(AssistantContent::tool_calls(vec![call("a")]))
            .is_err());
    }

    #[test]
    fn test_message_serialization() {
        let msg = Message::Assistant(AssistantContent::tool_calls(vec![call("a")]));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        let roundtrip: Message = serde_json::from_value(json).unwrap();
        assert_eq!(roundtrip, msg);
    }
}
