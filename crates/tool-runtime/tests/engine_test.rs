use std::sync::Arc;

use maidx_core::{Document, ExtractionConfig, ExtractionSchema};
use maidx_tool_runtime::provider::mock::ScriptedLlmClient;
use maidx_tool_runtime::tool::EchoTool;
use maidx_tool_runtime::{
    standard_registry, AssistantContent, CancellationFlag, ConversationEngine, EngineSettings,
    EngineState, FailureKind, LlmError, Message, ToolCall, ToolErrorKind, ToolRegistry,
};
use serde_json::json;

fn schema() -> Arc<ExtractionSchema> {
    Arc::new(
        ExtractionSchema::from_json_str(
            r#"{"title": "Report", "fields": [
                {"name": "title", "type": "string", "description": "Document title"},
                {"name": "timestamp", "type": "date", "description": "Publication date"}
            ]}"#,
        )
        .unwrap(),
    )
}

fn document() -> Arc<Document> {
    Arc::new(Document::from_text(
        "inbox/report.txt",
        "Quarterly Report\nPublished Jan 5, 2024 by the finance team.",
    ))
}

fn engine(client: Arc<ScriptedLlmClient>, max_turns: u32) -> ConversationEngine {
    let mut config = ExtractionConfig::default();
    config.tools.script_sandbox_bin = Some(env!("CARGO_BIN_EXE_maidx-sandbox").to_string());
    let schema = schema();
    let registry = standard_registry(&config.tools, &schema).unwrap();
    ConversationEngine::new(client, Arc::new(registry), schema, EngineSettings::from_config(&config))
        .with_max_turns(max_turns)
}

fn fenced(value: serde_json::Value) -> String {
    format!("Here is the record:\n```json\n{value}\n```")
}

/// Every tool call in `messages` is followed by exactly one result, in call
/// order, before the next assistant message.
fn assert_calls_answered_in_order(messages: &[Message]) {
    let mut pending: Vec<String> = Vec::new();
    for message in messages {
        match message {
            Message::Assistant(content) => {
                assert!(pending.is_empty(), "assistant turn with unanswered calls {pending:?}");
                pending = content.tool_calls.iter().map(|c| c.id.clone()).collect();
            }
            Message::ToolResult(result) => {
                assert!(!pending.is_empty(), "result without a pending call");
                assert_eq!(result.tool_call_id, pending.remove(0));
            }
            Message::User(_) => assert!(pending.is_empty()),
            Message::System { .. } => {}
        }
    }
}

#[tokio::test]
async fn test_script_converts_date_then_finalizes() {
    let client = Arc::new(
        ScriptedLlmClient::new()
            .then_tool_call(
                "call_1",
                "run_script",
                json!({"script": "{{ \"Jan 5, 2024\" | parse_date }}"}),
            )
            .then_text(&fenced(json!({"title": "Quarterly Report", "timestamp": "2024-01-05"}))),
    );
    let run = engine(client.clone(), 12)
        .run(document(), &CancellationFlag::new())
        .await;

    assert_eq!(run.state(), EngineState::Finalized);
    let result = run.outcome.as_ref().unwrap();
    assert_eq!(
        result.to_json(),
        json!({"title": "Quarterly Report", "timestamp": "2024-01-05"})
    );
    assert_eq!(result.provenance.turns, 2);
    assert_eq!(result.provenance.tool_calls, 1);
    assert_eq!(result.provenance.corrections, 0);
    assert_eq!(result.document_id(), "inbox/report.txt");

    let tool_result = run
        .conversation
        .messages()
        .iter()
        .find_map(|m| match m {
            Message::ToolResult(r) => Some(r.clone()),
            _ => None,
        })
        .unwrap();
    assert!(tool_result.success);
    assert_eq!(tool_result.content, "2024-01-05");

    // The second request already carries the script output.
    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].messages.len(), 2);
    assert_eq!(requests[1].messages.len(), 4);
    assert!(requests[0].tools.iter().any(|t| t.name == "run_script"));
}

#[tokio::test]
async fn test_multiple_calls_answered_in_order_before_next_turn() {
    let calls = vec![
        ToolCall {
            id: "a".to_string(),
            name: "think".to_string(),
            input: json!({"conclusion": "title is on line 1"}),
        },
        ToolCall {
            id: "b".to_string(),
            name: "run_script".to_string(),
            input: json!({"script": "{{ add_days(\"2024-01-04\", 1) }}"}),
        },
        ToolCall {
            id: "c".to_string(),
            name: "schema_validation".to_string(),
            input: json!({"data": {"title": "Quarterly Report", "timestamp": "2024-01-05"}}),
        },
    ];
    let client = Arc::new(
        ScriptedLlmClient::new()
            .push(Ok(AssistantContent::tool_calls(calls)))
            .then_text(&fenced(json!({"title": "Quarterly Report", "timestamp": "2024-01-05"}))),
    );
    let run = engine(client.clone(), 12)
        .run(document(), &CancellationFlag::new())
        .await;

    assert!(run.outcome.is_ok());
    for request in client.requests() {
        assert_calls_answered_in_order(&request.messages);
    }
    assert_calls_answered_in_order(run.conversation.messages());

    let contents: Vec<String> = run
        .conversation
        .messages()
        .iter()
        .filter_map(|m| match m {
            Message::ToolResult(r) => Some(r.content.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(contents[0], "title is on line 1");
    assert_eq!(contents[1], "2024-01-05");
    assert!(contents[2].contains("\"valid\":true"));
}

#[tokio::test]
async fn test_turn_budget_is_enforced() {
    let client = Arc::new(ScriptedLlmClient::from_fn(|request| {
        Ok(AssistantContent::tool_calls(vec![ToolCall {
            id: format!("call_{}", request.messages.len()),
            name: "think".to_string(),
            input: json!({"thoughts": "still thinking"}),
        }]))
    }));
    let run = engine(client.clone(), 3)
        .run(document(), &CancellationFlag::new())
        .await;

    let failure = run.outcome.unwrap_err();
    assert_eq!(failure.kind, FailureKind::TurnBudgetExceeded);
    assert_eq!(client.call_count(), 3);
    assert_eq!(run.conversation.turns(), 3);
}

#[tokio::test]
async fn test_one_corrective_turn_then_success() {
    let client = Arc::new(
        ScriptedLlmClient::new()
            .then_text(&fenced(json!({"title": "Quarterly Report"})))
            .then_text(&fenced(json!({"title": "Quarterly Report", "timestamp": "Jan 5, 2024"}))),
    );
    let run = engine(client.clone(), 12)
        .run(document(), &CancellationFlag::new())
        .await;

    let result = run.outcome.unwrap();
    assert_eq!(result.provenance.corrections, 1);
    assert_eq!(result.record["timestamp"], json!("2024-01-05"));

    let correction = match &client.requests()[1].messages[3] {
        Message::User(content) => content.text.clone(),
        other => panic!("expected corrective user message, got {other:?}"),
    };
    assert!(correction.contains("timestamp"));
    assert!(correction.contains("missing required field"));
}

#[tokio::test]
async fn test_repeated_schema_failure_fails_after_one_correction() {
    let bad = fenced(json!({"title": "Quarterly Report", "timestamp": "someday"}));
    let client = Arc::new(ScriptedLlmClient::new().then_text(&bad).then_text(&bad).then_text(&bad));
    let run = engine(client.clone(), 12)
        .run(document(), &CancellationFlag::new())
        .await;

    let failure = run.outcome.unwrap_err();
    assert_eq!(failure.kind, FailureKind::SchemaValidation);
    assert!(failure.message.contains("timestamp"));
    assert_eq!(client.call_count(), 2);
}

#[tokio::test]
async fn test_tool_errors_are_fed_back_not_fatal() {
    let client = Arc::new(
        ScriptedLlmClient::new()
            .then_tool_call("c1", "run_script", json!({"script": "{{ open('/etc/passwd') }}"}))
            .then_tool_call("c2", "run_script", json!({"code": "1 + 1"}))
            .then_tool_call("c3", "shell", json!({"cmd": "ls"}))
            .then_text(&fenced(json!({"title": "Quarterly Report", "timestamp": "2024-01-05"}))),
    );
    let run = engine(client, 12).run(document(), &CancellationFlag::new()).await;
    assert!(run.outcome.is_ok());

    let kinds: Vec<_> = run
        .conversation
        .messages()
        .iter()
        .filter_map(|m| match m {
            Message::ToolResult(r) => Some(r.error_kind),
            _ => None,
        })
        .collect();
    assert_eq!(
        kinds,
        [
            Some(ToolErrorKind::SandboxViolation),
            Some(ToolErrorKind::InvalidArguments),
            Some(ToolErrorKind::UnknownTool),
        ]
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_memory_hungry_script_does_not_end_the_job() {
    let client = Arc::new(
        ScriptedLlmClient::new()
            .then_tool_call(
                "c1",
                "run_script",
                json!({"script": "{% set a = \"x\" * 100000000 %}{{ (a ~ a ~ a ~ a) | length }}"}),
            )
            .then_text(&fenced(json!({"title": "Quarterly Report", "timestamp": "2024-01-05"}))),
    );
    let run = engine(client, 12).run(document(), &CancellationFlag::new()).await;

    assert_eq!(run.state(), EngineState::Finalized);
    let kinds: Vec<_> = run
        .conversation
        .messages()
        .iter()
        .filter_map(|m| match m {
            Message::ToolResult(r) => Some(r.error_kind),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, [Some(ToolErrorKind::SandboxViolation)]);
}

#[tokio::test]
async fn test_fatal_tool_error_fails_job() {
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool).unwrap();
    let client = Arc::new(
        ScriptedLlmClient::new().then_tool_call("c1", "echo", json!({"message": "abort"})),
    );
    let engine = ConversationEngine::new(
        client.clone(),
        Arc::new(registry),
        schema(),
        EngineSettings::default(),
    );
    let run = engine.run(document(), &CancellationFlag::new()).await;

    assert_eq!(run.outcome.unwrap_err().kind, FailureKind::ToolFatal);
    assert_eq!(client.call_count(), 1);
}

#[tokio::test]
async fn test_llm_errors_are_classified() {
    let client = Arc::new(
        ScriptedLlmClient::new().then_error(LlmError::NetworkError("connection reset".into())),
    );
    let failure = engine(client, 12)
        .run(document(), &CancellationFlag::new())
        .await
        .outcome
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::TransientNetwork);
    assert!(failure.is_retryable());

    let client = Arc::new(ScriptedLlmClient::new().then_error(LlmError::AuthError));
    let failure = engine(client, 12)
        .run(document(), &CancellationFlag::new())
        .await
        .outcome
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::ModelError);
}

#[tokio::test]
async fn test_cancelled_before_first_turn() {
    let client = Arc::new(ScriptedLlmClient::new().then_text("unused"));
    let cancel = CancellationFlag::new();
    cancel.cancel();
    let run = engine(client.clone(), 12).run(document(), &cancel).await;

    assert_eq!(run.outcome.unwrap_err().kind, FailureKind::Cancelled);
    assert_eq!(client.call_count(), 0);
}

#[tokio::test]
async fn test_usage_limit_annotations_reach_the_model() {
    let client = Arc::new(
        ScriptedLlmClient::new()
            .then_tool_call("c1", "think", json!({"conclusion": "ok"}))
            .then_text(&fenced(json!({"title": "Quarterly Report", "timestamp": "2024-01-05"}))),
    );
    engine(client.clone(), 12)
        .run(document(), &CancellationFlag::new())
        .await
        .outcome
        .unwrap();

    let requests = client.requests();
    let think = |i: usize| {
        requests[i]
            .tools
            .iter()
            .find(|t| t.name == "think")
            .unwrap()
            .description
            .clone()
    };
    assert!(think(0).ends_with("You have 5 calls to this tool left."));
    assert!(think(1).ends_with("You have 4 calls to this tool left."));
}
