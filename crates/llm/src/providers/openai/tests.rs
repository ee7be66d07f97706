//! Unit tests for the OpenAI-compatible client.

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use maidx_core::config::LlmConfig;
use maidx_core::{ExtractionConfig, ImageRef};
use maidx_tool_runtime::provider::{ChatRequest, LlmClient, LlmError, ModelParams};
use maidx_tool_runtime::{AssistantContent, Message, ToolCall, ToolDefinition, ToolResult, UserContent};

use super::client::{completions_url, OpenAiClient};
use super::translate::{message_to_openai, response_to_assistant, tool_definition_to_openai};

#[test]
fn test_tool_definition_translation() {
    let def = ToolDefinition {
        name: "run_script".to_string(),
        description: "Evaluate a script".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {"script": {"type": "string"}},
            "required": ["script"]
        }),
    };
    let v = tool_definition_to_openai(&def);
    assert_eq!(v["type"], "function");
    assert_eq!(v["function"]["name"], "run_script");
    assert_eq!(v["function"]["parameters"]["required"][0], "script");
}

#[test]
fn test_user_message_with_images_uses_parts() {
    let plain = message_to_openai(&Message::User(UserContent::text("File: a.txt")));
    assert_eq!(plain["content"], "File: a.txt");

    let msg = Message::User(UserContent {
        text: "File: scan.png\n\n".to_string(),
        images: vec![ImageRef {
            mime_type: "image/png".to_string(),
            data_uri: "data:image/png;base64,iVBOR".to_string(),
        }],
    });
    let v = message_to_openai(&msg);
    let parts = v["content"].as_array().unwrap();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0]["type"], "text");
    assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,iVBOR");
}

#[test]
fn test_assistant_tool_calls_and_results() {
    let msg = Message::Assistant(AssistantContent::tool_calls(vec![ToolCall {
        id: "call_1".to_string(),
        name: "think".to_string(),
        input: json!({"conclusion": "ok"}),
    }]));
    let v = message_to_openai(&msg);
    assert_eq!(v["role"], "assistant");
    assert!(v["content"].is_null());
    assert_eq!(v["tool_calls"][0]["id"], "call_1");
    assert_eq!(v["tool_calls"][0]["function"]["arguments"], r#"{"conclusion":"ok"}"#);

    let v = message_to_openai(&Message::ToolResult(ToolResult::ok("call_1", "ok")));
    assert_eq!(v["role"], "tool");
    assert_eq!(v["tool_call_id"], "call_1");
    assert_eq!(v["content"], "ok");

    let text_only = message_to_openai(&Message::Assistant(AssistantContent::text("done")));
    assert!(text_only.get("tool_calls").is_none());
}

#[test]
fn test_response_parsing() {
    let body = json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [
                    {"id": "call_a", "type": "function",
                     "function": {"name": "run_script", "arguments": "{\"script\": \"{{ 1 }}\"}"}},
                    {"id": "call_b", "type": "function",
                     "function": {"name": "think", "arguments": "not json"}}
                ]
            }
        }]
    });
    let reply = response_to_assistant(&body).unwrap();
    assert!(reply.text.is_none());
    assert_eq!(reply.tool_calls.len(), 2);
    assert_eq!(reply.tool_calls[0].input["script"], "{{ 1 }}");
    assert_eq!(reply.tool_calls[1].input, json!("not json"));

    let text = response_to_assistant(&json!({"choices": [{"message": {"content": "```json\n{}\n```"}}]}))
        .unwrap();
    assert_eq!(text.text.as_deref(), Some("```json\n{}\n```"));
    assert!(text.tool_calls.is_empty());

    assert!(matches!(
        response_to_assistant(&json!({"error": "boom"})),
        Err(LlmError::InvalidResponse(_))
    ));
}

#[test]
fn test_completions_url() {
    assert_eq!(
        completions_url("https://api.openai.com/v1/"),
        "https://api.openai.com/v1/chat/completions"
    );
    assert_eq!(
        completions_url("http://localhost:8000/v1/chat/completions"),
        "http://localhost:8000/v1/chat/completions"
    );
}

// ── HTTP behaviour against a local listener ─────────────────────

async fn serve_once(response: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut data = Vec::new();
        let mut buf = [0u8; 8192];
        // Read headers and the JSON body before answering.
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data);
            if let Some(end) = text.find("\r\n\r\n") {
                let len = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= end + 4 + len {
                    break;
                }
            }
        }
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
    });
    format!("http://{addr}/v1")
}

fn http(status: &str, extra_headers: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n{extra_headers}Connection: close\r\n\r\n{body}",
        body.len()
    )
}

fn config(base_url: String) -> LlmConfig {
    let mut llm = ExtractionConfig::default().llm;
    llm.base_url = base_url;
    llm.api_key = Some("sk-test".to_string());
    llm
}

fn request() -> ChatRequest {
    ChatRequest {
        messages: vec![
            Message::System {
                text: "extract".to_string(),
            },
            Message::User(UserContent::text("File: a.txt")),
        ],
        tools: Vec::new(),
        params: ModelParams::default(),
    }
}

#[tokio::test]
async fn test_successful_completion() {
    let body = json!({"choices": [{"message": {"role": "assistant", "content": "hello"}}]}).to_string();
    let base = serve_once(http("200 OK", "", &body)).await;
    let client = OpenAiClient::new(&config(base)).unwrap();
    let reply = client.complete(request()).await.unwrap();
    assert_eq!(reply.text.as_deref(), Some("hello"));
}

#[tokio::test]
async fn test_any_2xx_status_is_a_success() {
    let body = json!({"choices": [{"message": {"role": "assistant", "content": "proxied"}}]}).to_string();
    for status in ["201 Created", "203 Non-Authoritative Information"] {
        let base = serve_once(http(status, "", &body)).await;
        let reply = OpenAiClient::new(&config(base)).unwrap().complete(request()).await.unwrap();
        assert_eq!(reply.text.as_deref(), Some("proxied"), "{status}");
    }
}

#[tokio::test]
async fn test_rate_limit_honours_retry_after() {
    let base = serve_once(http("429 Too Many Requests", "Retry-After: 7\r\n", "{}")).await;
    let err = OpenAiClient::new(&config(base))
        .unwrap()
        .complete(request())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::RateLimited { retry_after_secs: 7 }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_auth_and_server_errors() {
    let base = serve_once(http("401 Unauthorized", "", "{}")).await;
    let err = OpenAiClient::new(&config(base))
        .unwrap()
        .complete(request())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::AuthError));
    assert!(!err.is_retryable());

    let base = serve_once(http("502 Bad Gateway", "", "upstream down")).await;
    let err = OpenAiClient::new(&config(base))
        .unwrap()
        .complete(request())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::ApiError { status: 502, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unreachable_endpoint_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let err = OpenAiClient::new(&config(format!("http://{addr}/v1")))
        .unwrap()
        .complete(request())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::NetworkError(_)));
    assert!(err.is_retryable());
}
