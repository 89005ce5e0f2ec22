use toolchat_provider::{
    ContentBlock, LlmMessage, LlmProvider, LlmRequest, OpenAiProvider, ToolChoice, ToolDef,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn mock_openai_response(text: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{
            "message": {"content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5}
    })
}

fn create_project_tool() -> ToolDef {
    ToolDef {
        name: "create_project".into(),
        description: "Create a new project.".into(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "description": {"type": "string"}
            },
            "required": ["name", "description"]
        }),
    }
}

fn hello_request() -> LlmRequest {
    LlmRequest {
        model: "gpt-4o-mini".into(),
        messages: vec![LlmMessage::user("hi")],
        max_tokens: 64,
        tools: vec![],
        tool_choice: None,
    }
}

#[tokio::test]
async fn openai_basic_chat_with_header_verification() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(header("content-type", "application/json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(mock_openai_response("Hello from OpenAI!")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("test-key", server.uri());
    let resp = provider
        .chat(LlmRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![LlmMessage::system("be helpful"), LlmMessage::user("hi")],
            max_tokens: 128,
            tools: vec![],
            tool_choice: None,
        })
        .await
        .unwrap();

    assert_eq!(resp.text, "Hello from OpenAI!");
    assert_eq!(resp.input_tokens, Some(10));
    assert_eq!(resp.output_tokens, Some(5));
}

#[tokio::test]
async fn openai_tool_calling_sends_auto_choice() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({"tool_choice": "auto"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_123",
                        "type": "function",
                        "function": {
                            "name": "create_project",
                            "arguments": "{\"name\":\"Test\",\"description\":\"A test\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 8}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("test-key", server.uri());
    let resp = provider
        .chat(LlmRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![LlmMessage::user(
                "Create a project called Test with description A test",
            )],
            max_tokens: 128,
            tools: vec![create_project_tool()],
            tool_choice: Some(ToolChoice::Auto),
        })
        .await
        .unwrap();

    assert_eq!(resp.tool_calls().len(), 1);
    match &resp.content[0] {
        ContentBlock::ToolUse { id, name, input } => {
            assert_eq!(id, "call_123");
            assert_eq!(name, "create_project");
            assert_eq!(input["name"], "Test");
            assert_eq!(input["description"], "A test");
        }
        other => panic!("expected ToolUse block, got {other:?}"),
    }
}

#[tokio::test]
async fn openai_error_body_is_surfaced() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "error": {"type": "server_error", "message": "upstream exploded"}
        })))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("test-key", server.uri());
    let err = provider
        .chat(hello_request())
        .await
        .unwrap_err();

    let msg = err.to_string();
    assert!(msg.contains("500"));
    assert!(msg.contains("[retryable]"));
    assert!(msg.contains("upstream exploded"));
}

#[tokio::test]
async fn openai_trailing_slash_in_base_is_trimmed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_openai_response("ok")))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("test-key", format!("{}/", server.uri()));
    let resp = provider
        .chat(hello_request())
        .await
        .unwrap();
    assert_eq!(resp.text, "ok");
}
