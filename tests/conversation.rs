//! End-to-end tool loop against an in-memory transport.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use groq_chat::inference::transport::{ByteStream, HttpRequest, TransportResponse};
use groq_chat::inference::types::ToolCall;
use groq_chat::{
    AgentError, ChatError, ClientConfig, CompletionClient, Message, Orchestrator,
    OrchestratorConfig, Role, ToolDispatcher, ToolRegistry, Transport,
};

/// Answers each request with the next queued JSON body and keeps every
/// request body for inspection.
#[derive(Default)]
struct FakeGroq {
    replies: Mutex<VecDeque<(u16, String)>>,
    bodies: Mutex<Vec<Value>>,
}

impl FakeGroq {
    fn reply(&self, status: u16, body: Value) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .push_back((status, body.to_string()));
        self
    }

    fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeGroq {
    async fn send(&self, request: HttpRequest) -> Result<TransportResponse, ChatError> {
        if let Some(body) = &request.body {
            self.bodies
                .lock()
                .unwrap()
                .push(serde_json::from_slice(body).unwrap());
        }
        let (status, text) = self.replies.lock().unwrap().pop_front().ok_or_else(|| {
            ChatError::Transport {
                endpoint: request.path.clone(),
                reason: "fake has no reply queued".into(),
            }
        })?;
        // Deliver in small pieces to exercise incremental reads.
        let chunks: Vec<Result<Bytes, ChatError>> = text
            .into_bytes()
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let body: ByteStream = Box::pin(stream::iter(chunks));
        Ok(TransportResponse { status, body })
    }
}

fn tool_call_reply(calls: Value) -> Value {
    json!({
        "id": "chatcmpl-1",
        "model": "mixtral-8x7b-32768",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": null, "tool_calls": calls},
            "finish_reason": "tool_calls"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    })
}

fn text_reply(text: &str) -> Value {
    json!({
        "choices": [{
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }]
    })
}

fn calculator() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register_fn(
            "add",
            "Add two integers",
            json!({
                "type": "object",
                "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}}
            }),
            |args| async move {
                let v: Value = serde_json::from_str(&args)?;
                let sum = v["a"].as_i64().unwrap_or(0) + v["b"].as_i64().unwrap_or(0);
                Ok::<_, anyhow::Error>(sum.to_string())
            },
        )
        .unwrap();
    registry
        .register_fn(
            "shout",
            "Upper-case a string",
            json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            |args| async move {
                let v: Value = serde_json::from_str(&args)?;
                let text = v["text"]
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("text must be a string"))?;
                Ok::<_, anyhow::Error>(text.to_uppercase())
            },
        )
        .unwrap();
    registry
}

fn orchestrator(fake: &Arc<FakeGroq>, config: OrchestratorConfig) -> Orchestrator {
    let client = CompletionClient::new(fake.clone(), &ClientConfig::new("gsk_test"));
    Orchestrator::new(Arc::new(client), config)
}

#[tokio::test]
async fn test_two_rounds_then_answer() {
    let fake = Arc::new(FakeGroq::default());
    fake.reply(
        200,
        tool_call_reply(json!([
            {"id": "c1", "type": "function", "function": {"name": "add", "arguments": "{\"a\":1,\"b\":2}"}},
            {"id": "c2", "type": "function", "function": {"name": "shout", "arguments": "{\"text\":\"hi\"}"}}
        ])),
    )
    .reply(
        200,
        tool_call_reply(json!([
            {"id": "c3", "type": "function", "function": {"name": "shout", "arguments": "{\"text\":42}"}}
        ])),
    )
    .reply(200, text_reply("3 and HI"));

    let config = OrchestratorConfig {
        concurrent_tools: true,
        ..Default::default()
    };
    let outcome = orchestrator(&fake, config)
        .run(
            "You are a calculator.",
            "add 1 and 2, shout hi",
            &calculator(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.answer, "3 and HI");
    assert_eq!(outcome.rounds, 2);

    let bodies = fake.bodies();
    assert_eq!(bodies.len(), 3);
    assert_eq!(bodies[0]["model"], "mixtral-8x7b-32768");
    assert_eq!(bodies[0]["tools"].as_array().unwrap().len(), 2);

    // Round one results follow the assistant message in call order.
    let second = bodies[1]["messages"].as_array().unwrap();
    assert_eq!(second.len(), 5);
    assert_eq!(second[3]["tool_call_id"], "c1");
    assert_eq!(second[3]["content"], "3");
    assert_eq!(second[4]["tool_call_id"], "c2");
    assert_eq!(second[4]["content"], "HI");

    // The handler failure in round two is reported to the model, not raised.
    let third = bodies[2]["messages"].as_array().unwrap();
    let failure: Value = serde_json::from_str(third[6]["content"].as_str().unwrap()).unwrap();
    assert!(failure["error"]
        .as_str()
        .unwrap()
        .contains("text must be a string"));

    assert_eq!(outcome.messages.len(), 8);
    assert_eq!(outcome.messages.last().unwrap().role, Role::Assistant);
}

#[tokio::test]
async fn test_model_that_never_stops_hits_the_bound() {
    let fake = Arc::new(FakeGroq::default());
    for i in 0..10 {
        fake.reply(
            200,
            tool_call_reply(json!([
                {"id": format!("c{i}"), "type": "function", "function": {"name": "add", "arguments": "{}"}}
            ])),
        );
    }
    let config = OrchestratorConfig {
        max_tool_rounds: 3,
        ..Default::default()
    };

    let err = orchestrator(&fake, config)
        .run_conversation("sys", "go", &calculator(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::RoundLimitExceeded { max_rounds: 3 }));
    assert_eq!(fake.bodies().len(), 4);
}

#[tokio::test]
async fn test_api_error_surfaces_with_body() {
    let fake = Arc::new(FakeGroq::default());
    fake.reply(400, json!({"error": {"message": "model_not_found"}}));

    let err = orchestrator(&fake, OrchestratorConfig::default())
        .run_conversation("sys", "hi", &ToolRegistry::new(), &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        AgentError::Client(ChatError::Api { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.contains("model_not_found"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_dispatcher_is_usable_on_its_own() {
    let registry = calculator();
    let message = Message::assistant_tool_calls(vec![
        ToolCall::function("x", "shout", r#"{"text":"a"}"#),
        ToolCall::function("y", "missing", "{}"),
    ]);

    let results = ToolDispatcher::new(&registry)
        .dispatch(&message, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(results[0], Message::tool_result("x", "shout", "A"));
    assert_eq!(results[1].tool_call_id.as_deref(), Some("y"));
    assert!(results[1].text().contains("tool not found"));
}

#[tokio::test]
async fn test_streamed_completion_over_fake_transport() {
    let fake = Arc::new(FakeGroq::default());
    fake.replies.lock().unwrap().push_back((
        200,
        concat!(
            ": keep-alive\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"str\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"eamed\"}}]}\n\n",
            "data: [DONE]\n\n",
        )
        .to_string(),
    ));
    let client = CompletionClient::new(fake.clone(), &ClientConfig::new("gsk_test"));
    let request = client.request(vec![Message::user("go")]);

    let stream = client
        .complete_streaming(&request, &CancellationToken::new())
        .await
        .unwrap();
    let contents: Vec<String> = stream
        .into_stream()
        .map(|event| event.unwrap().content().unwrap_or_default().to_string())
        .collect()
        .await;
    assert_eq!(contents, vec!["str", "eamed"]);
    assert_eq!(fake.bodies()[0]["stream"], true);
}
