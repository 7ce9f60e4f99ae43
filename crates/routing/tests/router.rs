#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use {
    async_trait::async_trait,
    catmandu_accumulator::{Accumulator, AccumulatorManager},
    catmandu_common::{ChatId, InboundMessage, Sender},
    catmandu_mcp::{
        HandlerConfig, HandlerRegistry, InvocationError, InvocationResult, ToolArguments,
        TransportConfig,
    },
    catmandu_routing::{CommandRouter, GENERIC_FAILURE, HandlerInvoker},
    serde_json::{Value, json},
};

#[derive(Debug)]
struct Call {
    handler: String,
    tool: String,
    payload: Value,
}

/// Records every payload; fails when `fail` is set.
#[derive(Default)]
struct RecordingInvoker {
    calls: Mutex<Vec<Call>>,
    fail: bool,
}

#[async_trait]
impl HandlerInvoker for RecordingInvoker {
    async fn invoke(
        &self,
        handler: &HandlerConfig,
        tool: &str,
        args: ToolArguments,
        _caller: Option<&str>,
    ) -> Result<InvocationResult, InvocationError> {
        self.calls.lock().unwrap().push(Call {
            handler: handler.name.clone(),
            tool: tool.to_string(),
            payload: Value::Object(args.into_map()),
        });
        if self.fail {
            return Err(InvocationError::Validation {
                handler: handler.name.clone(),
                tool: tool.to_string(),
                detail: "missing field".into(),
            });
        }
        Ok(InvocationResult::ok(format!("handled by {}", handler.name)))
    }
}

fn stdio(name: &str) -> HandlerConfig {
    HandlerConfig::new(name, TransportConfig::Stdio {
        command: "true".into(),
        args: vec![],
        env: HashMap::new(),
        cwd: None,
    })
}

fn setup(invoker: Arc<RecordingInvoker>) -> CommandRouter {
    let mut registry = HandlerRegistry::new();
    registry.insert(stdio("echo").with_command("echo", "Echo").with_command("joke", "Joke"));
    registry.insert(stdio("notion").with_command("to_notion", "Save to Notion"));
    let accumulator = AccumulatorManager::new(Arc::new(Accumulator::new(100, 1000)), true);
    CommandRouter::new(Arc::new(registry), Arc::new(accumulator), invoker)
}

fn from_alice(text: &str) -> InboundMessage {
    InboundMessage::new(42, Sender::with_username("alice"), text)
}

fn held(router: &CommandRouter) -> Vec<String> {
    router.accumulator().accumulator().get_all(ChatId(42))
}

#[tokio::test]
async fn command_consumes_accumulated_messages() {
    let invoker = Arc::new(RecordingInvoker::default());
    let router = setup(invoker.clone());

    router.route(&from_alice("a")).await;
    router.route(&from_alice("b")).await;
    let reply = router.route(&from_alice("/echo_echo hello")).await.unwrap();

    assert_eq!(reply.chat_id, ChatId(42));
    assert_eq!(reply.text, "handled by echo");
    assert!(held(&router).is_empty());

    let calls = invoker.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].handler, "echo");
    assert_eq!(calls[0].tool, "echo");
    assert_eq!(
        calls[0].payload,
        json!({"text": "hello", "accumulated_params": ["a", "b"]})
    );
}

#[tokio::test]
async fn failed_command_still_consumes_accumulated_messages() {
    let invoker = Arc::new(RecordingInvoker {
        fail: true,
        ..Default::default()
    });
    let router = setup(invoker.clone());

    router.route(&from_alice("a")).await;
    router.route(&from_alice("b")).await;
    let reply = router.route(&from_alice("/echo_echo hello")).await.unwrap();

    assert_eq!(reply.text, GENERIC_FAILURE);
    assert!(held(&router).is_empty());
    assert_eq!(invoker.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_command_leaves_the_accumulator_alone() {
    let invoker = Arc::new(RecordingInvoker::default());
    let router = setup(invoker.clone());

    router.route(&from_alice("keep me")).await;
    let reply = router
        .route(&from_alice("/nonexistent_command"))
        .await
        .unwrap();

    assert_eq!(reply.text, "Command not found: nonexistent_command");
    assert_eq!(held(&router), ["keep me"]);
    assert!(invoker.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn tool_names_may_contain_underscores() {
    let invoker = Arc::new(RecordingInvoker::default());
    let router = setup(invoker.clone());

    let reply = router
        .route(&from_alice("/notion_to_notion Weekly notes"))
        .await
        .unwrap();

    assert_eq!(reply.text, "handled by notion");
    let calls = invoker.calls.lock().unwrap();
    assert_eq!(calls[0].tool, "to_notion");
    assert_eq!(
        calls[0].payload,
        json!({"text": "Weekly notes", "accumulated_params": []})
    );
}

#[tokio::test]
async fn chats_do_not_share_accumulators() {
    let invoker = Arc::new(RecordingInvoker::default());
    let router = setup(invoker.clone());

    router.route(&from_alice("mine")).await;
    router
        .route(&InboundMessage::new(99, Sender::default(), "theirs"))
        .await;
    router.route(&from_alice("/joke")).await;

    let calls = invoker.calls.lock().unwrap();
    assert_eq!(calls[0].payload["accumulated_params"], json!(["mine"]));
    assert_eq!(
        router.accumulator().accumulator().get_all(ChatId(99)),
        ["theirs"]
    );
}
