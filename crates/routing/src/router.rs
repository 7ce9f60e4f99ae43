use std::sync::Arc;

use {
    catmandu_accumulator::AccumulatorManager,
    catmandu_common::{ChatId, InboundMessage, OutboundReply},
    catmandu_mcp::{HandlerConfig, HandlerRegistry, ToolArguments},
    tracing::{error, info, warn},
};

use crate::{
    chat_log::{ChatLogEntry, ChatLogger, MessageKind},
    command::{ParsedCommand, SystemCommand, parse},
    invoker::HandlerInvoker,
};

/// Reply for any failed invocation. Details stay in the logs.
pub const GENERIC_FAILURE: &str = "An error occurred while executing the command.";

/// Reply when a handler succeeds with empty `data`.
pub const NO_OUTPUT: &str = "✅ Command completed without output.";

pub struct CommandRouter {
    registry: Arc<HandlerRegistry>,
    accumulator: Arc<AccumulatorManager>,
    invoker: Arc<dyn HandlerInvoker>,
    chat_log: Option<ChatLogger>,
}

impl CommandRouter {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        accumulator: Arc<AccumulatorManager>,
        invoker: Arc<dyn HandlerInvoker>,
    ) -> Self {
        Self {
            registry,
            accumulator,
            invoker,
            chat_log: None,
        }
    }

    /// Record every routed message to `chat_log`.
    pub fn with_chat_log(mut self, chat_log: ChatLogger) -> Self {
        self.chat_log = Some(chat_log);
        self
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn accumulator(&self) -> &Arc<AccumulatorManager> {
        &self.accumulator
    }

    /// Handle one inbound message. `None` means nothing should be sent back.
    pub async fn route(&self, message: &InboundMessage) -> Option<OutboundReply> {
        let chat_id = message.chat_id;
        let (text, entry) = match parse(&message.text) {
            ParsedCommand::System(command) => {
                let text = self.run_system(command, chat_id);
                let entry = ChatLogEntry::new(message, MessageKind::Command)
                    .command(command.name())
                    .response(&text);
                (Some(text), entry)
            },
            ParsedCommand::Handler {
                full_command,
                handler,
                tool,
                trailing,
            } => {
                let entry = ChatLogEntry::new(message, MessageKind::Command);
                let (text, entry) =
                    match self.resolve_command(message, full_command, handler, tool) {
                        Some(config) => (
                            self.run_handler(message, config, tool, trailing).await,
                            entry.command(tool).handler(config.name.as_str()),
                        ),
                        None => {
                            let entry = entry.command(full_command);
                            let entry = match handler {
                                Some(handler) => entry.handler(handler),
                                None => entry,
                            };
                            (format!("Command not found: {full_command}"), entry)
                        },
                    };
                let entry = entry.response(&text);
                (Some(text), entry)
            },
            ParsedCommand::PlainText(text) => {
                let reply = self.accumulator.process_message(chat_id, text);
                let entry = ChatLogEntry::new(message, MessageKind::Message);
                (reply, entry)
            },
        };
        self.record(&entry).await;
        Some(OutboundReply {
            chat_id,
            text: text?,
        })
    }

    async fn record(&self, entry: &ChatLogEntry) {
        let Some(chat_log) = &self.chat_log else {
            return;
        };
        if let Err(e) = chat_log.record(entry).await {
            warn!(
                chat_id = %entry.chat_id,
                dir = %chat_log.dir().display(),
                error = %e,
                "failed to write chat log"
            );
        }
    }

    fn run_system(&self, command: SystemCommand, chat_id: ChatId) -> String {
        info!(chat_id = %chat_id, command = command.name(), "system command");
        match command {
            SystemCommand::ClearAccumulator => self.accumulator.clear(chat_id),
            SystemCommand::ShowAccumulator => self.accumulator.list(chat_id),
            SystemCommand::AccumulatorStatus => self.accumulator.status(chat_id),
        }
    }

    fn resolve_command(
        &self,
        message: &InboundMessage,
        full_command: &str,
        handler: Option<&str>,
        tool: &str,
    ) -> Option<&Arc<HandlerConfig>> {
        let chat_id = message.chat_id;
        info!(
            chat_id = %chat_id,
            full_command,
            handler = handler.unwrap_or_default(),
            tool,
            "processing command"
        );
        let found = match handler {
            Some(handler) => self.registry.find_by_handler_and_tool(handler, tool),
            None => self.registry.find_by_command(tool),
        };
        if found.is_none() {
            warn!(chat_id = %chat_id, full_command, "command not found");
        }
        found
    }

    async fn run_handler(
        &self,
        message: &InboundMessage,
        config: &HandlerConfig,
        tool: &str,
        trailing: &str,
    ) -> String {
        let chat_id = message.chat_id;

        // Consumed before invoking so a failed command does not replay them.
        let params = self.accumulator.extract_and_clear(chat_id);
        let args = ToolArguments::new(trailing, params);

        match self
            .invoker
            .invoke(config, tool, args, message.sender.identity())
            .await
        {
            Ok(result) => match result.error {
                Some(reason) => {
                    error!(
                        chat_id = %chat_id,
                        handler = %config.name,
                        tool,
                        error = %reason,
                        "handler reported an error"
                    );
                    GENERIC_FAILURE.to_string()
                },
                None if result.data.is_empty() => NO_OUTPUT.to_string(),
                None => result.data,
            },
            Err(e) => {
                error!(
                    chat_id = %chat_id,
                    handler = %config.name,
                    tool,
                    error = %e,
                    "handler invocation failed"
                );
                GENERIC_FAILURE.to_string()
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        catmandu_accumulator::Accumulator,
        catmandu_common::Sender,
        catmandu_mcp::{InvocationError, InvocationResult, TransportConfig},
        serde_json::{Value, json},
        std::{collections::HashMap, sync::Mutex, time::Duration},
    };

    type Outcome = Result<InvocationResult, InvocationError>;

    struct FixedInvoker {
        outcome: Mutex<Option<Outcome>>,
        callers: Mutex<Vec<Option<String>>>,
    }

    impl FixedInvoker {
        fn new(outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                outcome: Mutex::new(Some(outcome)),
                callers: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HandlerInvoker for FixedInvoker {
        async fn invoke(
            &self,
            _handler: &HandlerConfig,
            _tool: &str,
            _args: ToolArguments,
            caller: Option<&str>,
        ) -> Outcome {
            self.callers.lock().unwrap().push(caller.map(str::to_owned));
            self.outcome.lock().unwrap().take().expect("invoked once")
        }
    }

    fn router(invoker: Arc<dyn HandlerInvoker>, feedback: bool) -> CommandRouter {
        let mut registry = HandlerRegistry::new();
        registry.insert(
            HandlerConfig::new("echo", TransportConfig::Stdio {
                command: "true".into(),
                args: vec![],
                env: HashMap::new(),
                cwd: None,
            })
            .with_command("echo", "Echo back"),
        );
        let accumulator = AccumulatorManager::new(Arc::new(Accumulator::new(10, 1000)), feedback);
        CommandRouter::new(Arc::new(registry), Arc::new(accumulator), invoker)
    }

    fn msg(text: &str) -> InboundMessage {
        InboundMessage::new(7, Sender::with_username("alice"), text)
    }

    async fn reply(router: &CommandRouter, text: &str) -> Option<String> {
        router.route(&msg(text)).await.map(|r| r.text)
    }

    #[tokio::test]
    async fn plain_text_feedback_follows_the_flag() {
        let invoker = FixedInvoker::new(Ok(InvocationResult::ok("x")));

        let quiet = router(invoker.clone(), false);
        assert_eq!(reply(&quiet, "hello").await, None);
        assert_eq!(quiet.accumulator().accumulator().count(ChatId(7)), 1);

        let chatty = router(invoker, true);
        let text = reply(&chatty, "hello").await.unwrap();
        assert!(text.contains("1 message"));
    }

    #[tokio::test]
    async fn system_commands_act_on_the_accumulator() {
        let router = router(FixedInvoker::new(Ok(InvocationResult::ok("x"))), false);
        reply(&router, "first").await;
        reply(&router, "second").await;

        let status = reply(&router, "/accumulator_status").await.unwrap();
        assert!(status.contains("2 messages"));

        let listing = reply(&router, "/show_accumulator").await.unwrap();
        assert!(listing.contains("1. first"));
        assert!(listing.contains("2. second"));

        let cleared = reply(&router, "/clear_accumulator").await.unwrap();
        assert!(cleared.contains("Cleared 2"));
        assert_eq!(router.accumulator().accumulator().count(ChatId(7)), 0);
    }

    #[tokio::test]
    async fn handler_data_is_the_reply() {
        let invoker = FixedInvoker::new(Ok(InvocationResult::ok("pong")));
        let router = router(invoker.clone(), false);
        assert_eq!(reply(&router, "/echo_echo ping").await.as_deref(), Some("pong"));
        assert_eq!(invoker.callers.lock().unwrap().as_slice(), [Some("alice".to_string())]);
    }

    #[tokio::test]
    async fn legacy_bare_tool_resolves_by_command() {
        let router = router(FixedInvoker::new(Ok(InvocationResult::ok("pong"))), false);
        assert_eq!(reply(&router, "/echo").await.as_deref(), Some("pong"));
    }

    #[tokio::test]
    async fn empty_data_gets_a_placeholder() {
        let router = router(FixedInvoker::new(Ok(InvocationResult::ok(""))), false);
        assert_eq!(reply(&router, "/echo_echo").await.as_deref(), Some(NO_OUTPUT));
    }

    #[tokio::test]
    async fn handler_error_field_is_hidden_from_the_chat() {
        let outcome = Ok(InvocationResult {
            data: String::new(),
            error: Some("backend down".into()),
        });
        let router = router(FixedInvoker::new(outcome), false);
        assert_eq!(
            reply(&router, "/echo_echo").await.as_deref(),
            Some(GENERIC_FAILURE)
        );
    }

    #[tokio::test]
    async fn invocation_errors_become_the_generic_failure() {
        let outcome = Err(InvocationError::Timeout {
            handler: "echo".into(),
            tool: "echo".into(),
            timeout: Duration::from_secs(1),
        });
        let router = router(FixedInvoker::new(outcome), false);
        assert_eq!(
            reply(&router, "/echo_echo").await.as_deref(),
            Some(GENERIC_FAILURE)
        );
    }

    #[tokio::test]
    async fn anonymous_sender_is_passed_as_none() {
        let invoker = FixedInvoker::new(Ok(InvocationResult::ok("ok")));
        let router = router(invoker.clone(), false);
        let message = InboundMessage::new(7, Sender::default(), "/echo_echo");
        router.route(&message).await;
        assert_eq!(invoker.callers.lock().unwrap().as_slice(), [None]);
    }

    #[tokio::test]
    async fn unknown_handler_or_tool_is_not_found() {
        let router = router(FixedInvoker::new(Ok(InvocationResult::ok("x"))), false);
        assert_eq!(
            reply(&router, "/echo_missing").await.as_deref(),
            Some("Command not found: echo_missing")
        );
        assert_eq!(
            reply(&router, "/other_echo arg").await.as_deref(),
            Some("Command not found: other_echo")
        );
    }

    fn logged(dir: &std::path::Path) -> Vec<Value> {
        let day = chrono::Local::now().format("%Y-%m-%d");
        std::fs::read_to_string(dir.join(format!("{day}.jsonl")))
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn every_branch_is_written_to_the_chat_log() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(FixedInvoker::new(Ok(InvocationResult::ok("pong"))), false)
            .with_chat_log(ChatLogger::new(dir.path()).unwrap());

        reply(&router, "hello").await;
        reply(&router, "/accumulator_status").await;
        reply(&router, "/echo_echo ping").await;
        reply(&router, "/other_echo").await;

        let entries = logged(dir.path());
        assert_eq!(entries.len(), 4);

        assert_eq!(entries[0]["message_type"], json!("message"));
        assert_eq!(entries[0]["participant_name"], json!("@alice"));
        assert!(entries[0].get("response_length").is_none());

        assert_eq!(entries[1]["command"], json!("accumulator_status"));
        assert!(entries[1]["response_length"].as_u64().unwrap() > 0);

        assert_eq!(entries[2]["command"], json!("echo"));
        assert_eq!(entries[2]["cattackle_name"], json!("echo"));
        assert_eq!(entries[2]["response_length"], json!(4));

        assert_eq!(entries[3]["command"], json!("other_echo"));
        assert_eq!(entries[3]["cattackle_name"], json!("other"));
        assert_eq!(
            entries[3]["response_length"],
            json!("Command not found: other_echo".len())
        );
    }

    #[tokio::test]
    async fn unwritable_chat_log_does_not_change_replies() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("chats");
        let router = router(FixedInvoker::new(Ok(InvocationResult::ok("pong"))), false)
            .with_chat_log(ChatLogger::new(&logs).unwrap());
        std::fs::remove_dir(&logs).unwrap();

        assert_eq!(reply(&router, "/echo_echo ping").await.as_deref(), Some("pong"));
        assert_eq!(reply(&router, "hello").await, None);
        assert_eq!(router.accumulator().accumulator().count(ChatId(7)), 1);
    }
}
