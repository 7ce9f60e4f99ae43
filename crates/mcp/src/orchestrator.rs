//! Session cache and retrying invocation of handler tools.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use {
    serde_json::{Map, Value},
    tokio::sync::Mutex,
    tracing::{Instrument, debug, error, info, info_span, warn},
    uuid::Uuid,
};

use crate::{
    error::{Error, ErrorClass, InvocationError, McpTransportError},
    registry::HandlerConfig,
    session::{McpSessionFactory, Session},
    traits::SessionFactory,
    types::{InvocationResult, ToolContent, ToolsCallResult},
};

/// Identity injected as `extra.username` when the caller has none.
pub const UNKNOWN_CALLER: &str = "undefined";

/// `error` reported when a handler answers with no content at all.
pub const EMPTY_RESPONSE: &str = "empty response from handler";

/// Lowercased substrings that mark a handler's raw reply as a rejection of
/// the caller's input rather than a broken handler. Best effort only.
const VALIDATION_HINTS: &[&str] = &["validation error", "required property"];

const DETAIL_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(backoff_base: Duration) -> Self {
        Self { backoff_base }
    }

    /// Sleep before retry number `attempt` (1-based): `base * 2^attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

type Slot = Arc<Mutex<Option<Arc<Session>>>>;

/// Owns at most one live session per handler and runs invocations against
/// it.
///
/// Each handler name has its own async lock, held only while a session is
/// looked up, probed or created. Tool calls run outside it on a shared
/// handle, so slow handlers never block unrelated ones.
pub struct SessionOrchestrator {
    factory: Arc<dyn SessionFactory>,
    policy: RetryPolicy,
    slots: StdMutex<HashMap<String, Slot>>,
}

impl Default for SessionOrchestrator {
    fn default() -> Self {
        Self::new(Arc::new(McpSessionFactory), RetryPolicy::default())
    }
}

impl SessionOrchestrator {
    pub fn new(factory: Arc<dyn SessionFactory>, policy: RetryPolicy) -> Self {
        Self {
            factory,
            policy,
            slots: StdMutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Invoke `tool` with the handler's own timeout and retry budget.
    pub async fn invoke(
        &self,
        handler: &HandlerConfig,
        tool: &str,
        args: Map<String, Value>,
        caller: Option<&str>,
    ) -> Result<InvocationResult, InvocationError> {
        self.invoke_with(
            handler,
            tool,
            args,
            handler.timeout,
            handler.max_retries,
            caller,
        )
        .await
    }

    /// Invoke `tool`, retrying transport failures and timeouts up to
    /// `max_retries` times with exponential backoff. Malformed or rejected
    /// replies are returned immediately.
    pub async fn invoke_with(
        &self,
        handler: &HandlerConfig,
        tool: &str,
        args: Map<String, Value>,
        timeout: Duration,
        max_retries: u32,
        caller: Option<&str>,
    ) -> Result<InvocationResult, InvocationError> {
        let span = info_span!(
            "invocation",
            invocation_id = %Uuid::new_v4(),
            handler = %handler.name,
            tool = %tool,
        );
        let arguments = with_caller(args, caller);
        self.run(handler, tool, arguments, timeout, max_retries)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        handler: &HandlerConfig,
        tool: &str,
        arguments: Value,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<InvocationResult, InvocationError> {
        let mut attempt: u32 = 0;
        loop {
            let failure = match self.attempt(handler, tool, &arguments, timeout).await {
                Ok(result) => {
                    info!(attempts = attempt + 1, "invocation succeeded");
                    return Ok(result);
                },
                Err(e) if e.class() == ErrorClass::Terminal => {
                    error!(error = %e, "invocation failed");
                    return Err(e);
                },
                Err(e) => e,
            };

            attempt += 1;
            if attempt > max_retries {
                let err = InvocationError::Execution {
                    handler: handler.name.clone(),
                    tool: tool.to_string(),
                    attempts: attempt,
                    last: Box::new(failure),
                };
                error!(error = %err, "retries exhausted");
                return Err(err);
            }

            let delay = self.policy.delay(attempt);
            warn!(
                attempt,
                max_retries,
                error = %failure,
                delay = ?delay,
                "invocation attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        handler: &HandlerConfig,
        tool: &str,
        arguments: &Value,
        timeout: Duration,
    ) -> Result<InvocationResult, InvocationError> {
        let session = self.get_or_create(handler, tool, timeout).await?;

        let result = match tokio::time::timeout(timeout, session.call_tool(tool, arguments.clone()))
            .await
        {
            Ok(Ok(result)) => result,
            // The transport's own request deadline equals ours and usually fires first.
            Ok(Err(Error::Transport(McpTransportError::RequestTimeout { .. }))) | Err(_) => {
                // The remote call may still be running; only our wait ends here.
                self.evict(&handler.name, &session).await;
                return Err(InvocationError::Timeout {
                    handler: handler.name.clone(),
                    tool: tool.to_string(),
                    timeout,
                });
            },
            Ok(Err(source)) => {
                self.evict(&handler.name, &session).await;
                return Err(InvocationError::Transport {
                    handler: handler.name.clone(),
                    tool: tool.to_string(),
                    source,
                });
            },
        };

        parse_result(&handler.name, tool, result)
    }

    fn slot(&self, handler: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(handler.to_string()).or_default())
    }

    fn all_slots(&self) -> Vec<(String, Slot)> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect()
    }

    /// Reuse the cached session if it still answers `tools/list`, otherwise
    /// close it and start a new one.
    async fn get_or_create(
        &self,
        handler: &HandlerConfig,
        tool: &str,
        probe_timeout: Duration,
    ) -> Result<Arc<Session>, InvocationError> {
        let slot = self.slot(&handler.name);
        let mut cached = slot.lock().await;

        if let Some(session) = cached.as_ref() {
            if probe(session, probe_timeout).await {
                debug!("reusing cached session");
                return Ok(Arc::clone(session));
            }
            info!("cached session failed health check, replacing");
            if let Some(stale) = cached.take() {
                stale.close().await;
            }
        }

        let session = self
            .factory
            .create(handler)
            .await
            .map(Arc::new)
            .map_err(|e| match e {
                Error::UnsupportedTransport { transport } => InvocationError::TransportUnsupported {
                    handler: handler.name.clone(),
                    transport,
                },
                source => InvocationError::Transport {
                    handler: handler.name.clone(),
                    tool: tool.to_string(),
                    source,
                },
            })?;
        *cached = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Drop `session` from the cache if it is still the cached one, then
    /// close it.
    async fn evict(&self, handler: &str, session: &Arc<Session>) {
        let slot = self.slot(handler);
        let stale = {
            let mut cached = slot.lock().await;
            if cached.as_ref().is_some_and(|c| Arc::ptr_eq(c, session)) {
                cached.take()
            } else {
                None
            }
        };
        if let Some(stale) = stale {
            debug!(handler = %handler, "evicting session");
            stale.close().await;
        }
    }

    /// Close and forget the cached session for `handler`, if any.
    pub async fn close_session(&self, handler: &str) -> bool {
        let slot = self.slot(handler);
        let taken = slot.lock().await.take();
        match taken {
            Some(session) => {
                session.close().await;
                info!(handler = %handler, "closed handler session");
                true
            },
            None => false,
        }
    }

    /// Close every cached session.
    pub async fn close_all(&self) {
        for (name, slot) in self.all_slots() {
            let taken = slot.lock().await.take();
            if let Some(session) = taken {
                session.close().await;
                info!(handler = %name, "closed handler session");
            }
        }
    }

    /// Names of handlers with a cached session, sorted.
    pub async fn cached_handlers(&self) -> Vec<String> {
        let mut names = Vec::new();
        for (name, slot) in self.all_slots() {
            if slot.lock().await.is_some() {
                names.push(name);
            }
        }
        names.sort();
        names
    }
}

async fn probe(session: &Session, timeout: Duration) -> bool {
    if !session.is_alive().await {
        return false;
    }
    match tokio::time::timeout(timeout, session.list_tools()).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "health probe failed");
            false
        },
        Err(_) => {
            debug!("health probe timed out");
            false
        },
    }
}

/// Add `extra.username` to the caller's arguments.
fn with_caller(mut args: Map<String, Value>, caller: Option<&str>) -> Value {
    let username = Value::String(caller.unwrap_or(UNKNOWN_CALLER).to_string());
    if let Some(Value::Object(extra)) = args.get_mut("extra") {
        extra.insert("username".into(), username);
    } else {
        let mut extra = Map::new();
        extra.insert("username".into(), username);
        args.insert("extra".into(), Value::Object(extra));
    }
    Value::Object(args)
}

fn parse_result(
    handler: &str,
    tool: &str,
    result: ToolsCallResult,
) -> Result<InvocationResult, InvocationError> {
    if result.is_error {
        debug!("handler flagged its reply as an error");
    }

    let Some(first) = result.content.into_iter().next() else {
        warn!("handler returned no content");
        return Ok(InvocationResult {
            data: String::new(),
            error: Some(EMPTY_RESPONSE.into()),
        });
    };

    let ToolContent::Text { text } = first else {
        return Err(InvocationError::ResponseFormat {
            handler: handler.to_string(),
            tool: tool.to_string(),
            detail: "first content element is not text".into(),
        });
    };

    match serde_json::from_str::<InvocationResult>(&text) {
        Ok(parsed) => Ok(parsed),
        Err(_) if looks_like_validation_error(&text) => Err(InvocationError::Validation {
            handler: handler.to_string(),
            tool: tool.to_string(),
            detail: preview(&text),
        }),
        Err(e) => Err(InvocationError::ResponseFormat {
            handler: handler.to_string(),
            tool: tool.to_string(),
            detail: format!("{e}; raw reply: {}", preview(&text)),
        }),
    }
}

fn looks_like_validation_error(text: &str) -> bool {
    let lower = text.to_lowercase();
    VALIDATION_HINTS.iter().any(|hint| lower.contains(hint))
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(DETAIL_PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
