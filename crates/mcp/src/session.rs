//! A ready MCP session with a handler, plus the resources that keep it alive.

use std::sync::Arc;

use {
    async_trait::async_trait,
    serde_json::Value,
    tokio::sync::Mutex,
    tracing::{debug, info},
};

use crate::{
    client::McpClient,
    error::{Error, Result},
    http_transport::HttpTransport,
    registry::{HandlerConfig, TransportConfig},
    release::ReleaseList,
    traits::{McpClientTrait, McpTransport, SessionFactory},
    transport::{StdioCommand, StdioTransport},
    types::{McpToolDef, ToolsCallResult},
};

pub struct Session {
    handler: String,
    client: Arc<dyn McpClientTrait>,
    release: Mutex<Option<ReleaseList>>,
}

impl Session {
    pub fn new(
        handler: impl Into<String>,
        client: Arc<dyn McpClientTrait>,
        release: ReleaseList,
    ) -> Self {
        Self {
            handler: handler.into(),
            client,
            release: Mutex::new(Some(release)),
        }
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }

    pub async fn list_tools(&self) -> Result<Vec<McpToolDef>> {
        self.client.list_tools().await
    }

    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<ToolsCallResult> {
        self.client.call_tool(tool, arguments).await
    }

    /// Cheap liveness check (process running, socket open) before the tool
    /// listing probe.
    pub async fn is_alive(&self) -> bool {
        self.client.is_alive().await
    }

    /// Release every resource. Later calls do nothing.
    pub async fn close(&self) {
        let Some(release) = self.release.lock().await.take() else {
            return;
        };
        debug!(handler = %self.handler, resources = ?release.labels(), "closing session");
        release.release().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handler", &self.handler)
            .field("state", &self.client.state())
            .finish()
    }
}

/// Open the transport named by the handler's manifest and run the MCP
/// handshake over it. Anything acquired before a failure is released before
/// the error is returned.
pub async fn create_session(handler: &HandlerConfig) -> Result<Session> {
    info!(
        handler = %handler.name,
        transport = handler.transport.kind(),
        "creating handler session"
    );

    let mut release = ReleaseList::new();
    let transport = open_transport(handler, &mut release).await?;

    let client = match McpClient::connect(&handler.name, transport).await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            release.release().await;
            return Err(e);
        },
    };
    {
        let client = Arc::clone(&client);
        release.push("mcp client", move || async move { client.close() });
    }

    Ok(Session::new(handler.name.clone(), client, release))
}

async fn open_transport(
    handler: &HandlerConfig,
    release: &mut ReleaseList,
) -> Result<Arc<dyn McpTransport>> {
    let transport: Arc<dyn McpTransport> = match &handler.transport {
        TransportConfig::Stdio {
            command,
            args,
            env,
            cwd,
        } => {
            let launch = StdioCommand {
                command,
                args,
                env,
                cwd: cwd.as_deref(),
            };
            StdioTransport::spawn(launch, handler.timeout).await?
        },
        TransportConfig::Http { url, headers } => {
            HttpTransport::new(url, headers, handler.timeout)?
        },
        TransportConfig::Socket { url, headers } => open_socket(url, headers, handler).await?,
    };

    let label = match handler.transport {
        TransportConfig::Stdio { .. } => "handler process",
        TransportConfig::Http { .. } => "http session",
        TransportConfig::Socket { .. } => "websocket",
    };
    let owned = Arc::clone(&transport);
    release.push(label, move || async move { owned.kill().await });
    Ok(transport)
}

#[cfg(feature = "websocket")]
async fn open_socket(
    url: &str,
    headers: &std::collections::HashMap<String, String>,
    handler: &HandlerConfig,
) -> Result<Arc<dyn McpTransport>> {
    Ok(crate::ws_transport::WsTransport::connect(url, headers, handler.timeout).await?)
}

#[cfg(not(feature = "websocket"))]
async fn open_socket(
    _url: &str,
    _headers: &std::collections::HashMap<String, String>,
    handler: &HandlerConfig,
) -> Result<Arc<dyn McpTransport>> {
    Err(Error::UnsupportedTransport {
        transport: handler.transport.kind(),
    })
}

/// Builds sessions with [`create_session`].
#[derive(Debug, Default, Clone, Copy)]
pub struct McpSessionFactory;

#[async_trait]
impl SessionFactory for McpSessionFactory {
    async fn create(&self, handler: &HandlerConfig) -> Result<Session> {
        create_session(handler).await.map_err(|e| match e {
            Error::UnsupportedTransport { .. } => e,
            other => Error::external(format!("failed to start handler '{}'", handler.name), other),
        })
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        crate::{client::McpClientState, types::ToolContent},
        std::{collections::HashMap, time::Duration},
    };

    /// Minimal MCP server in POSIX sh: answers initialize, tools/list and
    /// tools/call, ignoring notifications.
    const FAKE_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","inputSchema":{}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"{\\"data\\":\\"pong\\",\\"error\\":null}"}]}}\n' "$id" ;;
  esac
done
"#;

    fn fake_handler() -> HandlerConfig {
        let mut cfg = HandlerConfig::new("fake", TransportConfig::Stdio {
            command: "sh".into(),
            args: vec!["-c".into(), FAKE_SERVER.into()],
            env: HashMap::new(),
            cwd: None,
        })
        .with_command("echo", "Echo");
        cfg.timeout = Duration::from_secs(5);
        cfg
    }

    #[tokio::test]
    async fn stdio_session_handshake_and_call() {
        let session = create_session(&fake_handler()).await.unwrap();
        assert!(session.is_alive().await);

        let tools = session.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "echo");

        let result = session
            .call_tool("echo", serde_json::json!({"text": "ping"}))
            .await
            .unwrap();
        assert!(
            matches!(&result.content[0], ToolContent::Text { text } if text == r#"{"data":"pong","error":null}"#)
        );

        session.close().await;
        assert!(!session.is_alive().await);
        session.close().await;
    }

    /// `ps` reports nothing for a reaped process and `Z` for an unreaped one.
    fn is_running(pid: &str) -> bool {
        let out = std::process::Command::new("ps")
            .args(["-o", "stat=", "-p", pid])
            .output()
            .unwrap();
        let stat = String::from_utf8_lossy(&out.stdout);
        let stat = stat.trim();
        !stat.is_empty() && !stat.starts_with('Z')
    }

    #[tokio::test]
    async fn failed_handshake_reaps_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("pid");
        let mut cfg = fake_handler();
        cfg.transport = TransportConfig::Stdio {
            command: "sh".into(),
            args: vec![
                "-c".into(),
                format!("echo $$ > '{}'; exec cat", pidfile.display()),
            ],
            env: HashMap::new(),
            cwd: None,
        };
        cfg.timeout = Duration::from_millis(200);
        // `cat` echoes the initialize request back; it carries no result.
        assert!(create_session(&cfg).await.is_err());

        let pid = std::fs::read_to_string(&pidfile).unwrap();
        let pid = pid.trim();
        assert!(!pid.is_empty());
        let mut running = is_running(pid);
        for _ in 0..50 {
            if !running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            running = is_running(pid);
        }
        assert!(!running, "handler process {pid} outlived the failed handshake");
    }

    #[tokio::test]
    async fn closed_session_reports_closed_client() {
        let session = create_session(&fake_handler()).await.unwrap();
        session.close().await;
        assert!(format!("{session:?}").contains(&format!("{:?}", McpClientState::Closed)));
    }

    #[tokio::test]
    async fn factory_wraps_spawn_failures() {
        let mut cfg = fake_handler();
        cfg.transport = TransportConfig::Stdio {
            command: "nonexistent_handler_xyz".into(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
        };
        let err = McpSessionFactory.create(&cfg).await.unwrap_err();
        assert!(err.to_string().contains("failed to start handler 'fake'"));
    }
}
