//! Stdio transport: spawn a handler process and speak newline-delimited
//! JSON-RPC over its stdin/stdout.

use std::{collections::HashMap, path::Path, process::Stdio, sync::Arc, time::Duration};

use {
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        process::{Child, ChildStdin, Command},
        sync::Mutex,
        task::JoinHandle,
    },
    tracing::{debug, info, trace, warn},
};

use crate::{
    error::{Context, Result},
    pending::PendingRequests,
    traits::McpTransport,
    types::{JsonRpcNotification, JsonRpcResponse},
};

/// What to launch for a stdio handler.
#[derive(Debug, Clone, Copy)]
pub struct StdioCommand<'a> {
    pub command: &'a str,
    pub args: &'a [String],
    /// Merged over the inherited environment.
    pub env: &'a HashMap<String, String>,
    pub cwd: Option<&'a Path>,
}

pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pending: Arc<PendingRequests>,
    request_timeout: Duration,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawn the handler process and start the reader loop.
    pub async fn spawn(launch: StdioCommand<'_>, request_timeout: Duration) -> Result<Arc<Self>> {
        info!(
            command = %launch.command,
            args = ?launch.args,
            cwd = ?launch.cwd,
            "spawning handler process"
        );

        let mut cmd = Command::new(launch.command);
        cmd.args(launch.args)
            .envs(launch.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = launch.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn handler process: {}", launch.command))?;

        let stdin = child.stdin.take().context("failed to capture stdin")?;
        let stdout = child.stdout.take().context("failed to capture stdout")?;
        let stderr = child.stderr.take();

        let pending = Arc::new(PendingRequests::new());
        let transport = Arc::new(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending: Arc::clone(&pending),
            request_timeout,
            reader_handle: Mutex::new(None),
        });

        if let Some(stderr) = stderr {
            let command = launch.command.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        warn!(command = %command, stderr = %trimmed, "handler stderr");
                    }
                }
            });
        }

        let handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        trace!(raw = %trimmed, "handler -> client");
                        pending.dispatch(trimmed).await;
                    },
                    Ok(None) => {
                        debug!("handler stdout closed");
                        break;
                    },
                    Err(e) => {
                        warn!(error = %e, "error reading handler stdout");
                        break;
                    },
                }
            }
            pending.fail_all().await;
        });

        *transport.reader_handle.lock().await = Some(handle);
        Ok(transport)
    }

    async fn write_line(&self, payload: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(payload.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl McpTransport for StdioTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse> {
        let (req, rx) = self.pending.register(method, params).await;
        let payload = serde_json::to_string(&req)?;

        debug!(method = %method, id = %req.id, "client -> handler");

        if let Err(e) = self.write_line(&payload).await {
            self.pending.forget(&req).await;
            return Err(e);
        }
        self.pending.wait(&req, rx, self.request_timeout).await
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let payload = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        trace!(method = %method, "client -> handler (notification)");
        self.write_line(&payload).await
    }

    async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    async fn kill(&self) {
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        self.pending.fail_all().await;
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            debug!(error = %e, "handler process already gone");
        }
    }
}
