//! MCP client: the protocol handshake and tool calls with a single handler,
//! over whichever transport the handler's manifest selects.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::{
    error::{Context, Error, Result},
    traits::{McpClientTrait, McpTransport},
    types::{
        InitializeParams, InitializeResult, McpToolDef, ToolsCallParams, ToolsCallResult,
        ToolsListResult,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpClientState {
    /// Transport up, handshake not finished.
    Connected,
    /// `initialize` completed and `initialized` notification sent.
    Ready,
    Closed,
}

pub struct McpClient {
    server_name: String,
    transport: Arc<dyn McpTransport>,
    state: Mutex<McpClientState>,
    server_info: Option<InitializeResult>,
}

impl McpClient {
    /// Perform the MCP handshake (initialize + initialized) over `transport`.
    pub async fn connect(server_name: &str, transport: Arc<dyn McpTransport>) -> Result<Self> {
        let mut client = Self {
            server_name: server_name.into(),
            transport,
            state: Mutex::new(McpClientState::Connected),
            server_info: None,
        };

        if let Err(e) = client.initialize().await {
            warn!(handler = %server_name, error = %e, "MCP initialize handshake failed");
            return Err(e);
        }
        Ok(client)
    }

    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.as_ref()
    }

    async fn initialize(&mut self) -> Result<()> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let resp = self
            .transport
            .request("initialize", Some(params))
            .await?;

        let result: InitializeResult =
            serde_json::from_value(resp.result.context("initialize returned no result")?)
                .context("failed to parse initialize result")?;

        info!(
            handler = %self.server_name,
            protocol = %result.protocol_version,
            server_name = %result.server_info.name,
            "handler session initialized"
        );
        self.server_info = Some(result);

        self.transport
            .notify("notifications/initialized", None)
            .await?;
        self.set_state(McpClientState::Ready);
        Ok(())
    }

    fn set_state(&self, state: McpClientState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn ensure_ready(&self) -> Result<()> {
        let state = self.state();
        if state != McpClientState::Ready {
            return Err(Error::message(format!(
                "session for '{}' is not ready (state: {state:?})",
                self.server_name
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl McpClientTrait for McpClient {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn state(&self) -> McpClientState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDef>> {
        self.ensure_ready()?;

        let resp = self.transport.request("tools/list", None).await?;
        let result: ToolsListResult =
            serde_json::from_value(resp.result.context("tools/list returned no result")?)?;

        debug!(handler = %self.server_name, count = result.tools.len(), "fetched tools");
        Ok(result.tools)
    }

    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<ToolsCallResult> {
        self.ensure_ready()?;

        let params = ToolsCallParams {
            name: name.into(),
            arguments,
        };
        let resp = self
            .transport
            .request("tools/call", Some(serde_json::to_value(&params)?))
            .await?;

        Ok(serde_json::from_value(
            resp.result.context("tools/call returned no result")?,
        )?)
    }

    async fn is_alive(&self) -> bool {
        self.state() == McpClientState::Ready && self.transport.is_alive().await
    }

    fn close(&self) {
        self.set_state(McpClientState::Closed);
    }
}
