//! Seams between the JSON-RPC transports, the MCP client, and session
//! construction.

use {async_trait::async_trait, serde_json::Value};

use crate::{
    client::McpClientState,
    error::Result,
    registry::HandlerConfig,
    session::Session,
    types::{JsonRpcResponse, McpToolDef, ToolsCallResult},
};

/// Transport layer for MCP communication (JSON-RPC).
///
/// Implemented over a child process's stdio, streamable HTTP, and WebSocket.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the response.
    ///
    /// A response carrying a JSON-RPC error is returned as
    /// [`McpTransportError::Rpc`](crate::error::McpTransportError::Rpc).
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse>;

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Check if the underlying connection/process is still alive.
    async fn is_alive(&self) -> bool;

    /// Close the underlying connection/process.
    async fn kill(&self);
}

/// An initialized MCP conversation with one handler.
#[async_trait]
pub trait McpClientTrait: Send + Sync {
    fn server_name(&self) -> &str;

    fn state(&self) -> McpClientState;

    async fn list_tools(&self) -> Result<Vec<McpToolDef>>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolsCallResult>;

    async fn is_alive(&self) -> bool;

    /// Mark the client closed. Transport teardown is owned by the session.
    fn close(&self);
}

/// Builds a ready session for a handler.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, handler: &HandlerConfig) -> Result<Session>;
}
