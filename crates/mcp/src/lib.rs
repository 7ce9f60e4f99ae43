//! Handler sessions for catmandu.
//!
//! - Handler manifests and the on-disk registry (`registry`)
//! - JSON-RPC transports: stdio (`transport`), streamable HTTP
//!   (`http_transport`) and WebSocket (`ws_transport`, feature `websocket`)
//! - MCP handshake and tool calls (`client`), wrapped with their teardown
//!   in a `Session`
//! - The per-handler session cache with timeout and retry
//!   (`orchestrator`)

pub mod client;
pub mod error;
pub mod http_transport;
pub mod orchestrator;
mod pending;
pub mod registry;
pub mod release;
pub mod session;
pub mod traits;
pub mod transport;
pub mod types;

#[cfg(feature = "websocket")]
pub mod ws_transport;

pub use {
    client::{McpClient, McpClientState},
    error::{Error, ErrorClass, InvocationError, McpTransportError, Result},
    orchestrator::{RetryPolicy, SessionOrchestrator},
    registry::{CommandConfig, HandlerConfig, HandlerRegistry, TransportConfig},
    release::ReleaseList,
    session::{McpSessionFactory, Session, create_session},
    traits::{McpClientTrait, McpTransport, SessionFactory},
    types::{InvocationResult, ToolArguments},
};
