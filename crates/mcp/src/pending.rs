//! Request/response correlation for transports that multiplex JSON-RPC over a
//! single stream (stdio, WebSocket).

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use {
    tokio::sync::{Mutex, oneshot},
    tracing::{debug, warn},
};

use crate::{
    error::{McpTransportError, Result},
    types::{JsonRpcRequest, JsonRpcResponse},
};

pub(crate) struct PendingRequests {
    waiters: Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>,
    next_id: AtomicU64,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate an id and register a waiter for it.
    pub(crate) async fn register(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> (JsonRpcRequest, oneshot::Receiver<JsonRpcResponse>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(req.id.to_string(), tx);
        (req, rx)
    }

    /// Route one inbound line/frame to whoever is waiting on its id.
    pub(crate) async fn dispatch(&self, raw: &str) {
        match serde_json::from_str::<JsonRpcResponse>(raw) {
            Ok(resp) => {
                let key = resp.id.to_string();
                match self.waiters.lock().await.remove(&key) {
                    Some(tx) => {
                        let _ = tx.send(resp);
                    },
                    None => warn!(id = %key, "received response for unknown request id"),
                }
            },
            Err(e) => debug!(error = %e, line = %raw, "handler sent non-response message"),
        }
    }

    /// Drop every waiter so their receivers observe a closed connection.
    pub(crate) async fn fail_all(&self) {
        self.waiters.lock().await.clear();
    }

    /// Wait for the response to `req`, bounded by `timeout`.
    pub(crate) async fn wait(
        &self,
        req: &JsonRpcRequest,
        rx: oneshot::Receiver<JsonRpcResponse>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse> {
        let method = req.method.clone();
        let resp = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => return Err(McpTransportError::Closed { method }.into()),
            Err(_) => {
                self.waiters.lock().await.remove(&req.id.to_string());
                return Err(McpTransportError::RequestTimeout { method, timeout }.into());
            },
        };
        into_result(&req.method, resp)
    }

    /// Forget a waiter whose request could not be sent.
    pub(crate) async fn forget(&self, req: &JsonRpcRequest) {
        self.waiters.lock().await.remove(&req.id.to_string());
    }
}

/// Turn a JSON-RPC error response into a transport error.
pub(crate) fn into_result(method: &str, resp: JsonRpcResponse) -> Result<JsonRpcResponse> {
    if let Some(err) = &resp.error {
        return Err(McpTransportError::Rpc {
            method: method.into(),
            code: err.code,
            message: err.message.clone(),
        }
        .into());
    }
    Ok(resp)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, crate::error::Error};

    #[tokio::test]
    async fn dispatch_completes_matching_waiter() {
        let pending = PendingRequests::new();
        let (req, rx) = pending.register("tools/list", None).await;
        pending
            .dispatch(r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#)
            .await;
        let resp = pending
            .wait(&req, rx, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(resp.result.is_some());
    }

    #[tokio::test]
    async fn rpc_error_is_typed() {
        let pending = PendingRequests::new();
        let (req, rx) = pending.register("tools/call", None).await;
        pending
            .dispatch(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"bad"}}"#)
            .await;
        let err = pending
            .wait(&req, rx, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(McpTransportError::Rpc { code: -32602, .. })
        ));
    }

    #[tokio::test]
    async fn timeout_forgets_waiter() {
        let pending = PendingRequests::new();
        let (req, rx) = pending.register("tools/call", None).await;
        let err = pending
            .wait(&req, rx, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(McpTransportError::RequestTimeout { .. })
        ));
        assert!(pending.waiters.lock().await.is_empty());
    }

    #[tokio::test]
    async fn fail_all_reports_closed() {
        let pending = PendingRequests::new();
        let (req, rx) = pending.register("initialize", None).await;
        pending.fail_all().await;
        let err = pending
            .wait(&req, rx, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(McpTransportError::Closed { .. })
        ));
    }
}
