//! Streamable HTTP transport for remote handlers.
//!
//! Each JSON-RPC message is POSTed to the handler URL. The server answers
//! with either a JSON body or a short `text/event-stream` body carrying the
//! response. A server-issued `Mcp-Session-Id` is echoed on every later
//! request and the session is ended with a DELETE on kill.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    reqwest::{
        Client, RequestBuilder, Response, StatusCode,
        header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
    },
    tokio::sync::RwLock,
    tracing::{debug, warn},
};

use crate::{
    error::{Context, Error, McpTransportError, Result},
    pending::into_result,
    traits::McpTransport,
    types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION},
};

const MCP_PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
const MCP_SESSION_ID_HEADER: &str = "Mcp-Session-Id";
const STREAMABLE_ACCEPT_HEADER: &str = "application/json, text/event-stream";
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpTransport {
    client: Client,
    url: String,
    next_id: AtomicU64,
    request_timeout: Duration,
    /// Session identifier issued by the server.
    session_id: RwLock<Option<String>>,
}

impl HttpTransport {
    /// `headers` are sent with every request, e.g. API keys.
    pub fn new(
        url: &str,
        headers: &HashMap<String, String>,
        request_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let parsed = url::Url::parse(url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::message(format!(
                "HTTP transport needs an http(s) URL, got '{url}'"
            )));
        }

        let client = Client::builder()
            .default_headers(header_map(headers)?)
            .build()
            .context("failed to build HTTP client for handler transport")?;

        Ok(Arc::new(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
            request_timeout,
            session_id: RwLock::new(None),
        }))
    }

    async fn build_post(&self) -> RequestBuilder {
        let mut req = self
            .client
            .post(&self.url)
            .timeout(self.request_timeout)
            .header(CONTENT_TYPE, "application/json")
            .header("Accept", STREAMABLE_ACCEPT_HEADER)
            .header(MCP_PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION);

        if let Some(session_id) = self.session_id.read().await.clone() {
            req = req.header(MCP_SESSION_ID_HEADER, session_id);
        }
        req
    }

    async fn post(&self, method: &str, body: &impl serde::Serialize) -> Result<Response> {
        let resp = self
            .build_post()
            .await
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::from(McpTransportError::RequestTimeout {
                        method: method.into(),
                        timeout: self.request_timeout,
                    })
                } else {
                    Error::external(format!("POST to '{}' for '{method}' failed", self.url), e)
                }
            })?;
        self.store_session_id(&resp).await;
        Ok(resp)
    }

    async fn store_session_id(&self, response: &Response) {
        let Some(session_id) = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|raw| raw.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
        else {
            return;
        };

        let mut slot = self.session_id.write().await;
        if slot.as_deref() != Some(session_id) {
            debug!(url = %self.url, session_id = %session_id, "updated handler session id");
            *slot = Some(session_id.to_string());
        }
    }

    fn is_event_stream(resp: &Response) -> bool {
        resp.headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|base| base.trim() == "text/event-stream")
    }

    /// Pull the first JSON-RPC response out of an SSE body.
    fn parse_event_stream(body: &str, method: &str) -> Result<JsonRpcResponse> {
        let mut data = String::new();

        for line in body.lines().chain(std::iter::once("")) {
            let line = line.trim_end();
            if let Some(rest) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.trim_start());
                continue;
            }
            if line.is_empty() && !data.is_empty() {
                if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&data) {
                    return Ok(resp);
                }
                data.clear();
            }
        }

        Err(Error::message(format!(
            "no JSON-RPC response in event stream for '{method}'"
        )))
    }
}

fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::external(format!("invalid header name '{name}'"), e))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::external(format!("invalid value for header '{name}'"), e))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait::async_trait]
impl McpTransport for HttpTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);

        debug!(method = %method, id = %id, url = %self.url, "client -> handler (http)");

        let http_resp = self.post(method, &req).await?;
        let status = http_resp.status();
        if !status.is_success() {
            let body = http_resp.text().await.unwrap_or_default();
            return Err(McpTransportError::HttpStatus {
                method: method.into(),
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let resp = if Self::is_event_stream(&http_resp) {
            let body = http_resp
                .text()
                .await
                .with_context(|| format!("failed to read event stream for '{method}'"))?;
            Self::parse_event_stream(&body, method)?
        } else {
            http_resp
                .json()
                .await
                .with_context(|| format!("failed to parse JSON-RPC response for '{method}'"))?
        };

        into_result(method, resp)
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        debug!(method = %method, url = %self.url, "client -> handler (http notification)");

        let http_resp = self
            .post(method, &JsonRpcNotification::new(method, params))
            .await?;
        if !http_resp.status().is_success() {
            warn!(method = %method, status = %http_resp.status(), "notification returned non-success");
        }
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        let mut req = self
            .client
            .get(&self.url)
            .timeout(CLOSE_TIMEOUT)
            .header("Accept", STREAMABLE_ACCEPT_HEADER)
            .header(MCP_PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION);
        if let Some(session_id) = self.session_id.read().await.clone() {
            req = req.header(MCP_SESSION_ID_HEADER, session_id);
        }
        match req.send().await {
            Ok(resp) => resp.status() != StatusCode::NOT_FOUND,
            Err(_) => false,
        }
    }

    async fn kill(&self) {
        let Some(session_id) = self.session_id.write().await.take() else {
            return;
        };

        let req = self
            .client
            .delete(&self.url)
            .timeout(CLOSE_TIMEOUT)
            .header(MCP_PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION)
            .header(MCP_SESSION_ID_HEADER, session_id);

        if let Err(e) = req.send().await {
            warn!(url = %self.url, error = %e, "failed to close handler HTTP session");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn transport(url: &str) -> Arc<HttpTransport> {
        HttpTransport::new(url, &HashMap::new(), TIMEOUT).unwrap()
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(HttpTransport::new("ws://localhost/mcp", &HashMap::new(), TIMEOUT).is_err());
        assert!(HttpTransport::new("not a url", &HashMap::new(), TIMEOUT).is_err());
    }

    #[test]
    fn rejects_invalid_header_names() {
        let headers = HashMap::from([("bad header".to_string(), "x".to_string())]);
        assert!(HttpTransport::new("http://localhost/mcp", &headers, TIMEOUT).is_err());
    }

    #[tokio::test]
    async fn unreachable_server_is_not_alive() {
        let t = transport("http://127.0.0.1:1/mcp");
        assert!(!t.is_alive().await);
        assert!(t.request("tools/list", None).await.is_err());
    }

    #[tokio::test]
    async fn configured_headers_are_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("x-api-key", "secret")
            .match_header("mcp-protocol-version", PROTOCOL_VERSION)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#)
            .create_async()
            .await;

        let headers = HashMap::from([("X-Api-Key".to_string(), "secret".to_string())]);
        let t = HttpTransport::new(&server.url(), &headers, TIMEOUT).unwrap();
        assert!(t.request("initialize", None).await.unwrap().result.is_some());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn session_id_is_echoed() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("mcp-session-id", "session-123")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#)
            .create_async()
            .await;
        let second = server
            .mock("POST", "/")
            .match_header("mcp-session-id", "session-123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":2,"result":{"ok":true}}"#)
            .create_async()
            .await;

        let t = transport(&server.url());
        t.request("initialize", None).await.unwrap();
        t.request("tools/list", None).await.unwrap();

        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn parses_event_stream_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "text/event-stream; charset=utf-8")
            .with_body(
                "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n\n",
            )
            .create_async()
            .await;

        let resp = transport(&server.url())
            .request("initialize", None)
            .await
            .unwrap();
        assert!(resp.result.is_some());
    }

    #[tokio::test]
    async fn http_error_status_is_typed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let err = transport(&server.url())
            .request("tools/call", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(McpTransportError::HttpStatus { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn rpc_error_is_typed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"nope"}}"#)
            .create_async()
            .await;

        let err = transport(&server.url())
            .request("tools/call", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(McpTransportError::Rpc { code: -32601, .. })
        ));
    }

    #[tokio::test]
    async fn kill_sends_delete_with_session_id() {
        let mut server = mockito::Server::new_async().await;
        let init = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("mcp-session-id", "session-to-close")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#)
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", "/")
            .match_header("mcp-session-id", "session-to-close")
            .with_status(204)
            .create_async()
            .await;

        let t = transport(&server.url());
        t.request("initialize", None).await.unwrap();
        t.kill().await;

        init.assert_async().await;
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn kill_without_session_is_a_no_op() {
        transport("http://127.0.0.1:1/mcp").kill().await;
    }
}
