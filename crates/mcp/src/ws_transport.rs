//! WebSocket transport: one JSON-RPC message per text frame, negotiated with
//! the `mcp` subprotocol.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    futures::{
        SinkExt, StreamExt,
        stream::{SplitSink, SplitStream},
    },
    tokio::{net::TcpStream, sync::Mutex, task::JoinHandle},
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async,
        tungstenite::{
            Message,
            client::IntoClientRequest,
            http::{HeaderName, HeaderValue},
        },
    },
    tracing::{debug, info, trace, warn},
};

use crate::{
    error::{Error, Result},
    pending::PendingRequests,
    traits::McpTransport,
    types::{JsonRpcNotification, JsonRpcResponse},
};

const SUBPROTOCOL: &str = "mcp";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsTransport {
    sink: Mutex<SplitSink<WsStream, Message>>,
    pending: Arc<PendingRequests>,
    open: Arc<AtomicBool>,
    request_timeout: Duration,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    pub async fn connect(
        url: &str,
        headers: &HashMap<String, String>,
        request_timeout: Duration,
    ) -> Result<Arc<Self>> {
        info!(url = %url, "connecting to handler over websocket");

        let mut request = url
            .into_client_request()
            .map_err(|e| Error::external(format!("invalid websocket URL '{url}'"), e))?;
        let request_headers = request.headers_mut();
        request_headers.insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(SUBPROTOCOL),
        );
        for (name, value) in headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::external(format!("invalid header name '{name}'"), e))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::external(format!("invalid value for header '{name}'"), e))?;
            request_headers.insert(header, value);
        }

        let connect = tokio::time::timeout(request_timeout, connect_async(request))
            .await
            .map_err(|_| Error::message(format!("websocket connect to '{url}' timed out")))?;
        let (stream, _response) =
            connect.map_err(|e| Error::external(format!("websocket connect to '{url}'"), e))?;
        let (sink, stream) = stream.split();

        let pending = Arc::new(PendingRequests::new());
        let open = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(read_loop(stream, Arc::clone(&pending), Arc::clone(&open)));

        Ok(Arc::new(Self {
            sink: Mutex::new(sink),
            pending,
            open,
            request_timeout,
            reader_handle: Mutex::new(Some(handle)),
        }))
    }

    async fn send_text(&self, payload: String) -> Result<()> {
        self.sink
            .lock()
            .await
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| Error::external("websocket send failed", e))
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    pending: Arc<PendingRequests>,
    open: Arc<AtomicBool>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                trace!(raw = %text.as_str(), "handler -> client (ws)");
                pending.dispatch(text.as_str()).await;
            },
            Ok(Message::Close(frame)) => {
                debug!(?frame, "handler closed websocket");
                break;
            },
            Ok(_) => {},
            Err(e) => {
                warn!(error = %e, "websocket read failed");
                break;
            },
        }
    }
    open.store(false, Ordering::SeqCst);
    pending.fail_all().await;
}

#[async_trait::async_trait]
impl McpTransport for WsTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse> {
        let (req, rx) = self.pending.register(method, params).await;
        let payload = serde_json::to_string(&req)?;

        debug!(method = %method, id = %req.id, "client -> handler (ws)");

        if let Err(e) = self.send_text(payload).await {
            self.pending.forget(&req).await;
            return Err(e);
        }
        self.pending.wait(&req, rx, self.request_timeout).await
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let payload = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.send_text(payload).await
    }

    async fn is_alive(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn kill(&self) {
        self.open.store(false, Ordering::SeqCst);
        if let Err(e) = self.sink.lock().await.close().await {
            debug!(error = %e, "websocket already closed");
        }
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        self.pending.fail_all().await;
    }
}
