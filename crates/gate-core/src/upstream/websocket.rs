//! Persistent WebSocket transport.
//!
//! One upstream connection serves one client session. Calls are multiplexed over it and
//! matched back by correlation key: the request id for a single call, the sorted ids
//! joined by `,` for a batch. Frames that match no outstanding call (subscription pushes,
//! replies that arrived after their call timed out) are handed to the session as
//! [`UpstreamEvent::Subscription`].

use super::{RequestContext, UpstreamError, UpstreamTransport};
use crate::types::{JsonRpcRequest, RpcPayload};
use ahash::AHashMap;
use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot, OnceCell},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Traffic from the upstream that no outstanding call claimed.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// Unsolicited frame, relayed to the client verbatim.
    Subscription(Value),
    /// The upstream connection closed or failed.
    Disconnected,
}

struct PendingCall {
    token: u64,
    reply: oneshot::Sender<Value>,
}

type PendingCalls = Arc<Mutex<AHashMap<String, PendingCall>>>;

/// Removes a pending entry when its call finishes early (timeout, send failure, drop).
struct PendingGuard {
    pending: PendingCalls,
    key: String,
    token: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        if pending.get(&self.key).is_some_and(|call| call.token == self.token) {
            pending.remove(&self.key);
        }
    }
}

struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
}

/// Multiplexed transport over the backend's `ws_url`.
pub struct WsTransport {
    context: RequestContext,
    pending: PendingCalls,
    next_token: AtomicU64,
    events: mpsc::UnboundedSender<UpstreamEvent>,
    connection: OnceCell<Connection>,
}

impl WsTransport {
    /// Creates a transport; the connection opens on first use or [`WsTransport::connect`].
    #[must_use]
    pub fn new(context: RequestContext, events: mpsc::UnboundedSender<UpstreamEvent>) -> Self {
        Self {
            context,
            pending: Arc::new(Mutex::new(AHashMap::new())),
            next_token: AtomicU64::new(0),
            events,
            connection: OnceCell::new(),
        }
    }

    /// Opens the upstream connection if it is not open yet.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Unavailable`] when the backend has no `ws_url` and
    /// [`UpstreamError::ConnectionFailed`] when the handshake fails.
    pub async fn connect(&self) -> Result<(), UpstreamError> {
        self.connection().await.map(|_| ())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.get().is_some_and(|connection| !connection.reader.is_finished())
    }

    /// Calls still waiting for a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Closes the upstream connection and fails every outstanding call.
    pub fn terminate(&self) {
        if let Some(connection) = self.connection.get() {
            let _ = connection.outbound.send(Message::Close(None));
            connection.reader.abort();
        }
        self.pending.lock().clear();
    }

    async fn connection(&self) -> Result<&Connection, UpstreamError> {
        self.connection.get_or_try_init(|| self.open()).await
    }

    async fn open(&self) -> Result<Connection, UpstreamError> {
        let backend = self.context.backend();
        let ws_url =
            backend.ws_url.as_deref().ok_or_else(|| UpstreamError::Unavailable(backend.chain.clone()))?;

        tracing::debug!(chain = %backend.chain, "connecting to upstream websocket");
        let (stream, _) = connect_async(ws_url).await.map_err(|e| {
            tracing::warn!(chain = %backend.chain, error = %e, "upstream websocket connect failed");
            UpstreamError::ConnectionFailed("websocket handshake failed".to_string())
        })?;

        let (sink, source) = stream.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(sink, outbound_rx));
        let reader = tokio::spawn(read_loop(
            source,
            Arc::clone(&self.pending),
            self.events.clone(),
            backend.chain.clone(),
        ));

        Ok(Connection { outbound, reader })
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.terminate();
    }
}

async fn write_loop(mut sink: WsSink, mut outbound: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if sink.send(message).await.is_err() || closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    mut source: WsSource,
    pending: PendingCalls,
    events: mpsc::UnboundedSender<UpstreamEvent>,
    chain: String,
) {
    while let Some(frame) = source.next().await {
        let parsed = match frame {
            Ok(Message::Text(text)) => serde_json::from_str::<Value>(text.as_str()),
            Ok(Message::Binary(bytes)) => serde_json::from_slice::<Value>(&bytes),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(chain = %chain, error = %e, "upstream websocket error");
                break;
            }
        };

        let Ok(value) = parsed else {
            tracing::debug!(chain = %chain, "dropping malformed upstream frame");
            continue;
        };

        let claimed = response_key(&value).and_then(|key| pending.lock().remove(&key));
        match claimed {
            Some(call) => {
                let _ = call.reply.send(value);
            }
            None => {
                let _ = events.send(UpstreamEvent::Subscription(value));
            }
        }
    }

    tracing::debug!(chain = %chain, "upstream websocket closed");
    pending.lock().clear();
    let _ = events.send(UpstreamEvent::Disconnected);
}

fn join_keys(mut keys: Vec<String>) -> String {
    keys.sort_unstable();
    keys.join(",")
}

/// Correlation key of an outgoing payload.
#[must_use]
pub fn request_key(request: &RpcPayload<JsonRpcRequest>) -> String {
    match request {
        RpcPayload::Single(call) => call.id_key(),
        RpcPayload::Batch(calls) => join_keys(calls.iter().map(JsonRpcRequest::id_key).collect()),
    }
}

/// Correlation key of an inbound frame, `None` for frames without ids.
#[must_use]
pub fn response_key(value: &Value) -> Option<String> {
    match value {
        Value::Object(object) => object.get("id").map(Value::to_string),
        Value::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| item.get("id").map(Value::to_string))
            .collect::<Option<Vec<_>>>()
            .map(join_keys),
        _ => None,
    }
}

/// Puts batch replies back into request order. Replies are matched on `id` only and
/// otherwise left as received.
fn restore_order(request: &RpcPayload<JsonRpcRequest>, reply: Value) -> Value {
    match (request, reply) {
        (RpcPayload::Batch(calls), Value::Array(replies)) if calls.len() == replies.len() => {
            let mut by_id: AHashMap<String, Value> = replies
                .into_iter()
                .map(|item| (item.get("id").unwrap_or(&Value::Null).to_string(), item))
                .collect();
            let mut ordered: Vec<Value> =
                calls.iter().filter_map(|call| by_id.remove(&call.id_key())).collect();
            ordered.extend(by_id.into_values());
            Value::Array(ordered)
        }
        (_, reply) => reply,
    }
}

#[async_trait]
impl UpstreamTransport for WsTransport {
    fn context(&self) -> &RequestContext {
        &self.context
    }

    async fn send_upstream(&self, request: &RpcPayload<JsonRpcRequest>) -> Result<Value, UpstreamError> {
        if request.is_empty() {
            return Ok(Value::Array(Vec::new()));
        }

        let key = request_key(request);
        let text = serde_json::to_string(request)?;
        let connection = self.connection().await?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&key) {
                return Err(UpstreamError::DuplicateId(key));
            }
            pending.insert(key.clone(), PendingCall { token, reply: reply_tx });
        }
        let _guard = PendingGuard { pending: Arc::clone(&self.pending), key, token };

        connection
            .outbound
            .send(Message::Text(text.into()))
            .map_err(|_| UpstreamError::ConnectionClosed)?;

        let timeout = self.context.backend().timeout();
        let value = match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(value)) => value,
            Ok(Err(_)) => return Err(UpstreamError::ConnectionClosed),
            Err(_) => {
                tracing::warn!(
                    chain = self.context.chain(),
                    methods = ?request.methods(),
                    "upstream websocket call timed out"
                );
                return Err(UpstreamError::Timeout);
            }
        };

        Ok(restore_order(request, value))
    }
}
