//! Client WebSocket sessions.
//!
//! Each client socket gets its own upstream [`WsTransport`]. Frames are validated, filtered
//! and forwarded concurrently; replies and subscription pushes share one outbound queue
//! that a writer task drains into the socket.
//!
//! ```text
//! client frame ─► parse_payload ─► WsTransport::send ─┐
//! upstream push ─► UpstreamEvent::Subscription ───────┼─► outbound ─► client socket
//! liveness sweep ─► Ping ─────────────────────────────┘
//! ```

use crate::state::{ProxyState, SocketRegistry, TrackedSocket};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use gate_core::{
    config::BackendConfig,
    types::{codes, new_error, parse_payload, JsonRpcRequest, JsonRpcResponse, PayloadError, RpcPayload},
    upstream::{UpstreamEvent, UpstreamTransport, WsTransport},
    utils::create_id,
};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

pub const BACKEND_UNAVAILABLE: &str = "WS backend unavailable";
pub const CONNECTION_LIMITED: &str = "Connection limited";
pub const INVALID_DATA: &str = "Invalid data";
pub const UNKNOWN_INPUT_ERROR: &str = "Unknown WS input data error";

fn encode(payload: &RpcPayload<JsonRpcResponse>) -> Message {
    match serde_json::to_string(payload) {
        Ok(text) => Message::Text(text.into()),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode response");
            Message::Text(r#"{"jsonrpc":"2.0","id":0,"error":{"code":-32603,"message":"Unknown WS input data error"}}"#.into())
        }
    }
}

/// Serves one client payload on its own task and returns the frame to send back.
///
/// A panic while serving is answered with `-32603 Unknown WS input data error`.
async fn dispatch<T>(transport: Arc<T>, payload: RpcPayload<JsonRpcRequest>) -> Message
where
    T: UpstreamTransport + ?Sized + 'static,
{
    match tokio::spawn(async move { transport.send(payload).await }).await {
        Ok(reply) => Message::Text(reply.to_string().into()),
        Err(e) => {
            tracing::error!(error = %e, "client frame handler failed");
            encode(&new_error(codes::INTERNAL_ERROR, UNKNOWN_INPUT_ERROR))
        }
    }
}

/// Sends one last message and closes without entering the session loop.
async fn reject(mut socket: WebSocket, message: Message) {
    let _ = socket.send(message).await;
    let _ = socket.send(Message::Close(None)).await;
}

/// Runs one client session until either side goes away.
///
/// The session holds an `add_session` slot for the hashed origin from admission until
/// exit, whatever the exit path.
pub async fn serve_session(socket: WebSocket, state: Arc<ProxyState>, backend: Arc<BackendConfig>, origin: String) {
    if backend.ws_url.is_none() {
        reject(socket, Message::Text(BACKEND_UNAVAILABLE.into())).await;
        return;
    }

    let session = create_id();
    let context = state.context(backend, &origin).with_subscriptions();
    let chain = context.chain().to_string();
    let origin_key = context.origin_key().map(str::to_string);

    if let Some(key) = &origin_key {
        let admitted = match state.authority.add_session(key, &session).await {
            Ok(admitted) => admitted,
            Err(e) => {
                tracing::warn!(chain = %chain, origin = %key, error = %e, "session check failed");
                false
            }
        };
        if !admitted {
            tracing::debug!(chain = %chain, origin = %key, "connection limited");
            reject(socket, encode(&new_error(codes::LIMIT_EXCEEDED, CONNECTION_LIMITED))).await;
            release_session(&state, origin_key.as_deref(), &session).await;
            return;
        }
    }

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(WsTransport::new(context, events_tx));
    if let Err(e) = transport.connect().await {
        tracing::warn!(chain = %chain, error = %e, "upstream websocket unavailable");
        reject(socket, Message::Text(BACKEND_UNAVAILABLE.into())).await;
        release_session(&state, origin_key.as_deref(), &session).await;
        return;
    }

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let tracked = Arc::new(TrackedSocket::new(outbound_tx.clone()));
    state.sockets.insert(session.clone(), Arc::clone(&tracked));
    tracing::debug!(chain = %chain, session = %session, "socket connected");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, outbound_rx));

    run_session(stream, &transport, events_rx, &outbound_tx, &tracked).await;

    state.sockets.remove(&session);
    transport.terminate();
    release_session(&state, origin_key.as_deref(), &session).await;
    let _ = outbound_tx.send(Message::Close(None));
    drop(outbound_tx);
    drop(tracked);
    let _ = writer.await;
    tracing::debug!(chain = %chain, session = %session, "socket disconnected");
}

async fn release_session(state: &ProxyState, origin_key: Option<&str>, session: &str) {
    let Some(key) = origin_key else {
        return;
    };
    if let Err(e) = state.authority.remove_session(key, session).await {
        tracing::warn!(origin = %key, session = %session, error = %e, "failed to release session");
    }
}

async fn run_session(
    mut stream: futures_util::stream::SplitStream<WebSocket>,
    transport: &Arc<WsTransport>,
    mut events: mpsc::UnboundedReceiver<UpstreamEvent>,
    outbound: &mpsc::UnboundedSender<Message>,
    tracked: &TrackedSocket,
) {
    loop {
        tokio::select! {
            frame = stream.next() => {
                let bytes = match frame {
                    Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
                    Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
                    Some(Ok(Message::Pong(_))) => {
                        tracked.mark_alive();
                        continue;
                    }
                    Some(Ok(Message::Ping(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "client socket error");
                        return;
                    }
                };

                match parse_payload(&bytes) {
                    Ok(payload) => {
                        let transport = Arc::clone(transport);
                        let outbound = outbound.clone();
                        tokio::spawn(async move {
                            let _ = outbound.send(dispatch(transport, payload).await);
                        });
                    }
                    Err(PayloadError::Json(e)) if e.is_syntax() || e.is_eof() => {
                        tracing::debug!(error = %e, "unparseable client frame");
                        let _ = outbound.send(encode(&new_error(codes::INTERNAL_ERROR, UNKNOWN_INPUT_ERROR)));
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "invalid client frame");
                        let _ = outbound.send(encode(&new_error(codes::INVALID_REQUEST, INVALID_DATA)));
                        return;
                    }
                }
            }
            event = events.recv() => match event {
                Some(UpstreamEvent::Subscription(value)) => {
                    let _ = outbound.send(Message::Text(value.to_string().into()));
                }
                Some(UpstreamEvent::Disconnected) | None => return,
            },
            () = tracked.terminated() => return,
        }
    }
}

async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut outbound: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if sink.send(message).await.is_err() || closing {
            break;
        }
    }
    let _ = sink.close().await;
}

/// One liveness pass: terminates sockets that missed the last ping, pings the rest.
///
/// Returns how many sockets were terminated.
pub fn sweep(sockets: &SocketRegistry) -> usize {
    let mut dead = Vec::new();
    for entry in sockets.iter() {
        if !entry.value().take_alive() || !entry.value().ping() {
            entry.value().terminate();
            dead.push(entry.key().clone());
        }
    }

    for session in &dead {
        sockets.remove(session);
    }
    dead.len()
}

/// Runs [`sweep`] every `interval` until shutdown.
pub fn start_liveness_sweep(
    sockets: SocketRegistry,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let terminated = sweep(&sockets);
                    if terminated > 0 {
                        tracing::debug!(terminated, open = sockets.len(), "terminated idle sockets");
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    })
}
