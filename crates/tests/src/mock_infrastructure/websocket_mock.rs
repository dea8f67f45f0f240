//! Mock WebSocket Node for Testing
//!
//! A JSON-RPC node over WebSocket that answers every call with its own id, optionally after
//! a delay, and can push unsolicited frames or hang up on demand.

use super::rpc_mock::echo;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc, RwLock},
    task::JoinHandle,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Default)]
struct NodeState {
    received: RwLock<Vec<Value>>,
    delay: RwLock<Duration>,
    connections: AtomicUsize,
}

impl NodeState {
    /// Batch replies come back reversed so callers must re-order them.
    fn reply_to(request: &Value) -> Value {
        match echo(request) {
            Value::Array(mut replies) => {
                replies.reverse();
                Value::Array(replies)
            }
            reply => reply,
        }
    }
}

/// A mock WebSocket JSON-RPC node.
pub struct MockWebSocketServer {
    addr: SocketAddr,
    state: Arc<NodeState>,
    push_tx: broadcast::Sender<Message>,
    server_handle: JoinHandle<()>,
}

impl MockWebSocketServer {
    /// Creates a new mock WebSocket server on a random available port.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind to a local port or retrieve the bound address.
    pub async fn new() -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(NodeState::default());
        let (push_tx, _) = broadcast::channel(64);

        let server_handle = tokio::spawn(Self::accept_loop(listener, Arc::clone(&state), push_tx.clone()));

        Ok(Self { addr, state, push_tx, server_handle })
    }

    async fn accept_loop(listener: TcpListener, state: Arc<NodeState>, push_tx: broadcast::Sender<Message>) {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(Self::handle_connection(stream, Arc::clone(&state), push_tx.subscribe()));
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        state: Arc<NodeState>,
        mut pushes: broadcast::Receiver<Message>,
    ) {
        let Ok(ws_stream) = accept_async(stream).await else { return };
        state.connections.fetch_add(1, Ordering::SeqCst);

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if write.send(message).await.is_err() || closing {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else { continue };
                        state.received.write().await.push(request.clone());

                        let reply = NodeState::reply_to(&request);
                        let delay = *state.delay.read().await;
                        let out = out_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = out.send(Message::Text(reply.to_string().into()));
                        });
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
                push = pushes.recv() => match push {
                    Ok(message) => {
                        let _ = out_tx.send(message);
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        drop(out_tx);
        let _ = writer.await;
        state.connections.fetch_sub(1, Ordering::SeqCst);
    }

    /// Returns the WebSocket URL for connecting to this server.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Delays every subsequent reply by `delay`.
    pub async fn set_reply_delay(&self, delay: Duration) {
        *self.state.delay.write().await = delay;
    }

    /// Pushes a frame to every connected client.
    pub fn push(&self, frame: &Value) {
        let _ = self.push_tx.send(Message::Text(frame.to_string().into()));
    }

    /// Sends a close frame to every connected client.
    pub fn close_all(&self) {
        let _ = self.push_tx.send(Message::Close(None));
    }

    /// Clients currently connected.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Returns all received requests.
    pub async fn get_received_messages(&self) -> Vec<Value> {
        self.state.received.read().await.clone()
    }

    /// Waits until at least `count` requests have arrived.
    pub async fn wait_for_requests(&self, count: usize, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if self.state.received.read().await.len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

impl Drop for MockWebSocketServer {
    fn drop(&mut self) {
        self.close_all();
        self.server_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_tungstenite::connect_async;

    #[tokio::test]
    async fn test_single_call_is_echoed() {
        let server = MockWebSocketServer::new().await.unwrap();
        let (mut ws_stream, _) = connect_async(&server.url()).await.expect("Failed to connect");

        let request = json!({"jsonrpc": "2.0", "id": 9, "method": "eth_chainId"});
        ws_stream.send(Message::Text(request.to_string().into())).await.unwrap();

        let Some(Ok(Message::Text(text))) = ws_stream.next().await else {
            panic!("Expected text message");
        };
        let reply: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(reply["id"], 9);
        assert_eq!(reply["result"], "eth_chainId");
        assert!(server.wait_for_requests(1, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_batch_reply_is_reversed() {
        let server = MockWebSocketServer::new().await.unwrap();
        let (mut ws_stream, _) = connect_async(&server.url()).await.expect("Failed to connect");

        let batch = json!([
            {"jsonrpc": "2.0", "id": 1, "method": "eth_chainId"},
            {"jsonrpc": "2.0", "id": 2, "method": "net_version"}
        ]);
        ws_stream.send(Message::Text(batch.to_string().into())).await.unwrap();

        let Some(Ok(Message::Text(text))) = ws_stream.next().await else {
            panic!("Expected text message");
        };
        let reply: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(reply[0]["id"], 2);
        assert_eq!(reply[1]["id"], 1);
    }

    #[tokio::test]
    async fn test_push_reaches_clients() {
        let server = MockWebSocketServer::new().await.unwrap();
        let (mut ws_stream, _) = connect_async(&server.url()).await.expect("Failed to connect");

        while server.connections() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        server.push(&json!({"method": "eth_subscription", "params": {"result": "0x1"}}));

        let Some(Ok(Message::Text(text))) = ws_stream.next().await else {
            panic!("Expected text message");
        };
        assert!(text.as_str().contains("eth_subscription"));
    }
}
