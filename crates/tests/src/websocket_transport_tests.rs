//! WebSocket transport tests against the mock node.
//!
//! Covers correlation of multiplexed calls, batch re-ordering, duplicate pending ids,
//! local timeouts with late replies, subscription relay and disconnects.

use crate::mock_infrastructure::{batch_responses, eventually, single_response as single, MockWebSocketServer};
use gate_core::{
    config::BackendConfig,
    types::{parse_payload, JsonRpcRequest, RpcPayload},
    upstream::{RequestContext, UpstreamEvent, UpstreamTransport, WsTransport},
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;

fn transport(ws_url: Option<String>, timeout_seconds: u64) -> (Arc<WsTransport>, mpsc::UnboundedReceiver<UpstreamEvent>) {
    let mut backend = BackendConfig::new("mainnet", "http://127.0.0.1:1");
    backend.ws_url = ws_url;
    backend.timeout_seconds = timeout_seconds;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let context = RequestContext::new(Arc::new(backend)).with_subscriptions();
    (Arc::new(WsTransport::new(context, events_tx)), events_rx)
}

fn call(id: Value, method: &str) -> RpcPayload<JsonRpcRequest> {
    parse_payload(json!({"jsonrpc": "2.0", "id": id, "method": method}).to_string().as_bytes()).unwrap()
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<UpstreamEvent>) -> UpstreamEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for an upstream event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_concurrent_calls_are_correlated() {
    let node = MockWebSocketServer::new().await.unwrap();
    node.set_reply_delay(Duration::from_millis(50)).await;
    let (transport, _events) = transport(Some(node.url()), 5);

    let calls = (0..10).map(|id| {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move { single(transport.send(call(json!(id), "eth_chainId")).await) })
    });
    let responses = futures_util::future::join_all(calls).await;

    for (id, response) in responses.into_iter().enumerate() {
        let response = response.unwrap();
        assert_eq!(*response.id, json!(id));
        assert_eq!(response.result, Some(json!("eth_chainId")));
    }
    assert_eq!(transport.pending_count(), 0);
    assert_eq!(node.connections(), 1);
}

#[tokio::test]
async fn test_numeric_and_string_ids_do_not_collide() {
    let node = MockWebSocketServer::new().await.unwrap();
    node.set_reply_delay(Duration::from_millis(100)).await;
    let (transport, _events) = transport(Some(node.url()), 5);

    let (numeric, textual) = tokio::join!(
        transport.send(call(json!(1), "eth_chainId")),
        transport.send(call(json!("1"), "net_version")),
    );
    assert_eq!(single(numeric).result, Some(json!("eth_chainId")));
    assert_eq!(single(textual).result, Some(json!("net_version")));
}

#[tokio::test]
async fn test_batch_replies_follow_request_order() {
    let node = MockWebSocketServer::new().await.unwrap();
    let (transport, _events) = transport(Some(node.url()), 5);

    let request = parse_payload(
        br#"[{"jsonrpc":"2.0","id":"x","method":"eth_chainId"},
             {"jsonrpc":"2.0","id":2,"method":"net_version"},
             {"jsonrpc":"2.0","id":3,"method":"eth_blockNumber"}]"#,
    )
    .unwrap();
    let responses = batch_responses(transport.send(request).await);

    let ids: Vec<Value> = responses.iter().map(|response| (*response.id).clone()).collect();
    assert_eq!(ids, vec![json!("x"), json!(2), json!(3)]);
}

#[tokio::test]
async fn test_duplicate_pending_id_is_rejected() {
    let node = MockWebSocketServer::new().await.unwrap();
    node.set_reply_delay(Duration::from_millis(300)).await;
    let (transport, _events) = transport(Some(node.url()), 5);
    transport.connect().await.unwrap();

    let (first, second) = tokio::join!(
        transport.send(call(json!(42), "eth_chainId")),
        transport.send(call(json!(42), "eth_chainId")),
    );
    let outcomes = [single(first), single(second)];

    let rejected: Vec<_> = outcomes.iter().filter_map(|response| response.error.as_ref()).collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].code, -32601);
    assert_eq!(rejected[0].message, "Request contains duplicated id");
    assert!(outcomes.iter().any(|response| response.result == Some(json!("eth_chainId"))));
}

#[tokio::test]
async fn test_timeout_fails_locally_and_late_reply_is_unsolicited() {
    let node = MockWebSocketServer::new().await.unwrap();
    node.set_reply_delay(Duration::from_millis(1500)).await;
    let (transport, mut events) = transport(Some(node.url()), 1);

    let response = single(transport.send(call(json!(7), "eth_blockNumber")).await);
    let error = response.error.unwrap();
    assert_eq!(error.code, -32000);
    assert_eq!(error.message, "Upstream request timed out");
    assert_eq!(transport.pending_count(), 0);

    match next_event(&mut events).await {
        UpstreamEvent::Subscription(frame) => assert_eq!(frame["id"], 7),
        other => panic!("expected the late reply, got {other:?}"),
    }
}

#[tokio::test]
async fn test_pushes_are_relayed() {
    let node = MockWebSocketServer::new().await.unwrap();
    let (transport, mut events) = transport(Some(node.url()), 5);
    transport.connect().await.unwrap();
    assert!(eventually(Duration::from_secs(2), || node.connections() == 1).await);

    let notification = json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": {"subscription": "0x9ce5", "result": {"number": "0x10"}}
    });
    node.push(&notification);

    assert_eq!(next_event(&mut events).await, UpstreamEvent::Subscription(notification));
}

#[tokio::test]
async fn test_disconnect_is_reported() {
    let node = MockWebSocketServer::new().await.unwrap();
    let (transport, mut events) = transport(Some(node.url()), 5);
    transport.connect().await.unwrap();
    assert!(transport.is_connected());
    assert!(eventually(Duration::from_secs(2), || node.connections() == 1).await);

    node.close_all();

    assert_eq!(next_event(&mut events).await, UpstreamEvent::Disconnected);
    assert!(eventually(Duration::from_secs(2), || !transport.is_connected()).await);
}

#[tokio::test]
async fn test_backend_without_ws_url() {
    let (transport, _events) = transport(None, 5);

    let response = single(transport.send(call(json!(1), "eth_chainId")).await);
    let error = response.error.unwrap();
    assert_eq!(error.code, -32000);
    assert!(error.message.contains("no WebSocket endpoint"), "{}", error.message);
}
