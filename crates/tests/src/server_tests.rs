//! End-to-end tests through the axum router.
//!
//! HTTP routes are driven with `tower::ServiceExt::oneshot`; WebSocket sessions run
//! against a served router and a mock upstream node.

use crate::mock_infrastructure::{
    authority_with_block, closes, eventually, limits, next_json, next_text, send_json, send_raw,
    test_config, MockWebSocketServer, RpcMockBuilder, TestProxy,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use gate_core::{upstream::HttpClient, utils::hash_origin};
use serde_json::{json, Value};
use server::{router::create_router, state::ProxyState};
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;

fn now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap()
}

fn router_for(config: gate_core::config::AppConfig) -> axum::Router {
    let authority = authority_with_block(&config, 0);
    create_router(Arc::new(ProxyState::new(Arc::new(config), authority, HttpClient::new().unwrap())))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get_logs(id: u64, from: Value, to: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": "eth_getLogs", "params": [{"fromBlock": from, "toBlock": to}]})
}

#[tokio::test]
async fn test_health_fresh_block() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_latest_block(100, now() - 1000).await;
    let app = router_for(test_config(&mock.url(), None));

    let response = app
        .oneshot(Request::builder().uri("/mainnet/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["number"], "0x64");
}

#[tokio::test]
async fn test_health_stale_block() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_latest_block(100, now() - 5000).await;
    let app = router_for(test_config(&mock.url(), None));

    let response = app
        .oneshot(Request::builder().uri("/mainnet/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["number"], "0x64");
}

#[tokio::test]
async fn test_post_rate_limit_uses_forwarded_address() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_echo().await;
    let mut config = test_config(&mock.url(), None);
    config.limits = limits(1, 1);
    let app = router_for(config);

    let post = |address: &str| {
        Request::builder()
            .method("POST")
            .uri("/mainnet")
            .header("x-forwarded-for", address)
            .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"eth_chainId"}"#))
            .unwrap()
    };

    let first = body_json(app.clone().oneshot(post("203.0.113.1")).await.unwrap()).await;
    assert_eq!(first["result"], "eth_chainId");

    let second = body_json(app.clone().oneshot(post("203.0.113.1")).await.unwrap()).await;
    assert_eq!(second["error"]["code"], -32029);
    assert_eq!(second["error"]["message"], "Rate limited");

    let other = body_json(app.oneshot(post("203.0.113.2")).await.unwrap()).await;
    assert_eq!(other["result"], "eth_chainId");
}

#[tokio::test]
async fn test_ws_block_range_is_enforced() {
    let node = MockWebSocketServer::new().await.unwrap();
    let mut config = test_config("http://127.0.0.1:1", Some(node.url()));
    config.blocks.max_block_range = Some(1000);
    let proxy = TestProxy::spawn(config, 5_000_000).await;
    let mut client = proxy.connect("mainnet").await;

    send_json(&mut client, &get_logs(1, json!("latest"), json!("latest"))).await;
    let admitted = next_json(&mut client).await;
    assert_eq!(admitted["id"], 1);
    assert_eq!(admitted["result"], "eth_getLogs");

    send_json(&mut client, &get_logs(2, json!(4_000_000), json!("latest"))).await;
    let rejected = next_json(&mut client).await;
    assert_eq!(rejected["id"], 2);
    assert_eq!(rejected["error"]["code"], -32601);
    assert_eq!(rejected["error"]["message"], "Request contains invalid block params");

    assert_eq!(node.get_received_messages().await.len(), 1);
}

#[tokio::test]
async fn test_ws_connection_limit() {
    let node = MockWebSocketServer::new().await.unwrap();
    let mut config = test_config("http://127.0.0.1:1", Some(node.url()));
    config.limits = limits(100, 1);
    let proxy = TestProxy::spawn(config, 0).await;
    let origin = hash_origin("127.0.0.1");

    let mut first = proxy.connect("mainnet").await;
    send_json(&mut first, &json!({"jsonrpc": "2.0", "id": 1, "method": "eth_chainId"})).await;
    assert_eq!(next_json(&mut first).await["result"], "eth_chainId");

    let mut second = proxy.connect("mainnet").await;
    let limited = next_json(&mut second).await;
    assert_eq!(limited["error"]["code"], -32029);
    assert_eq!(limited["error"]["message"], "Connection limited");
    assert!(closes(&mut second).await);
    assert_eq!(proxy.authority.rate_limiter().session_count(&origin), 1);

    drop(first);
    let limiter = Arc::clone(proxy.authority.rate_limiter());
    assert!(eventually(Duration::from_secs(2), || !limiter.has_sessions(&origin)).await);

    let mut third = proxy.connect("mainnet").await;
    send_json(&mut third, &json!({"jsonrpc": "2.0", "id": 3, "method": "net_version"})).await;
    assert_eq!(next_json(&mut third).await["result"], "net_version");
}

#[tokio::test]
async fn test_ws_invalid_frame_terminates() {
    let node = MockWebSocketServer::new().await.unwrap();
    let proxy = TestProxy::spawn(test_config("http://127.0.0.1:1", Some(node.url())), 0).await;
    let mut client = proxy.connect("mainnet").await;

    send_json(&mut client, &json!({"jsonrpc": "2.0", "method": "eth_chainId"})).await;
    let reply = next_json(&mut client).await;
    assert_eq!(reply["error"]["code"], -32600);
    assert_eq!(reply["error"]["message"], "Invalid data");
    assert!(closes(&mut client).await);

    let limiter = Arc::clone(proxy.authority.rate_limiter());
    let origin = hash_origin("127.0.0.1");
    assert!(eventually(Duration::from_secs(2), || !limiter.has_sessions(&origin)).await);
    assert!(eventually(Duration::from_secs(2), || proxy.state.sockets.is_empty()).await);
}

#[tokio::test]
async fn test_ws_unparseable_frame_keeps_session() {
    let node = MockWebSocketServer::new().await.unwrap();
    let proxy = TestProxy::spawn(test_config("http://127.0.0.1:1", Some(node.url())), 0).await;
    let mut client = proxy.connect("mainnet").await;

    send_raw(&mut client, "{not json").await;
    let reply = next_json(&mut client).await;
    assert_eq!(reply["error"]["code"], -32603);

    send_json(&mut client, &json!({"jsonrpc": "2.0", "id": 5, "method": "eth_chainId"})).await;
    assert_eq!(next_json(&mut client).await["id"], 5);
}

#[tokio::test]
async fn test_ws_without_backend_endpoint() {
    let proxy = TestProxy::spawn(test_config("http://127.0.0.1:1", None), 0).await;
    let mut client = proxy.connect("mainnet").await;

    assert_eq!(next_text(&mut client).await.as_deref(), Some("WS backend unavailable"));
    assert!(closes(&mut client).await);
}

#[tokio::test]
async fn test_ws_subscription_push_is_relayed() {
    let node = MockWebSocketServer::new().await.unwrap();
    let proxy = TestProxy::spawn(test_config("http://127.0.0.1:1", Some(node.url())), 0).await;
    let mut client = proxy.connect("mainnet").await;

    send_json(
        &mut client,
        &json!({"jsonrpc": "2.0", "id": 1, "method": "eth_subscribe", "params": ["newHeads"]}),
    )
    .await;
    assert_eq!(next_json(&mut client).await["id"], 1);

    let notification = json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": {"subscription": "0x9ce5", "result": {"number": "0x4c4b40"}}
    });
    node.push(&notification);
    assert_eq!(next_json(&mut client).await, notification);
}

#[tokio::test]
async fn test_ws_upstream_disconnect_closes_client() {
    let node = MockWebSocketServer::new().await.unwrap();
    let proxy = TestProxy::spawn(test_config("http://127.0.0.1:1", Some(node.url())), 0).await;
    let mut client = proxy.connect("mainnet").await;

    send_json(&mut client, &json!({"jsonrpc": "2.0", "id": 1, "method": "eth_chainId"})).await;
    next_json(&mut client).await;

    node.close_all();
    assert!(closes(&mut client).await);

    let limiter = Arc::clone(proxy.authority.rate_limiter());
    let origin = hash_origin("127.0.0.1");
    assert!(eventually(Duration::from_secs(2), || !limiter.has_sessions(&origin)).await);
}
