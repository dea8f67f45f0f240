//! HTTP transport tests against a mockito backend.

use crate::mock_infrastructure::{batch_responses, single_response, RpcMockBuilder};
use gate_core::{
    config::BackendConfig,
    types::parse_payload,
    upstream::{HttpClient, HttpTransport, RequestContext, UpstreamError, UpstreamTransport},
};
use serde_json::json;
use std::sync::Arc;

fn transport(url: &str) -> HttpTransport {
    let context = RequestContext::new(Arc::new(BackendConfig::new("mainnet", url)));
    HttpTransport::new(context, HttpClient::new().unwrap())
}

#[tokio::test]
async fn test_batch_is_forwarded_in_one_post() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_echo().await;
    let transport = transport(&mock.url());

    let request = parse_payload(
        br#"[{"jsonrpc":"2.0","id":1,"method":"eth_chainId"},{"jsonrpc":"2.0","id":"two","method":"net_version"}]"#,
    )
    .unwrap();
    let responses = batch_responses(transport.send(request).await);

    assert_eq!(responses.len(), 2);
    assert_eq!(*responses[0].id, json!(1));
    assert_eq!(responses[0].result, Some(json!("eth_chainId")));
    assert_eq!(*responses[1].id, json!("two"));
    assert_eq!(responses[1].result, Some(json!("net_version")));
}

#[tokio::test]
async fn test_http_error_names_methods() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_status(503).await;
    let transport = transport(&mock.url());

    let request = parse_payload(br#"{"jsonrpc":"2.0","id":4,"method":"eth_getBalance","params":["0x0","latest"]}"#)
        .unwrap();
    let response = single_response(transport.send(request).await);

    assert_eq!(*response.id, json!(4));
    let error = response.error.unwrap();
    assert_eq!(error.code, -32000);
    assert_eq!(error.message, "Upstream request returned 503");
    assert_eq!(error.data, Some(json!({"methods": ["eth_getBalance"]})));
}

#[tokio::test]
async fn test_unreachable_backend() {
    let transport = transport("http://127.0.0.1:1");

    let request = parse_payload(br#"{"jsonrpc":"2.0","id":1,"method":"eth_chainId"}"#).unwrap();
    let response = single_response(transport.send(request).await);

    let error = response.error.unwrap();
    assert_eq!(error.code, -32000);
    assert!(error.message.starts_with("Upstream request failed"), "{}", error.message);
    assert!(!error.message.contains("127.0.0.1"), "address leaked: {}", error.message);
}

#[tokio::test]
async fn test_block_number_and_latest_block() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_block_number(5_000_000).await;
    mock.mock_latest_block(5_000_000, 1_700_000_000).await;
    let transport = transport(&mock.url());

    assert_eq!(transport.get_block_number().await.unwrap(), 5_000_000);
    let block = transport.get_block().await.unwrap();
    assert_eq!(block["number"], format!("0x{:x}", 5_000_000));
}

#[tokio::test]
async fn test_rpc_error_surfaces_from_internal_calls() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_rpc_error("eth_blockNumber", -32005, "limit exceeded").await;
    let transport = transport(&mock.url());

    match transport.get_block_number().await {
        Err(UpstreamError::RpcError(code, message)) => {
            assert_eq!(code, -32005);
            assert_eq!(message, "limit exceeded");
        }
        other => panic!("expected an rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_null_result_is_kept() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_result("eth_getTransactionReceipt", serde_json::Value::Null).await;
    let transport = transport(&mock.url());

    let request =
        parse_payload(br#"{"jsonrpc":"2.0","id":1,"method":"eth_getTransactionReceipt","params":["0x1"]}"#).unwrap();
    let response = single_response(transport.send(request).await);
    assert_eq!(response.result, Some(serde_json::Value::Null));
    assert!(response.error.is_none());
}

#[tokio::test]
async fn test_reply_is_relayed_verbatim() {
    let mut server = mockito::Server::new_async().await;
    let body = r#"{"id":1,"result":"0x1","node":{"client":"geth"}}"#;
    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create_async()
        .await;
    let transport = transport(&server.url());

    let request = parse_payload(br#"{"jsonrpc":"2.0","id":1,"method":"eth_chainId"}"#).unwrap();
    let reply = transport.send(request).await;
    assert_eq!(reply, serde_json::from_str::<serde_json::Value>(body).unwrap());
}

#[tokio::test]
async fn test_non_json_reply_is_an_upstream_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server.mock("POST", "/").with_status(200).with_body("<html>").create_async().await;
    let transport = transport(&server.url());

    let request = parse_payload(br#"{"jsonrpc":"2.0","id":6,"method":"eth_chainId"}"#).unwrap();
    let response = single_response(transport.send(request).await);
    assert_eq!(*response.id, json!(6));
    assert_eq!(response.error.unwrap().code, -32000);
}
