use std::net::SocketAddr;
use std::time::Duration;

use alloy::primitives::U256;
use axum::{http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use url::Url;

use xbridge::error::RpcError;
use xbridge::rpc::FallbackClient;

async fn answer(Json(request): Json<Value>) -> Json<Value> {
    let result = match request["method"].as_str() {
        Some("eth_blockNumber") => json!("0x1b4"),
        Some("eth_getBalance") => json!("0xde0b6b3a7640000"),
        _ => Value::Null,
    };
    Json(json!({ "jsonrpc": "2.0", "id": request["id"], "result": result }))
}

async fn refuse(Json(request): Json<Value>) -> Json<Value> {
    Json(json!({
        "jsonrpc": "2.0",
        "id": request["id"],
        "error": { "code": -32005, "message": "rate limited" },
    }))
}

async fn serve() -> SocketAddr {
    let app = Router::new()
        .route("/up", post(answer))
        .route("/down", post(|| async { StatusCode::SERVICE_UNAVAILABLE }))
        .route("/limited", post(refuse))
        .route("/garbage", post(|| async { "not json" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn url(addr: SocketAddr, path: &str) -> Url {
    Url::parse(&format!("http://{addr}{path}")).unwrap()
}

#[tokio::test]
async fn failing_endpoints_fall_through_to_a_healthy_one() {
    let addr = serve().await;
    let client = FallbackClient::http(Duration::from_secs(5));
    let endpoints = [
        url(addr, "/down"),
        url(addr, "/limited"),
        url(addr, "/garbage"),
        url(addr, "/up"),
    ];

    assert_eq!(client.block_number(&endpoints).await.unwrap(), U256::from(436u64));
    let owner = alloy::primitives::Address::repeat_byte(0x11);
    assert_eq!(
        client.balance(&endpoints, owner).await.unwrap(),
        U256::from(1_000_000_000_000_000_000u64)
    );
}

#[tokio::test]
async fn exhausted_list_reports_every_attempt() {
    let addr = serve().await;
    let client = FallbackClient::http(Duration::from_secs(5));
    let endpoints = [url(addr, "/down"), url(addr, "/limited")];

    let err = client.block_number(&endpoints).await.unwrap_err();
    assert!(matches!(err, RpcError::EndpointsExhausted { attempted: 2 }));
    assert!(!client.probe(&endpoints).await);
    assert!(client.reachability(&url(addr, "/up")).await);
}
