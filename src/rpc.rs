use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::error::{EndpointError, RpcError};

/// Moves one JSON-RPC request body to one endpoint and returns the response body.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn send(&self, endpoint: &Url, request: &Value) -> Result<Value, EndpointError>;
}

/// JSON over HTTP POST.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(&self, endpoint: &Url, request: &Value) -> Result<Value, EndpointError> {
        let response = self
            .client
            .post(endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| EndpointError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EndpointError::Status(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| EndpointError::Malformed(e.to_string()))
    }
}

/// Answers reads locally for dry runs: every receipt succeeds and balances
/// are fixed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedTransport;

#[async_trait]
impl RpcTransport for SimulatedTransport {
    async fn send(&self, _endpoint: &Url, request: &Value) -> Result<Value, EndpointError> {
        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
        let result = match method {
            "eth_blockNumber" => json!("0x1"),
            // 1 ETH
            "eth_getBalance" => json!("0xde0b6b3a7640000"),
            // balanceOf: 1000 units at 6 decimals
            "eth_call" => json!(format!("0x{:064x}", 1_000_000_000u64)),
            "eth_getTransactionReceipt" => json!({ "status": "0x1" }),
            other => {
                return Err(EndpointError::Remote {
                    code: -32601,
                    message: format!("{other} is not simulated"),
                })
            }
        };
        Ok(json!({
            "jsonrpc": "2.0",
            "id": request.get("id").cloned().unwrap_or(Value::Null),
            "result": result,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Issues a logical request against an ordered endpoint list, falling through
/// to the next endpoint until one answers successfully.
#[derive(Clone)]
pub struct FallbackClient {
    transport: Arc<dyn RpcTransport>,
    timeout: Duration,
    next_id: Arc<AtomicU64>,
}

impl FallbackClient {
    pub fn new(transport: Arc<dyn RpcTransport>, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn http(timeout: Duration) -> Self {
        Self::new(Arc::new(HttpTransport::default()), timeout)
    }

    pub async fn call(
        &self,
        endpoints: &[Url],
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        self.call_decoded(endpoints, method, params, Ok).await
    }

    /// Like [`Self::call`], but a result that fails `decode` counts as a
    /// malformed payload and moves on to the next endpoint.
    pub async fn call_decoded<T>(
        &self,
        endpoints: &[Url],
        method: &str,
        params: Value,
        decode: impl Fn(Value) -> Result<T, String>,
    ) -> Result<T, RpcError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        for endpoint in endpoints {
            let outcome = self
                .try_endpoint(endpoint, &request)
                .await
                .and_then(|result| decode(result).map_err(EndpointError::Malformed));
            match outcome {
                Ok(value) => return Ok(value),
                Err(err) => debug!(%endpoint, method, %err, "rpc endpoint failed, trying next"),
            }
        }

        warn!(method, attempted = endpoints.len(), "rpc endpoints exhausted");
        Err(RpcError::EndpointsExhausted {
            attempted: endpoints.len(),
        })
    }

    async fn try_endpoint(&self, endpoint: &Url, request: &Value) -> Result<Value, EndpointError> {
        let mut body = tokio::time::timeout(self.timeout, self.transport.send(endpoint, request))
            .await
            .map_err(|_| EndpointError::Timeout)??;

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            return Err(EndpointError::Remote {
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        body.get_mut("result")
            .map(Value::take)
            .ok_or_else(|| EndpointError::Malformed("response has no result".into()))
    }

    /// Lightweight read-only probe of a single endpoint.
    pub async fn reachability(&self, url: &Url) -> bool {
        self.probe(std::slice::from_ref(url)).await
    }

    /// True when any endpoint in the list answers the probe.
    pub async fn probe(&self, endpoints: &[Url]) -> bool {
        self.block_number(endpoints).await.is_ok()
    }

    pub async fn block_number(&self, endpoints: &[Url]) -> Result<U256, RpcError> {
        self.call_decoded(endpoints, "eth_blockNumber", json!([]), |v| {
            parse_quantity(&v)
        })
        .await
    }

    pub async fn balance(&self, endpoints: &[Url], owner: Address) -> Result<U256, RpcError> {
        self.call_decoded(
            endpoints,
            "eth_getBalance",
            json!([owner, "latest"]),
            |v| parse_quantity(&v),
        )
        .await
    }

    /// Read-only contract call; undecodable return data counts against the endpoint.
    pub async fn eth_call<T>(
        &self,
        endpoints: &[Url],
        to: Address,
        data: &Bytes,
        decode: impl Fn(&[u8]) -> Result<T, String>,
    ) -> Result<T, RpcError> {
        self.call_decoded(
            endpoints,
            "eth_call",
            json!([{ "to": to, "data": data }, "latest"]),
            |v| decode(&parse_bytes(&v)?),
        )
        .await
    }

    /// `None` while the transaction is still pending.
    pub async fn transaction_receipt(
        &self,
        endpoints: &[Url],
        hash: TxHash,
    ) -> Result<Option<ReceiptStatus>, RpcError> {
        self.call_decoded(
            endpoints,
            "eth_getTransactionReceipt",
            json!([hash]),
            |v| {
                if v.is_null() {
                    return Ok(None);
                }
                let status = v.get("status").ok_or("receipt has no status")?;
                Ok(Some(if parse_quantity(status)?.is_zero() {
                    ReceiptStatus::Reverted
                } else {
                    ReceiptStatus::Success
                }))
            },
        )
        .await
    }
}

pub fn parse_quantity(value: &Value) -> Result<U256, String> {
    let raw = value.as_str().ok_or_else(|| format!("expected hex string, got {value}"))?;
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| format!("quantity {raw:?} lacks 0x"))?;
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).map_err(|e| format!("quantity {raw:?}: {e}"))
}

pub fn parse_bytes(value: &Value) -> Result<Bytes, String> {
    value
        .as_str()
        .ok_or_else(|| format!("expected hex data, got {value}"))?
        .parse()
        .map_err(|e| format!("hex data: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticTransport;

    fn urls(n: usize) -> Vec<Url> {
        (0..n)
            .map(|i| Url::parse(&format!("http://rpc{i}.test")).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn first_success_wins_and_later_endpoints_are_untouched() {
        let endpoints = urls(4);
        let transport = StaticTransport::default()
            .fail(&endpoints[0])
            .result(&endpoints[1], json!("0x10"))
            .result(&endpoints[2], json!("0x20"));
        let client = FallbackClient::new(Arc::new(transport.clone()), Duration::from_secs(1));

        let value = client.call(&endpoints, "eth_blockNumber", json!([])).await.unwrap();

        assert_eq!(value, json!("0x10"));
        assert_eq!(transport.hits(), vec![endpoints[0].clone(), endpoints[1].clone()]);
    }

    #[tokio::test]
    async fn exhaustion_only_after_every_endpoint() {
        let endpoints = urls(3);
        let transport = StaticTransport::default();
        let client = FallbackClient::new(Arc::new(transport.clone()), Duration::from_secs(1));

        let err = client.call(&endpoints, "eth_chainId", json!([])).await.unwrap_err();

        assert!(matches!(err, RpcError::EndpointsExhausted { attempted: 3 }));
        assert_eq!(transport.hits(), endpoints);
    }

    #[tokio::test]
    async fn remote_error_field_and_malformed_results_fall_through() {
        let endpoints = urls(3);
        let transport = StaticTransport::default()
            .body(
                &endpoints[0],
                json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "nope"}}),
            )
            .result(&endpoints[1], json!("not-hex"))
            .result(&endpoints[2], json!("0xff"));
        let client = FallbackClient::new(Arc::new(transport), Duration::from_secs(1));

        assert_eq!(client.block_number(&endpoints).await.unwrap(), U256::from(255));
    }

    #[tokio::test]
    async fn undecodable_call_result_falls_through() {
        let endpoints = urls(2);
        let word = format!("0x{}", "00".repeat(31) + "2a");
        let transport = StaticTransport::default()
            .result(&endpoints[0], json!("0x1234"))
            .result(&endpoints[1], json!(word));
        let client = FallbackClient::new(Arc::new(transport.clone()), Duration::from_secs(1));
        let word_of = |data: &[u8]| {
            <[u8; 32]>::try_from(data)
                .map(U256::from_be_bytes)
                .map_err(|_| format!("expected 32 bytes, got {}", data.len()))
        };

        let value = client
            .eth_call(&endpoints, Address::ZERO, &Bytes::new(), word_of)
            .await
            .unwrap();

        assert_eq!(value, U256::from(42u64));
        assert_eq!(transport.hits(), endpoints);
    }

    #[tokio::test]
    async fn empty_endpoint_list_is_exhausted() {
        let client = FallbackClient::new(Arc::new(StaticTransport::default()), Duration::from_secs(1));
        let err = client.call(&[], "eth_blockNumber", json!([])).await.unwrap_err();
        assert!(matches!(err, RpcError::EndpointsExhausted { attempted: 0 }));
        assert!(!client.probe(&[]).await);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_endpoint_times_out_and_falls_through() {
        let endpoints = urls(2);
        let transport = StaticTransport::default()
            .delayed(&endpoints[0], Duration::from_secs(30), json!("0x1"))
            .result(&endpoints[1], json!("0x2"));
        let client = FallbackClient::new(Arc::new(transport), Duration::from_secs(5));

        assert_eq!(client.block_number(&endpoints).await.unwrap(), U256::from(2));
    }

    #[tokio::test]
    async fn receipt_status_decoding() {
        let endpoints = urls(1);
        let pending = StaticTransport::default().result(&endpoints[0], Value::Null);
        let client = FallbackClient::new(Arc::new(pending), Duration::from_secs(1));
        assert_eq!(client.transaction_receipt(&endpoints, TxHash::ZERO).await.unwrap(), None);

        let reverted = StaticTransport::default().result(&endpoints[0], json!({"status": "0x0"}));
        let client = FallbackClient::new(Arc::new(reverted), Duration::from_secs(1));
        assert_eq!(
            client.transaction_receipt(&endpoints, TxHash::ZERO).await.unwrap(),
            Some(ReceiptStatus::Reverted)
        );
    }

    #[tokio::test]
    async fn simulated_transport_confirms_everything() {
        let client = FallbackClient::new(Arc::new(SimulatedTransport), Duration::from_secs(1));
        let endpoints = urls(1);
        assert!(client.probe(&endpoints).await);
        assert_eq!(
            client.transaction_receipt(&endpoints, TxHash::ZERO).await.unwrap(),
            Some(ReceiptStatus::Success)
        );
        assert!(client.call(&endpoints, "eth_sendRawTransaction", json!([])).await.is_err());
    }

    #[test]
    fn quantities() {
        assert_eq!(parse_quantity(&json!("0x0")).unwrap(), U256::ZERO);
        assert_eq!(parse_quantity(&json!("0x")).unwrap(), U256::ZERO);
        assert!(parse_quantity(&json!(12)).is_err());
        assert_eq!(parse_bytes(&json!("0x0102")).unwrap(), Bytes::from(vec![1u8, 2]));
    }
}
