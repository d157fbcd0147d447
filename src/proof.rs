use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Bytes, TxHash};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ProofConfig;
use crate::error::ProofError;
use crate::strategy::ProtocolKind;

/// Off-chain evidence that a source-chain send happened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub message: Bytes,
    pub attestation: Bytes,
    /// Set when the relay already delivered on the destination.
    pub delivery_tx: Option<TxHash>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofPoll {
    Pending,
    Ready(Proof),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofRequest {
    pub protocol: ProtocolKind,
    pub source_domain: Option<u32>,
    pub source_eid: Option<u32>,
    pub send_tx: TxHash,
}

/// An attestation or relay-delivery service, polled until it has a proof.
#[async_trait]
pub trait ProofSource: Send + Sync {
    async fn poll(&self, request: &ProofRequest) -> Result<ProofPoll, ProofError>;
}

/// Circle's Iris attestation service.
pub struct IrisAttestationSource {
    client: reqwest::Client,
    base: Url,
}

impl IrisAttestationSource {
    pub const SANDBOX: &'static str = "https://iris-api-sandbox.circle.com";
    pub const PRODUCTION: &'static str = "https://iris-api.circle.com";

    pub fn new(base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
        }
    }
}

#[async_trait]
impl ProofSource for IrisAttestationSource {
    async fn poll(&self, request: &ProofRequest) -> Result<ProofPoll, ProofError> {
        let domain = request
            .source_domain
            .ok_or_else(|| ProofError::Malformed("source network has no CCTP domain".into()))?;
        let mut url = self
            .base
            .join(&format!("v2/messages/{domain}"))
            .map_err(|e| ProofError::Transport(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("transactionHash", &request.send_tx.to_string());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProofError::Transport(e.to_string()))?;
        // not indexed yet
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ProofPoll::Pending);
        }
        if !response.status().is_success() {
            return Err(ProofError::Transport(format!("status {}", response.status())));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProofError::Malformed(e.to_string()))?;
        parse_iris(&body)
    }
}

fn parse_iris(body: &Value) -> Result<ProofPoll, ProofError> {
    let Some(entry) = body
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|m| m.first())
    else {
        return Ok(ProofPoll::Pending);
    };
    if entry.get("status").and_then(Value::as_str) != Some("complete") {
        return Ok(ProofPoll::Pending);
    }
    let field = |name: &str| -> Result<Bytes, ProofError> {
        entry
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| ProofError::Malformed(format!("missing {name}")))?
            .parse()
            .map_err(|e| ProofError::Malformed(format!("{name}: {e}")))
    };
    Ok(ProofPoll::Ready(Proof {
        message: field("message")?,
        attestation: field("attestation")?,
        delivery_tx: None,
    }))
}

/// LayerZero scan, polled for the delivery of a relayed message.
pub struct RelayScanSource {
    client: reqwest::Client,
    base: Url,
}

impl RelayScanSource {
    pub const TESTNET: &'static str = "https://scan-testnet.layerzero-api.com";
    pub const MAINNET: &'static str = "https://scan.layerzero-api.com";

    pub fn new(base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
        }
    }
}

#[async_trait]
impl ProofSource for RelayScanSource {
    async fn poll(&self, request: &ProofRequest) -> Result<ProofPoll, ProofError> {
        let url = self
            .base
            .join(&format!("v1/messages/tx/{}", request.send_tx))
            .map_err(|e| ProofError::Transport(e.to_string()))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProofError::Transport(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ProofPoll::Pending);
        }
        if !response.status().is_success() {
            return Err(ProofError::Transport(format!("status {}", response.status())));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProofError::Malformed(e.to_string()))?;
        parse_relay_scan(&body)
    }
}

fn parse_relay_scan(body: &Value) -> Result<ProofPoll, ProofError> {
    let Some(entry) = body.get("data").and_then(Value::as_array).and_then(|d| d.first()) else {
        return Ok(ProofPoll::Pending);
    };
    let status = entry.pointer("/status/name").and_then(Value::as_str);
    if status != Some("DELIVERED") {
        return Ok(ProofPoll::Pending);
    }
    let delivery_tx = entry
        .pointer("/destination/tx/txHash")
        .and_then(Value::as_str)
        .ok_or_else(|| ProofError::Malformed("delivered message has no destination tx".into()))?
        .parse()
        .map_err(|e| ProofError::Malformed(format!("destination tx: {e}")))?;
    Ok(ProofPoll::Ready(Proof {
        delivery_tx: Some(delivery_tx),
        ..Default::default()
    }))
}

/// Dry-run source: pending until `delay` has passed since the first poll of a
/// given send, then ready with a fabricated proof.
pub struct SimulatedProofSource {
    delay: Duration,
    first_seen: tokio::sync::Mutex<Vec<(TxHash, Instant)>>,
}

impl SimulatedProofSource {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            first_seen: Default::default(),
        }
    }
}

#[async_trait]
impl ProofSource for SimulatedProofSource {
    async fn poll(&self, request: &ProofRequest) -> Result<ProofPoll, ProofError> {
        let mut seen = self.first_seen.lock().await;
        let since = match seen.iter().find(|(tx, _)| *tx == request.send_tx) {
            Some((_, at)) => *at,
            None => {
                seen.push((request.send_tx, Instant::now()));
                return Ok(ProofPoll::Pending);
            }
        };
        if since.elapsed() < self.delay {
            return Ok(ProofPoll::Pending);
        }
        let delivery_tx = match request.protocol {
            ProtocolKind::Relay => Some(TxHash::from(rand::random::<[u8; 32]>())),
            ProtocolKind::BurnMint => None,
        };
        Ok(ProofPoll::Ready(Proof {
            message: Bytes::from(request.send_tx.to_vec()),
            attestation: (0..65).map(|_| rand::random::<u8>()).collect(),
            delivery_tx,
        }))
    }
}

/// Proof sources for both protocols.
#[derive(Clone)]
pub struct ProofSources {
    pub attestation: Arc<dyn ProofSource>,
    pub relay: Arc<dyn ProofSource>,
}

impl ProofSources {
    pub fn for_protocol(&self, protocol: ProtocolKind) -> Arc<dyn ProofSource> {
        match protocol {
            ProtocolKind::BurnMint => self.attestation.clone(),
            ProtocolKind::Relay => self.relay.clone(),
        }
    }

    /// One shared source for both protocols.
    pub fn single(source: Arc<dyn ProofSource>) -> Self {
        Self {
            attestation: source.clone(),
            relay: source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofStatus {
    Pending,
    Ready(Proof),
    /// Cancelled by the caller or timed out.
    Abandoned,
}

/// Polling cadence: exponential from `initial`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub max_wait: Option<Duration>,
}

impl From<&ProofConfig> for Backoff {
    fn from(config: &ProofConfig) -> Self {
        Self {
            initial: config.initial_backoff(),
            max: config.max_backoff(),
            max_wait: config.max_wait(),
        }
    }
}

impl Backoff {
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

/// A running proof poll. Dropping or cancelling it stops polling; nothing
/// on-chain is touched.
pub struct ProofWait {
    status: watch::Receiver<ProofStatus>,
    cancel: watch::Sender<bool>,
}

impl ProofWait {
    pub fn start(source: Arc<dyn ProofSource>, request: ProofRequest, backoff: Backoff) -> Self {
        let (status_tx, status) = watch::channel(ProofStatus::Pending);
        let (cancel, cancel_rx) = watch::channel(false);
        tokio::spawn(poll_until_ready(source, request, backoff, status_tx, cancel_rx));
        Self { status, cancel }
    }

    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Handle that can cancel this wait from elsewhere.
    pub fn canceller(&self) -> ProofCanceller {
        ProofCanceller(self.cancel.clone())
    }

    /// Resolves once the wait leaves `Pending`.
    pub async fn settled(&mut self) -> ProofStatus {
        match self
            .status
            .wait_for(|s| !matches!(s, ProofStatus::Pending))
            .await
        {
            Ok(status) => status.clone(),
            Err(_) => ProofStatus::Abandoned,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProofCanceller(watch::Sender<bool>);

impl ProofCanceller {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

async fn poll_until_ready(
    source: Arc<dyn ProofSource>,
    request: ProofRequest,
    backoff: Backoff,
    status: watch::Sender<ProofStatus>,
    mut cancel: watch::Receiver<bool>,
) {
    let deadline = backoff.max_wait.map(|wait| Instant::now() + wait);
    let mut delay = backoff.initial;
    let mut polls = 0u32;

    let outcome = loop {
        if *cancel.borrow() {
            break ProofStatus::Abandoned;
        }
        polls += 1;
        let poll = tokio::select! {
            poll = source.poll(&request) => poll,
            _ = cancel.changed() => break ProofStatus::Abandoned,
        };
        match poll {
            Ok(ProofPoll::Ready(proof)) => break ProofStatus::Ready(proof),
            Ok(ProofPoll::Pending) => debug!(tx = %request.send_tx, polls, "proof pending"),
            Err(err) => warn!(tx = %request.send_tx, %err, "proof poll failed, will retry"),
        }

        let wake = deadline.map_or(Instant::now() + delay, |d| d.min(Instant::now() + delay));
        tokio::select! {
            _ = tokio::time::sleep_until(wake) => {}
            _ = cancel.changed() => break ProofStatus::Abandoned,
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            warn!(tx = %request.send_tx, polls, "proof wait timed out");
            break ProofStatus::Abandoned;
        }
        delay = backoff.next(delay);
    };

    match &outcome {
        ProofStatus::Ready(_) => info!(tx = %request.send_tx, polls, "proof ready"),
        _ => info!(tx = %request.send_tx, polls, "proof wait abandoned"),
    }
    status.send_replace(outcome);
}
