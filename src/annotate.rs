use std::time::Duration;

use alloy::primitives::TxHash;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::AnnotatorConfig;
use crate::error::AnnotateError;
use crate::strategy::ProtocolKind;

pub const FALLBACK_SUMMARY: &str =
    "AI Security Analysis unavailable at this time. Proceeding with standard verification.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRequest {
    /// Human readable, e.g. `50.000000 USDC`.
    pub amount: String,
    pub source: String,
    pub destination: String,
    pub protocol: ProtocolKind,
    pub tx: TxHash,
}

/// Produces a short advisory text about a submitted transfer.
#[async_trait]
pub trait Annotator: Send + Sync {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String, AnnotateError>;
}

/// Runs the annotator under `timeout`. Never fails; any problem yields
/// [`FALLBACK_SUMMARY`].
pub async fn annotate(annotator: &dyn Annotator, request: &SummaryRequest, timeout: Duration) -> String {
    match tokio::time::timeout(timeout, annotator.summarize(request)).await {
        Ok(Ok(text)) => text,
        Ok(Err(err)) => {
            warn!(tx = %request.tx, %err, "transaction analysis failed");
            FALLBACK_SUMMARY.to_string()
        }
        Err(_) => {
            warn!(tx = %request.tx, "transaction analysis timed out");
            FALLBACK_SUMMARY.to_string()
        }
    }
}

/// Google Gemini `generateContent`.
pub struct GeminiAnnotator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiAnnotator {
    /// `None` when the configured key variable is unset or empty.
    pub fn from_config(config: &AnnotatorConfig) -> Option<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())?;
        Some(Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    fn prompt(request: &SummaryRequest) -> String {
        let process = match request.protocol {
            ProtocolKind::BurnMint => "the Circle attestation",
            ProtocolKind::Relay => "the LayerZero message delivery",
        };
        format!(
            "You are a blockchain security auditor AI for cross-chain transfers. \
             A user is bridging {} from {} to {} over {}. Transaction Hash: {}. \
             Please provide a brief, technical, yet reassuring analysis of this transaction. \
             Mention {process} process. Keep it under 60 words.",
            request.amount, request.source, request.destination, request.protocol, request.tx
        )
    }
}

#[async_trait]
impl Annotator for GeminiAnnotator {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String, AnnotateError> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = json!({
            "contents": [{ "parts": [{ "text": Self::prompt(request) }] }]
        });
        debug!(model = %self.model, tx = %request.tx, "requesting transaction analysis");

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AnnotateError::Transport(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| AnnotateError::Transport(e.to_string()))?;

        body.pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or(AnnotateError::Empty)
    }
}

/// Fixed text after an optional delay.
pub struct StaticAnnotator {
    text: String,
    delay: Duration,
}

impl StaticAnnotator {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Annotator for StaticAnnotator {
    async fn summarize(&self, _request: &SummaryRequest) -> Result<String, AnnotateError> {
        tokio::time::sleep(self.delay).await;
        if self.text.is_empty() {
            return Err(AnnotateError::Empty);
        }
        Ok(self.text.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SummaryRequest {
        SummaryRequest {
            amount: "50.000000 USDC".into(),
            source: "Sepolia Testnet".into(),
            destination: "Ethereum Mainnet".into(),
            protocol: ProtocolKind::BurnMint,
            tx: TxHash::repeat_byte(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_annotator_falls_back() {
        let slow = StaticAnnotator::new("fine").with_delay(Duration::from_secs(60));
        assert_eq!(annotate(&slow, &request(), Duration::from_secs(10)).await, FALLBACK_SUMMARY);
        let quick = StaticAnnotator::new("fine");
        assert_eq!(annotate(&quick, &request(), Duration::from_secs(10)).await, "fine");
    }

    #[tokio::test]
    async fn empty_text_falls_back() {
        let empty = StaticAnnotator::new("");
        assert_eq!(annotate(&empty, &request(), Duration::from_secs(1)).await, FALLBACK_SUMMARY);
    }

    #[test]
    fn prompt_names_the_transfer() {
        let prompt = GeminiAnnotator::prompt(&request());
        assert!(prompt.contains("50.000000 USDC"));
        assert!(prompt.contains("Circle attestation"));
    }

    #[test]
    fn missing_key_disables_annotator() {
        let config = AnnotatorConfig {
            api_key_env: "XBRIDGE_TEST_UNSET_KEY".into(),
            ..Default::default()
        };
        assert!(GeminiAnnotator::from_config(&config).is_none());
    }
}
