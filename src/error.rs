use alloy::primitives::TxHash;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stage::Stage;

/// Failure of a single endpoint. Never leaves the fallback loop except through
/// [`crate::rpc::RpcTransport`] implementations and logs.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc endpoints exhausted after {attempted} attempt(s)")]
    EndpointsExhausted { attempted: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    #[error("request rejected by user")]
    UserRejected,
    #[error("no signer available")]
    Unavailable,
    #[error("signer: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid network: {0}")]
    InvalidNetwork(String),
    #[error("network not found: {0}")]
    NotFound(String),
    #[error("persisting networks: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Signer(#[from] SignerError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error("invalid asset {symbol}: {reason}")]
    InvalidAsset { symbol: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ProofError {
    #[error("proof service request failed: {0}")]
    Transport(String),
    #[error("proof service returned malformed data: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error("annotator request failed: {0}")]
    Transport(String),
    #[error("annotator returned no text")]
    Empty,
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("{asset} always routes through {default}; override not allowed")]
    OverrideNotAllowed { asset: String, default: String },
}

/// Errors returned to the caller of the orchestrator. None of these create or
/// mutate an attempt.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("a transfer is already in progress ({0})")]
    AttemptInProgress(Stage),
    #[error("the last transfer failed; reset before starting another")]
    ResetRequired,
    #[error("no signer bound to the session")]
    SignerUnavailable,
    #[error("no transfer attempt to act on")]
    NoAttempt,
    #[error("cannot reset while {0}")]
    ResetNotAllowed(Stage),
    #[error("only a failed transfer can be retried ({0})")]
    NotRetryable(Stage),
    #[error("no transfer is waiting for a network switch")]
    NotAwaitingSwitch,
    #[error("configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Classification stored on a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    EndpointsExhausted,
    UserRejected,
    SignerUnavailable,
    Signer,
    Reverted,
    Unconfirmed,
    Config,
}

/// Error raised by one orchestrator step; mapped onto the attempt's failure record.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Signer(#[from] SignerError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("transaction {0} reverted")]
    Reverted(TxHash),
    #[error("transaction {0} not confirmed")]
    Unconfirmed(TxHash),
    #[error("{0}")]
    Config(String),
}

impl StepError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Rpc(RpcError::EndpointsExhausted { .. }) => FailureKind::EndpointsExhausted,
            Self::Signer(err) | Self::Registry(RegistryError::Signer(err)) => match err {
                SignerError::UserRejected => FailureKind::UserRejected,
                SignerError::Unavailable => FailureKind::SignerUnavailable,
                SignerError::Other(_) => FailureKind::Signer,
            },
            Self::Registry(_) | Self::Config(_) => FailureKind::Config,
            Self::Reverted(_) => FailureKind::Reverted,
            Self::Unconfirmed(_) => FailureKind::Unconfirmed,
        }
    }

    /// Text shown to the user for a failed attempt.
    pub fn user_message(&self) -> String {
        match self.kind() {
            FailureKind::UserRejected => {
                "The request was declined in the wallet. Nothing was submitted for this step; \
                 retry when ready."
                    .to_string()
            }
            FailureKind::SignerUnavailable => {
                "The wallet is no longer reachable. Reconnect it and retry.".to_string()
            }
            FailureKind::EndpointsExhausted => {
                format!("Every RPC endpoint failed ({self}). Check the network's RPC list.")
            }
            _ => self.to_string(),
        }
    }
}
