use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;

/// Engine configuration, read from TOML. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Fungible symbol routed through burn-and-mint.
    pub canonical_stablecoin: String,
    pub rpc: RpcConfig,
    pub discovery: DiscoveryConfig,
    pub proof: ProofConfig,
    pub finalize: FinalizeConfig,
    pub relay: RelayConfig,
    pub annotator: AnnotatorConfig,
    pub storage: StorageConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            canonical_stablecoin: "USDC".into(),
            rpc: RpcConfig::default(),
            discovery: DiscoveryConfig::default(),
            proof: ProofConfig::default(),
            finalize: FinalizeConfig::default(),
            relay: RelayConfig::default(),
            annotator: AnnotatorConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(?path, "loading configuration");
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        info!(?path, "configuration loaded");
        Ok(config)
    }

    /// Loads `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self { timeout_ms: 8_000 }
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub window_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { window_ms: 500 }
    }
}

impl DiscoveryConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Polling cadence for attestation / delivery waits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProofConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Give up waiting after this long; `None` waits until reset.
    pub max_wait_secs: Option<u64>,
    /// Delay used by the simulated proof source.
    pub simulated_delay_ms: u64,
}

impl Default for ProofConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 2_000,
            max_backoff_ms: 30_000,
            max_wait_secs: None,
            simulated_delay_ms: 4_000,
        }
    }
}

impl ProofConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalizeConfig {
    /// Automatic re-submissions of a failed destination step. Never applied
    /// after a user rejection.
    pub retries: u32,
    pub receipt_polls: u32,
    pub receipt_interval_ms: u64,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            retries: 0,
            receipt_polls: 60,
            receipt_interval_ms: 3_000,
        }
    }
}

impl FinalizeConfig {
    pub fn receipt_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_interval_ms)
    }
}

/// Message-relay fees, paid as transaction value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub fee_wei: U256,
    pub nft_fee_wei: U256,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            // 0.005 ETH
            fee_wei: U256::from(5_000_000_000_000_000u64),
            // 0.1 ETH
            nft_fee_wei: U256::from(100_000_000_000_000_000u64),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotatorConfig {
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key; annotation is off without it.
    pub api_key_env: String,
    pub timeout_ms: u64,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".into(),
            model: "gemini-3-flash-preview".into(),
            api_key_env: "GEMINI_API_KEY".into(),
            timeout_ms: 10_000,
        }
    }
}

impl AnnotatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub custom_networks: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            custom_networks: PathBuf::from("custom_networks.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: BridgeConfig = toml::from_str(
            r#"
            canonical_stablecoin = "EURC"

            [proof]
            max_wait_secs = 600

            [finalize]
            retries = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.canonical_stablecoin, "EURC");
        assert_eq!(config.proof.max_wait(), Some(Duration::from_secs(600)));
        assert_eq!(config.proof.initial_backoff(), Duration::from_secs(2));
        assert_eq!(config.finalize.retries, 1);
        assert_eq!(config.rpc.timeout(), Duration::from_secs(8));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "[rpc]\ntimeout_ms = 1500\n").unwrap();
        let config = BridgeConfig::load(&path).unwrap();
        assert_eq!(config.rpc.timeout_ms, 1500);
        assert!(BridgeConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
