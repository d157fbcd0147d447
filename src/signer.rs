use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::{
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, Bytes, TxHash, U256},
    providers::{Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::discovery::ProviderHandle;
use crate::error::SignerError;
use crate::network::{Network, ProtocolContracts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    Switched,
    UnknownChain,
}

/// What a signer needs to learn about a chain it does not know yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDefinition {
    pub chain_id: u64,
    pub chain_id_hex: String,
    pub chain_name: String,
    pub currency_symbol: String,
    pub currency_decimals: u8,
    pub rpc_urls: Vec<Url>,
    pub block_explorer_urls: Vec<Url>,
    pub contracts: ProtocolContracts,
}

impl From<&Network> for ChainDefinition {
    fn from(network: &Network) -> Self {
        Self {
            chain_id: network.chain_id(),
            chain_id_hex: network.chain.hex().to_string(),
            chain_name: network.name.clone(),
            currency_symbol: network.currency.clone(),
            currency_decimals: 18,
            rpc_urls: network.rpc_urls.clone(),
            block_explorer_urls: network.explorer_url.iter().cloned().collect(),
            contracts: network.contracts.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// The wallet boundary. Every call may prompt the user and may take arbitrarily long.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn request_accounts(&self) -> Result<Address, SignerError>;
    async fn active_chain(&self) -> Result<u64, SignerError>;
    async fn switch_chain(&self, chain_id: u64) -> Result<SwitchOutcome, SignerError>;
    async fn add_chain(&self, definition: &ChainDefinition) -> Result<(), SignerError>;
    async fn send_transaction(&self, tx: TxRequest) -> Result<TxHash, SignerError>;
    async fn read_only_call(&self, to: Address, data: Bytes) -> Result<Bytes, SignerError>;
}

/// One connected wallet session, passed explicitly into orchestrator and
/// registry operations.
#[derive(Clone, Default)]
pub struct Session {
    handle: Option<ProviderHandle>,
    account: Option<Address>,
}

impl Session {
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub async fn connect(handle: ProviderHandle) -> Result<Self, SignerError> {
        let account = handle.signer().request_accounts().await?;
        info!(wallet = %handle.info.name, %account, "wallet connected");
        Ok(Self {
            handle: Some(handle),
            account: Some(account),
        })
    }

    pub fn handle(&self) -> Option<&ProviderHandle> {
        self.handle.as_ref()
    }

    pub fn signer(&self) -> Option<Arc<dyn Signer>> {
        self.handle.as_ref().map(ProviderHandle::signer)
    }

    pub fn account(&self) -> Option<Address> {
        self.account
    }
}

/// Signs with a local key and submits through the active chain's first RPC endpoint.
pub struct LocalSigner {
    key: PrivateKeySigner,
    chains: Mutex<HashMap<u64, ChainDefinition>>,
    active: Mutex<u64>,
}

impl LocalSigner {
    pub fn new<'a>(
        key: PrivateKeySigner,
        known: impl IntoIterator<Item = &'a Network>,
        active_chain: u64,
    ) -> Self {
        let chains = known
            .into_iter()
            .map(|n| (n.chain_id(), ChainDefinition::from(n)))
            .collect();
        Self {
            key,
            chains: Mutex::new(chains),
            active: Mutex::new(active_chain),
        }
    }

    async fn active_rpc(&self) -> Result<Url, SignerError> {
        let active = *self.active.lock().await;
        self.chains
            .lock()
            .await
            .get(&active)
            .and_then(|def| def.rpc_urls.first().cloned())
            .ok_or_else(|| SignerError::Other(format!("no rpc endpoint for chain {active}")))
    }
}

#[async_trait]
impl Signer for LocalSigner {
    async fn request_accounts(&self) -> Result<Address, SignerError> {
        Ok(self.key.address())
    }

    async fn active_chain(&self) -> Result<u64, SignerError> {
        Ok(*self.active.lock().await)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<SwitchOutcome, SignerError> {
        if !self.chains.lock().await.contains_key(&chain_id) {
            return Ok(SwitchOutcome::UnknownChain);
        }
        *self.active.lock().await = chain_id;
        debug!(chain_id, "local signer switched chain");
        Ok(SwitchOutcome::Switched)
    }

    async fn add_chain(&self, definition: &ChainDefinition) -> Result<(), SignerError> {
        self.chains
            .lock()
            .await
            .insert(definition.chain_id, definition.clone());
        Ok(())
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<TxHash, SignerError> {
        let rpc = self.active_rpc().await?;
        let wallet = EthereumWallet::from(self.key.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(rpc);

        let request = TransactionRequest::default()
            .with_from(self.key.address())
            .with_to(tx.to)
            .with_input(tx.data)
            .with_value(tx.value);
        let pending = provider
            .send_transaction(request)
            .await
            .map_err(|e| SignerError::Other(e.to_string()))?;

        Ok(*pending.tx_hash())
    }

    async fn read_only_call(&self, to: Address, data: Bytes) -> Result<Bytes, SignerError> {
        let rpc = self.active_rpc().await?;
        let provider = ProviderBuilder::new().on_http(rpc);
        let request = TransactionRequest::default().with_to(to).with_input(data);
        provider
            .call(&request)
            .await
            .map_err(|e| SignerError::Other(e.to_string()))
    }
}

/// Stand-in wallet for dry runs: accepts every prompt and fabricates tx hashes.
pub struct SimulatedSigner {
    account: Address,
    latency: Duration,
    chains: Mutex<HashMap<u64, ChainDefinition>>,
    active: Mutex<u64>,
}

impl SimulatedSigner {
    pub fn new<'a>(known: impl IntoIterator<Item = &'a Network>, latency: Duration) -> Self {
        let chains: HashMap<u64, ChainDefinition> = known
            .into_iter()
            .map(|n| (n.chain_id(), ChainDefinition::from(n)))
            .collect();
        let active = chains.keys().copied().min().unwrap_or(1);
        Self {
            account: Address::from(rand::random::<[u8; 20]>()),
            latency,
            chains: Mutex::new(chains),
            active: Mutex::new(active),
        }
    }
}

#[async_trait]
impl Signer for SimulatedSigner {
    async fn request_accounts(&self) -> Result<Address, SignerError> {
        Ok(self.account)
    }

    async fn active_chain(&self) -> Result<u64, SignerError> {
        Ok(*self.active.lock().await)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<SwitchOutcome, SignerError> {
        if !self.chains.lock().await.contains_key(&chain_id) {
            return Ok(SwitchOutcome::UnknownChain);
        }
        *self.active.lock().await = chain_id;
        Ok(SwitchOutcome::Switched)
    }

    async fn add_chain(&self, definition: &ChainDefinition) -> Result<(), SignerError> {
        self.chains
            .lock()
            .await
            .insert(definition.chain_id, definition.clone());
        Ok(())
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<TxHash, SignerError> {
        tokio::time::sleep(self.latency).await;
        let hash = TxHash::from(rand::random::<[u8; 32]>());
        debug!(to = %tx.to, %hash, "simulated transaction");
        Ok(hash)
    }

    async fn read_only_call(&self, _to: Address, _data: Bytes) -> Result<Bytes, SignerError> {
        Ok(Bytes::from(vec![0u8; 32]))
    }
}
