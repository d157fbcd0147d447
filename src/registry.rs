use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use url::Url;

use crate::error::{RegistryError, SignerError, StoreError};
use crate::network::{
    builtin_networks, ChainId, Network, NetworkId, NetworkKind, ProtocolContracts, RoutingIds,
};
use crate::signer::{ChainDefinition, Signer, SwitchOutcome};

/// Flat key-value persistence for the custom network list.
pub trait NetworkStore: Send + Sync {
    fn load(&self) -> Result<Vec<Network>, StoreError>;
    /// Replaces the stored list wholesale.
    fn save(&self, networks: &[Network]) -> Result<(), StoreError>;
}

/// JSON array on disk. A missing file reads as an empty list.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl NetworkStore for JsonFileStore {
    fn load(&self) -> Result<Vec<Network>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, networks: &[Network]) -> Result<(), StoreError> {
        let raw = serde_json::to_vec_pretty(networks)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    networks: Mutex<Vec<Network>>,
}

impl MemoryStore {
    pub fn with(networks: Vec<Network>) -> Self {
        Self {
            networks: Mutex::new(networks),
        }
    }

    pub fn snapshot(&self) -> Vec<Network> {
        self.networks.lock().map(|n| n.clone()).unwrap_or_default()
    }
}

impl NetworkStore for MemoryStore {
    fn load(&self) -> Result<Vec<Network>, StoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, networks: &[Network]) -> Result<(), StoreError> {
        if let Ok(mut stored) = self.networks.lock() {
            *stored = networks.to_vec();
        }
        Ok(())
    }
}

/// User-supplied definition of a virtual test hub.
#[derive(Debug, Clone, Default)]
pub struct HubSpec {
    pub chain_id: u64,
    /// Comma separated, in fallback order.
    pub rpc: String,
    pub name: Option<String>,
    pub explorer_url: Option<Url>,
    /// Parent network. Unset contracts and routing ids are taken from it, and
    /// assets resolve through it.
    pub fork_of: Option<NetworkId>,
    pub contracts: ProtocolContracts,
    pub routing: RoutingIds,
}

/// Built-in networks followed by user-declared hubs, in registration order.
pub struct NetworkRegistry {
    builtin: Vec<Network>,
    custom: Vec<Network>,
    store: Box<dyn NetworkStore>,
}

impl NetworkRegistry {
    /// Reads the custom list once. Stored entries that no longer validate are skipped.
    pub fn open(store: Box<dyn NetworkStore>) -> Result<Self, RegistryError> {
        let builtin = builtin_networks();
        let mut custom: Vec<Network> = Vec::new();
        for network in store.load()? {
            let clash = builtin.iter().chain(&custom).any(|n| n.id == network.id);
            let orphan = network
                .fork_of
                .as_ref()
                .is_some_and(|parent| !builtin.iter().chain(&custom).any(|n| &n.id == parent));
            match network.validate() {
                Ok(()) if orphan => warn!(id = %network.id, "stored hub forks an unknown network, skipped"),
                Ok(()) if !clash => custom.push(network),
                Ok(()) => warn!(id = %network.id, "stored network shadows an existing id, skipped"),
                Err(err) => warn!(id = %network.id, %err, "stored network invalid, skipped"),
            }
        }
        info!(builtin = builtin.len(), custom = custom.len(), "network registry opened");
        Ok(Self {
            builtin,
            custom,
            store,
        })
    }

    pub fn list(&self) -> Vec<Network> {
        self.builtin.iter().chain(&self.custom).cloned().collect()
    }

    pub fn ids(&self) -> Vec<NetworkId> {
        self.builtin
            .iter()
            .chain(&self.custom)
            .map(|n| n.id.clone())
            .collect()
    }

    pub fn get(&self, id: &NetworkId) -> Result<Network, RegistryError> {
        self.builtin
            .iter()
            .chain(&self.custom)
            .find(|n| &n.id == id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn register(&mut self, network: Network) -> Result<(), RegistryError> {
        network.validate()?;
        if self.get(&network.id).is_ok() {
            return Err(RegistryError::InvalidNetwork(format!(
                "network id {} already registered",
                network.id
            )));
        }
        if let Some(parent) = &network.fork_of {
            if self.get(parent).is_err() {
                return Err(RegistryError::InvalidNetwork(format!(
                    "hub forks unknown network {parent}"
                )));
            }
        }

        let mut custom = self.custom.clone();
        custom.push(network);
        self.store.save(&custom)?;
        let added = custom.last().map(|n| n.id.to_string()).unwrap_or_default();
        self.custom = custom;
        info!(id = %added, "network registered");
        Ok(())
    }

    /// Builds and registers a custom hub, returning its id.
    pub fn deploy_hub(&mut self, spec: HubSpec) -> Result<NetworkId, RegistryError> {
        let rpc_urls = spec
            .rpc
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                Url::parse(s)
                    .map_err(|e| RegistryError::InvalidNetwork(format!("rpc url {s:?}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let id = loop {
            let id: NetworkId = format!("hub-{}-{stamp}", spec.chain_id).parse()?;
            if self.get(&id).is_err() {
                break id;
            }
            stamp += 1;
        };

        let (mut contracts, mut routing) = (spec.contracts, spec.routing);
        if let Some(parent) = &spec.fork_of {
            let parent = self.get(parent).map_err(|_| {
                RegistryError::InvalidNetwork(format!("hub forks unknown network {parent}"))
            })?;
            contracts.token_messenger = contracts.token_messenger.or(parent.contracts.token_messenger);
            contracts.message_transmitter = contracts
                .message_transmitter
                .or(parent.contracts.message_transmitter);
            contracts.relay_endpoint = contracts.relay_endpoint.or(parent.contracts.relay_endpoint);
            routing.cctp_domain = routing.cctp_domain.or(parent.routing.cctp_domain);
            routing.relay_eid = routing.relay_eid.or(parent.routing.relay_eid);
        }

        self.register(Network {
            id: id.clone(),
            name: spec
                .name
                .unwrap_or_else(|| format!("Virtual Hub ({})", spec.chain_id)),
            kind: NetworkKind::CustomHub,
            chain: ChainId::new(spec.chain_id),
            rpc_urls,
            explorer_url: spec.explorer_url,
            currency: "ETH".into(),
            contracts,
            routing,
            custom: true,
            fork_of: spec.fork_of,
        })?;
        Ok(id)
    }

    /// Points the signer at `network`, teaching it the chain first if needed.
    /// Needs no registry access, so callers can release their lock before the
    /// signer prompts.
    pub async fn switch_or_register(
        signer: &dyn Signer,
        network: &Network,
    ) -> Result<(), RegistryError> {
        let chain_id = network.chain_id();
        match signer.switch_chain(chain_id).await {
            Ok(SwitchOutcome::Switched) => {
                debug!(chain_id, "signer switched chain");
                return Ok(());
            }
            Ok(SwitchOutcome::UnknownChain) => {}
            Err(SignerError::Other(reason)) if network.custom => {
                debug!(chain_id, %reason, "switch failed for custom network, adding it");
            }
            Err(err) => return Err(err.into()),
        }

        info!(chain_id, network = %network.id, "signer does not know chain, adding it");
        signer.add_chain(&ChainDefinition::from(network)).await?;
        match signer.switch_chain(chain_id).await? {
            SwitchOutcome::Switched => Ok(()),
            SwitchOutcome::UnknownChain => Err(SignerError::Other(format!(
                "signer still does not know chain {chain_id} after adding it"
            ))
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSigner;

    fn hub(chain_id: u64, rpc: &str) -> HubSpec {
        HubSpec {
            chain_id,
            rpc: rpc.into(),
            ..Default::default()
        }
    }

    #[test]
    fn builtins_come_first() {
        let registry = NetworkRegistry::open(Box::new(MemoryStore::default())).unwrap();
        let ids: Vec<_> = registry.list().into_iter().map(|n| n.id.to_string()).collect();
        assert_eq!(ids, ["sepolia", "mainnet"]);
        assert!(registry.get(&"base".parse().unwrap()).is_err());
    }

    #[test]
    fn stored_entries_shadowing_builtins_are_skipped() {
        let mut shadow = builtin_networks().remove(0);
        shadow.name = "Not Sepolia".into();
        let registry = NetworkRegistry::open(Box::new(MemoryStore::with(vec![shadow]))).unwrap();
        assert_eq!(registry.list().len(), 2);
        assert_eq!(
            registry.get(&"sepolia".parse().unwrap()).unwrap().name,
            "Sepolia Testnet"
        );
    }

    #[test]
    fn register_rejects_empty_rpc_and_disagreeing_chain_ids() {
        let mut registry = NetworkRegistry::open(Box::new(MemoryStore::default())).unwrap();
        let mut network = registry.list().remove(0);
        network.id = "other".parse().unwrap();
        network.rpc_urls.clear();
        assert!(matches!(
            registry.register(network),
            Err(RegistryError::InvalidNetwork(_))
        ));

        let json = serde_json::json!({
            "id": "bad", "name": "Bad", "kind": "CUSTOM_HUB",
            "chainId": 5, "chainIdHex": "0x6",
            "rpcUrls": ["http://localhost:8545"], "currency": "ETH"
        });
        assert!(serde_json::from_value::<Network>(json).is_err());
    }

    #[test]
    fn deploy_hub_persists_wholesale_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nets.json");
        let mut registry = NetworkRegistry::open(Box::new(JsonFileStore::new(&path))).unwrap();

        let first = registry
            .deploy_hub(hub(3030, " https://a.rpc.test , ,https://b.rpc.test"))
            .unwrap();
        let second = registry.deploy_hub(hub(3030, "https://c.rpc.test")).unwrap();
        assert_ne!(first, second);

        let network = registry.get(&first).unwrap();
        assert_eq!(network.kind, NetworkKind::CustomHub);
        assert_eq!(network.name, "Virtual Hub (3030)");
        assert_eq!(network.chain.hex(), "0xbd6");
        assert_eq!(network.rpc_urls.len(), 2);

        let reopened = NetworkRegistry::open(Box::new(JsonFileStore::new(&path))).unwrap();
        let ids: Vec<_> = reopened.list().into_iter().map(|n| n.id).collect();
        assert_eq!(ids[2..], [first, second]);
    }

    #[test]
    fn deploy_hub_without_rpc_is_invalid() {
        let mut registry = NetworkRegistry::open(Box::new(MemoryStore::default())).unwrap();
        assert!(matches!(
            registry.deploy_hub(hub(7, " , ")),
            Err(RegistryError::InvalidNetwork(_))
        ));
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn forked_hub_inherits_unset_contracts_and_rejects_unknown_parent() {
        let mut registry = NetworkRegistry::open(Box::new(MemoryStore::default())).unwrap();
        let mainnet = registry.get(&"mainnet".parse().unwrap()).unwrap();

        let mut spec = hub(3030, "http://localhost:8545");
        spec.fork_of = Some(mainnet.id.clone());
        spec.routing.relay_eid = Some(40_999);
        let id = registry.deploy_hub(spec).unwrap();

        let forked = registry.get(&id).unwrap();
        assert_eq!(forked.fork_of, Some(mainnet.id.clone()));
        assert_eq!(forked.contracts, mainnet.contracts);
        assert_eq!(forked.routing.cctp_domain, mainnet.routing.cctp_domain);
        assert_eq!(forked.routing.relay_eid, Some(40_999));

        let mut orphan = hub(3031, "http://localhost:8546");
        orphan.fork_of = Some("base".parse().unwrap());
        assert!(matches!(
            registry.deploy_hub(orphan),
            Err(RegistryError::InvalidNetwork(_))
        ));

        let mut stored = forked.clone();
        stored.id = "stray".parse().unwrap();
        stored.fork_of = Some("base".parse().unwrap());
        assert!(matches!(
            registry.register(stored.clone()),
            Err(RegistryError::InvalidNetwork(_))
        ));
        let reopened = NetworkRegistry::open(Box::new(MemoryStore::with(vec![stored]))).unwrap();
        assert_eq!(reopened.list().len(), 2);
    }

    #[tokio::test]
    async fn switch_or_register_adds_unknown_chain() {
        let mut registry = NetworkRegistry::open(Box::new(MemoryStore::default())).unwrap();
        let id = registry.deploy_hub(hub(3030, "http://localhost:8545")).unwrap();
        let network = registry.get(&id).unwrap();
        let signer = ScriptedSigner::new(1);

        NetworkRegistry::switch_or_register(&signer, &network).await.unwrap();

        assert_eq!(signer.active_chain_now(), 3030);
        assert_eq!(signer.added_chains(), vec![3030]);
    }

    #[tokio::test]
    async fn switch_or_register_keeps_rejection_distinct() {
        let registry = NetworkRegistry::open(Box::new(MemoryStore::default())).unwrap();
        let mainnet = registry.get(&"mainnet".parse().unwrap()).unwrap();

        let signer = ScriptedSigner::new(11_155_111).reject_switch();
        let err = NetworkRegistry::switch_or_register(&signer, &mainnet).await.unwrap_err();
        assert!(matches!(err, RegistryError::Signer(SignerError::UserRejected)));

        let signer = ScriptedSigner::new(11_155_111).unavailable();
        let err = NetworkRegistry::switch_or_register(&signer, &mainnet).await.unwrap_err();
        assert!(matches!(err, RegistryError::Signer(SignerError::Unavailable)));
    }
}
