use std::collections::{BTreeMap, HashMap};

use alloy::primitives::{Address, U256};
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::asset::{Asset, AssetAddress};
use crate::calls::{balance_of, decode_balance};
use crate::error::RpcError;
use crate::network::{Network, NetworkId};
use crate::rpc::FallbackClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Health {
    Unknown,
    Healthy,
    Unreachable,
}

pub type HealthBoard = BTreeMap<NetworkId, Health>;

/// Balances per network, keyed by asset symbol.
pub type BalanceBoard = BTreeMap<NetworkId, HashMap<String, Balance>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub symbol: String,
    pub raw: U256,
    pub formatted: String,
    /// The read failed; `raw` is zero and means nothing.
    pub degraded: bool,
}

impl Balance {
    fn available(asset: &Asset, raw: U256) -> Self {
        Self {
            symbol: asset.symbol.clone(),
            raw,
            formatted: asset.format_amount(raw),
            degraded: false,
        }
    }

    pub fn unavailable(asset: &Asset) -> Self {
        Self {
            symbol: asset.symbol.clone(),
            raw: U256::ZERO,
            formatted: asset.format_amount(U256::ZERO),
            degraded: true,
        }
    }
}

/// Probes network health and reads balances, publishing both on watch boards.
pub struct Monitor {
    rpc: FallbackClient,
    health: watch::Sender<HealthBoard>,
    balances: watch::Sender<BalanceBoard>,
}

impl Monitor {
    pub fn new(rpc: FallbackClient) -> Self {
        Self {
            rpc,
            health: watch::channel(HealthBoard::new()).0,
            balances: watch::channel(BalanceBoard::new()).0,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthBoard> {
        self.health.subscribe()
    }

    pub fn subscribe_balances(&self) -> watch::Receiver<BalanceBoard> {
        self.balances.subscribe()
    }

    pub fn health(&self) -> HealthBoard {
        self.health.borrow().clone()
    }

    /// Marks every network `Unknown`, probes them concurrently and publishes
    /// each verdict as soon as it lands. A network is unreachable only when
    /// its whole endpoint list is.
    pub async fn check_all(&self, networks: &[Network]) -> HealthBoard {
        self.health.send_modify(|board| {
            for network in networks {
                board.insert(network.id.clone(), Health::Unknown);
            }
        });

        let mut probes: FuturesUnordered<_> = networks
            .iter()
            .map(|network| async move {
                let reachable = self.rpc.probe(&network.rpc_urls).await;
                (&network.id, reachable)
            })
            .collect();

        let mut results = HealthBoard::new();
        while let Some((id, reachable)) = probes.next().await {
            let health = if reachable {
                debug!(network = %id, "network healthy");
                Health::Healthy
            } else {
                warn!(network = %id, "network unreachable");
                Health::Unreachable
            };
            self.health.send_modify(|board| {
                board.insert(id.clone(), health);
            });
            results.insert(id.clone(), health);
        }

        info!(
            networks = results.len(),
            unreachable = results.values().filter(|h| **h == Health::Unreachable).count(),
            "health check finished"
        );
        results
    }

    /// Reads `owner`'s balance of each asset present on `network`. A failed
    /// read degrades only its own entry.
    pub async fn fetch_balances<'a>(
        &self,
        owner: Address,
        assets: impl IntoIterator<Item = &'a Asset>,
        network: &Network,
    ) -> HashMap<String, Balance> {
        let mut reads: FuturesUnordered<_> = assets
            .into_iter()
            .filter_map(|asset| Some((asset, asset.address_for(network)?)))
            .map(|(asset, address)| async move {
                let read = self.read_balance(owner, address, network).await;
                let balance = match read {
                    Ok(raw) => Balance::available(asset, raw),
                    Err(err) => {
                        warn!(network = %network.id, asset = %asset.symbol, %err, "balance unavailable");
                        Balance::unavailable(asset)
                    }
                };
                (asset.symbol.clone(), balance)
            })
            .collect();

        let mut balances = HashMap::new();
        while let Some((symbol, balance)) = reads.next().await {
            balances.insert(symbol, balance);
        }

        self.balances.send_modify(|board| {
            board
                .entry(network.id.clone())
                .or_default()
                .extend(balances.clone());
        });
        balances
    }

    async fn read_balance(
        &self,
        owner: Address,
        address: AssetAddress,
        network: &Network,
    ) -> Result<U256, RpcError> {
        match address {
            AssetAddress::Native => self.rpc.balance(&network.rpc_urls, owner).await,
            AssetAddress::Contract(token) => {
                self.rpc
                    .eth_call(&network.rpc_urls, token, &balance_of(owner), decode_balance)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::builtin_assets;
    use crate::network::builtin_networks;
    use crate::testing::StaticTransport;
    use alloy::primitives::hex;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn monitor(transport: StaticTransport) -> Monitor {
        Monitor::new(FallbackClient::new(Arc::new(transport), Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn only_networks_with_all_endpoints_down_are_unreachable() {
        let mut networks = builtin_networks();
        networks[0].rpc_urls = vec![
            "http://down-a.test".parse().unwrap(),
            "http://down-b.test".parse().unwrap(),
            "http://down-c.test".parse().unwrap(),
        ];
        networks[1].rpc_urls = vec![
            "http://down-d.test".parse().unwrap(),
            "http://up.test".parse().unwrap(),
        ];
        let transport = StaticTransport::default().result(&networks[1].rpc_urls[1], json!("0x1"));
        let monitor = monitor(transport);
        let mut updates = monitor.subscribe();

        let board = monitor.check_all(&networks).await;

        assert_eq!(board[&networks[0].id], Health::Unreachable);
        assert_eq!(board[&networks[1].id], Health::Healthy);
        assert!(updates.has_changed().unwrap());
        assert_eq!(*updates.borrow_and_update(), board);
    }

    #[tokio::test(start_paused = true)]
    async fn interim_board_shows_unknown_until_probe_lands() {
        let networks = builtin_networks();
        let transport = StaticTransport::default()
            .result(&networks[0].rpc_urls[0], json!("0x1"))
            .delayed(&networks[1].rpc_urls[0], Duration::from_millis(500), json!("0x1"));
        let monitor = Arc::new(monitor(transport));
        let mut updates = monitor.subscribe();

        let task = {
            let monitor = monitor.clone();
            let networks = networks.clone();
            tokio::spawn(async move { monitor.check_all(&networks).await })
        };

        let interim = updates
            .wait_for(|b| b.get(&networks[0].id) == Some(&Health::Healthy))
            .await
            .unwrap()
            .clone();
        assert_eq!(interim[&networks[1].id], Health::Unknown);

        let done = task.await.unwrap();
        assert_eq!(done[&networks[1].id], Health::Healthy);
    }

    #[tokio::test]
    async fn one_failed_balance_read_degrades_only_that_asset() {
        let networks = builtin_networks();
        let sepolia = &networks[0];
        let word = hex::encode_prefixed(U256::from(50_000_000u64).to_be_bytes::<32>());
        // eth_getBalance has no route, so the native read fails
        let transport =
            StaticTransport::default().method(&sepolia.rpc_urls[0], "eth_call", json!(word));
        let monitor = monitor(transport);
        let mut assets = builtin_assets();
        assets.retain(|a| a.symbol != "AZR");

        let balances = monitor
            .fetch_balances(Address::repeat_byte(0xaa), &assets, sepolia)
            .await;

        assert!(balances["ETH"].degraded);
        assert!(balances["ETH"].raw.is_zero());
        assert_eq!(balances["USDC"].raw, U256::from(50_000_000u64));
        assert_eq!(balances["USDC"].formatted, "50.000000");
        assert!(!balances["USDC"].degraded);
        assert_eq!(monitor.subscribe_balances().borrow()[&sepolia.id].len(), 2);
    }

    #[tokio::test]
    async fn assets_absent_from_network_are_skipped() {
        let networks = builtin_networks();
        let mut assets = builtin_assets();
        for asset in &mut assets {
            asset.addresses.remove(&networks[1].id);
        }
        let monitor = monitor(StaticTransport::default());
        let balances = monitor
            .fetch_balances(Address::ZERO, &assets, &networks[1])
            .await;
        assert!(balances.is_empty());
    }
}
