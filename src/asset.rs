use std::collections::BTreeMap;

use alloy::primitives::{
    address,
    utils::{format_units, parse_units},
    Address, U256,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::network::{Network, NetworkId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetKind {
    Native,
    Fungible,
    NonFungible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetAddress {
    Native,
    Contract(Address),
}

impl AssetAddress {
    pub fn contract(self) -> Option<Address> {
        match self {
            Self::Native => None,
            Self::Contract(address) => Some(address),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub kind: AssetKind,
    pub addresses: BTreeMap<NetworkId, AssetAddress>,
}

impl Asset {
    pub fn address_on(&self, network: &NetworkId) -> Option<AssetAddress> {
        self.addresses.get(network).copied()
    }

    /// Address on `network`, falling back to the network it forks.
    pub fn address_for(&self, network: &Network) -> Option<AssetAddress> {
        self.address_on(&network.id)
            .or_else(|| self.address_on(network.fork_of.as_ref()?))
    }

    pub fn is_native(&self) -> bool {
        self.kind == AssetKind::Native
    }

    pub fn is_non_fungible(&self) -> bool {
        self.kind == AssetKind::NonFungible
    }

    /// Human form of a raw amount: decimal units, or a plain count for collections.
    pub fn format_amount(&self, raw: U256) -> String {
        if self.is_non_fungible() {
            return raw.to_string();
        }
        format_units(raw, self.decimals).unwrap_or_else(|_| raw.to_string())
    }
}

/// What a transfer moves: a unit amount, or one token of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferAmount {
    Units(U256),
    TokenId(U256),
}

impl TransferAmount {
    /// Parses user input against the asset: decimal units for fungible and
    /// native assets, a token id for collections.
    pub fn parse(asset: &Asset, input: &str) -> Result<Self, String> {
        let input = input.trim();
        if asset.is_non_fungible() {
            return input
                .parse::<U256>()
                .map(Self::TokenId)
                .map_err(|e| format!("token id {input:?}: {e}"));
        }
        if input.starts_with('-') {
            return Err(format!("amount {input:?} is negative"));
        }
        let units = parse_units(input, asset.decimals)
            .map_err(|e| format!("amount {input:?}: {e}"))?
            .get_absolute();
        if units.is_zero() {
            return Err("amount must be greater than zero".into());
        }
        Ok(Self::Units(units))
    }

    pub fn value(self) -> U256 {
        match self {
            Self::Units(v) | Self::TokenId(v) => v,
        }
    }

    pub fn describe(self, asset: &Asset) -> String {
        match self {
            Self::Units(v) => format!("{} {}", asset.format_amount(v), asset.symbol),
            Self::TokenId(id) => format!("{} #{id}", asset.symbol),
        }
    }
}

/// Loaded, validated asset list. Lookups are by symbol.
#[derive(Debug, Clone, Default)]
pub struct AssetCatalog {
    assets: Vec<Asset>,
}

impl AssetCatalog {
    /// Validates every entry against the set of known network ids.
    pub fn load<'a>(
        assets: Vec<Asset>,
        known: impl IntoIterator<Item = &'a NetworkId>,
    ) -> Result<Self, ConfigError> {
        let known: Vec<&NetworkId> = known.into_iter().collect();
        for (idx, asset) in assets.iter().enumerate() {
            let invalid = |reason: String| ConfigError::InvalidAsset {
                symbol: asset.symbol.clone(),
                reason,
            };
            if assets[..idx].iter().any(|a| a.symbol == asset.symbol) {
                return Err(invalid("duplicate symbol".into()));
            }
            if asset.addresses.is_empty() {
                return Err(invalid("no network addresses".into()));
            }
            for (network, addr) in &asset.addresses {
                if !known.contains(&network) {
                    return Err(invalid(format!("unknown network {network}")));
                }
                let native_entry = matches!(addr, AssetAddress::Native);
                if native_entry != asset.is_native() {
                    return Err(invalid(format!("address kind mismatch on {network}")));
                }
            }
        }
        Ok(Self { assets })
    }

    pub fn get(&self, symbol: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.symbol == symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.iter()
    }
}

fn on_builtins(sepolia: AssetAddress, mainnet: AssetAddress) -> BTreeMap<NetworkId, AssetAddress> {
    ["sepolia", "mainnet"]
        .into_iter()
        .filter_map(|id| id.parse().ok())
        .zip([sepolia, mainnet])
        .collect()
}

pub fn builtin_assets() -> Vec<Asset> {
    vec![
        Asset {
            symbol: "ETH".into(),
            name: "Ethereum".into(),
            decimals: 18,
            kind: AssetKind::Native,
            addresses: on_builtins(AssetAddress::Native, AssetAddress::Native),
        },
        Asset {
            symbol: "USDC".into(),
            name: "USD Coin".into(),
            decimals: 6,
            kind: AssetKind::Fungible,
            addresses: on_builtins(
                AssetAddress::Contract(address!("1c7D4B196Cb0C7B01d743Fbc6116a902379C7238")),
                AssetAddress::Contract(address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48")),
            ),
        },
        Asset {
            symbol: "AZR".into(),
            name: "Azure Wraiths".into(),
            decimals: 0,
            kind: AssetKind::NonFungible,
            addresses: on_builtins(
                AssetAddress::Contract(address!("5FbDB2315678afecb367f032d93F642f64180aa3")),
                AssetAddress::Contract(address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512")),
            ),
        },
    ]
}
