use std::fmt;
use std::str::FromStr;

use alloy::primitives::{address, Address};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::RegistryError;

/// Network identity slug (`sepolia`, `hub-3030-1700000000000`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetworkId(String);

impl NetworkId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NetworkId {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let valid = !value.is_empty()
            && value
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
        if valid {
            Ok(Self(value))
        } else {
            Err(RegistryError::InvalidNetwork(format!(
                "network id {value:?} must be a non-empty [a-z0-9-] slug"
            )))
        }
    }
}

impl FromStr for NetworkId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_string())
    }
}

impl From<NetworkId> for String {
    fn from(id: NetworkId) -> Self {
        id.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chain identifier carried in both decimal and canonical hex form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ChainIdRepr", into = "ChainIdRepr")]
pub struct ChainId {
    decimal: u64,
    hex: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainIdRepr {
    chain_id: u64,
    chain_id_hex: String,
}

impl ChainId {
    pub fn new(decimal: u64) -> Self {
        Self {
            decimal,
            hex: format!("{decimal:#x}"),
        }
    }

    /// Accepts a decimal/hex pair only when both denote the same chain.
    pub fn parse(decimal: u64, hex: &str) -> Result<Self, RegistryError> {
        let digits = hex
            .strip_prefix("0x")
            .or_else(|| hex.strip_prefix("0X"))
            .ok_or_else(|| RegistryError::InvalidNetwork(format!("chain id {hex:?} lacks 0x")))?;
        let parsed = u64::from_str_radix(digits, 16)
            .map_err(|_| RegistryError::InvalidNetwork(format!("chain id {hex:?} is not hex")))?;
        if parsed != decimal {
            return Err(RegistryError::InvalidNetwork(format!(
                "chain id {decimal} disagrees with {hex}"
            )));
        }
        Ok(Self::new(decimal))
    }

    pub fn decimal(&self) -> u64 {
        self.decimal
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl TryFrom<ChainIdRepr> for ChainId {
    type Error = RegistryError;

    fn try_from(repr: ChainIdRepr) -> Result<Self, Self::Error> {
        Self::parse(repr.chain_id, &repr.chain_id_hex)
    }
}

impl From<ChainId> for ChainIdRepr {
    fn from(id: ChainId) -> Self {
        Self {
            chain_id: id.decimal,
            chain_id_hex: id.hex,
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.decimal, self.hex)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkKind {
    Testnet,
    Mainnet,
    CustomHub,
}

/// Protocol contracts deployed on a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolContracts {
    /// CCTP TokenMessenger (burn side).
    pub token_messenger: Option<Address>,
    /// CCTP MessageTransmitter (mint side).
    pub message_transmitter: Option<Address>,
    /// LayerZero V2 endpoint.
    pub relay_endpoint: Option<Address>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingIds {
    pub cctp_domain: Option<u32>,
    /// LayerZero endpoint id.
    pub relay_eid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub id: NetworkId,
    pub name: String,
    pub kind: NetworkKind,
    #[serde(flatten)]
    pub chain: ChainId,
    pub rpc_urls: Vec<Url>,
    #[serde(default)]
    pub explorer_url: Option<Url>,
    pub currency: String,
    #[serde(default)]
    pub contracts: ProtocolContracts,
    #[serde(default)]
    pub routing: RoutingIds,
    #[serde(default)]
    pub custom: bool,
    /// Network this hub forks. Assets without an address of their own on the
    /// hub resolve through it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork_of: Option<NetworkId>,
}

impl Network {
    pub fn chain_id(&self) -> u64 {
        self.chain.decimal()
    }

    pub fn explorer_tx_url(&self, tx: impl fmt::Display) -> Option<String> {
        self.explorer_url
            .as_ref()
            .map(|base| format!("{}/tx/{tx}", base.as_str().trim_end_matches('/')))
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.rpc_urls.is_empty() {
            return Err(RegistryError::InvalidNetwork(format!(
                "{} has no rpc endpoints",
                self.id
            )));
        }
        ChainId::parse(self.chain.decimal(), self.chain.hex())?;
        Ok(())
    }
}

pub const SEPOLIA_TOKEN_MESSENGER: Address = address!("9f3B8679c73C2F338593C1F8Ec0809151d204bd0");
pub const SEPOLIA_MESSAGE_TRANSMITTER: Address =
    address!("7865fAfC2db2093669d92c0F33AeEF291086BEFD");
pub const SEPOLIA_RELAY_ENDPOINT: Address = address!("6ED98E84EE67484916CD306E6641957B762886f6");
pub const MAINNET_TOKEN_MESSENGER: Address = address!("Bd3fa81B58Ba92a8b13A8FE9cC680bF6d09181DB");
pub const MAINNET_MESSAGE_TRANSMITTER: Address =
    address!("0a992d191DEeC32aFe36203Ad87D7d289a738F81");
pub const MAINNET_RELAY_ENDPOINT: Address = address!("1a44076050125825900e736c501f859c50fE728c");

fn builtin_url(raw: &str) -> Vec<Url> {
    Url::parse(raw).into_iter().collect()
}

/// Networks shipped with the engine.
pub fn builtin_networks() -> Vec<Network> {
    vec![
        Network {
            id: NetworkId("sepolia".into()),
            name: "Sepolia Testnet".into(),
            kind: NetworkKind::Testnet,
            chain: ChainId::new(11_155_111),
            rpc_urls: builtin_url("https://rpc.sepolia.org"),
            explorer_url: Url::parse("https://sepolia.etherscan.io").ok(),
            currency: "ETH".into(),
            contracts: ProtocolContracts {
                token_messenger: Some(SEPOLIA_TOKEN_MESSENGER),
                message_transmitter: Some(SEPOLIA_MESSAGE_TRANSMITTER),
                relay_endpoint: Some(SEPOLIA_RELAY_ENDPOINT),
            },
            routing: RoutingIds {
                cctp_domain: Some(0),
                relay_eid: Some(40161),
            },
            custom: false,
            fork_of: None,
        },
        Network {
            id: NetworkId("mainnet".into()),
            name: "Ethereum Mainnet".into(),
            kind: NetworkKind::Mainnet,
            chain: ChainId::new(1),
            rpc_urls: builtin_url("https://eth.llamarpc.com"),
            explorer_url: Url::parse("https://etherscan.io").ok(),
            currency: "ETH".into(),
            contracts: ProtocolContracts {
                token_messenger: Some(MAINNET_TOKEN_MESSENGER),
                message_transmitter: Some(MAINNET_MESSAGE_TRANSMITTER),
                relay_endpoint: Some(MAINNET_RELAY_ENDPOINT),
            },
            routing: RoutingIds {
                cctp_domain: Some(0),
                relay_eid: Some(30101),
            },
            custom: false,
            fork_of: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_id_forms_must_agree() {
        assert_eq!(ChainId::parse(11_155_111, "0xaa36a7").unwrap().hex(), "0xaa36a7");
        assert_eq!(ChainId::parse(1, "0X1").unwrap().decimal(), 1);
        assert!(ChainId::parse(1, "0x2").is_err());
        assert!(ChainId::parse(1, "1").is_err());
        assert!(ChainId::parse(1, "0xzz").is_err());
    }

    #[test]
    fn network_id_is_a_slug() {
        assert!("hub-3030-17".parse::<NetworkId>().is_ok());
        assert!("".parse::<NetworkId>().is_err());
        assert!("Main Net".parse::<NetworkId>().is_err());
    }

    #[test]
    fn network_serializes_both_chain_forms() {
        let sepolia = builtin_networks().remove(0);
        let json = serde_json::to_value(&sepolia).unwrap();
        assert_eq!(json["chainId"], 11_155_111);
        assert_eq!(json["chainIdHex"], "0xaa36a7");
        let back: Network = serde_json::from_value(json).unwrap();
        assert_eq!(back, sepolia);
    }

    #[test]
    fn disagreeing_chain_forms_fail_to_deserialize() {
        let mut json = serde_json::to_value(builtin_networks().remove(1)).unwrap();
        json["chainIdHex"] = "0x5".into();
        assert!(serde_json::from_value::<Network>(json).is_err());
    }

    #[test]
    fn explorer_links() {
        let mainnet = builtin_networks().remove(1);
        assert_eq!(
            mainnet.explorer_tx_url("0xabc").as_deref(),
            Some("https://etherscan.io/tx/0xabc")
        );
    }
}
