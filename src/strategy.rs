use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, TxHash};
use serde::{Deserialize, Serialize};

use crate::asset::{Asset, AssetAddress, AssetKind, TransferAmount};
use crate::calls::{Approval, Burn, Mint, RelaySend};
use crate::config::RelayConfig;
use crate::error::SelectionError;
use crate::network::Network;
use crate::proof::{Proof, ProofRequest};
use crate::signer::TxRequest;
use crate::stage::{FinalizeKind, ProofKind, SendKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolKind {
    /// Burn on the source, attest off-chain, mint on the destination.
    BurnMint,
    /// Escrow or burn on the source, delivered by a message relay.
    Relay,
}

impl ProtocolKind {
    pub fn send_kind(self) -> SendKind {
        match self {
            Self::BurnMint => SendKind::Burn,
            Self::Relay => SendKind::Message,
        }
    }

    pub fn proof_kind(self) -> ProofKind {
        match self {
            Self::BurnMint => ProofKind::Attestation,
            Self::Relay => ProofKind::RelayDelivery,
        }
    }

    pub fn finalize_kind(self) -> FinalizeKind {
        match self {
            Self::BurnMint => FinalizeKind::Mint,
            Self::Relay => FinalizeKind::Settle,
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BurnMint => "CCTP",
            Self::Relay => "LayerZero",
        })
    }
}

impl FromStr for ProtocolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cctp" | "burn-mint" => Ok(Self::BurnMint),
            "layerzero" | "relay" => Ok(Self::Relay),
            other => Err(format!("unknown protocol {other:?}")),
        }
    }
}

/// Picks the protocol for an asset. Holds only the canonical stablecoin symbol,
/// so selection depends on nothing but its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolSelector {
    canonical: String,
}

impl ProtocolSelector {
    pub fn new(canonical: impl Into<String>) -> Self {
        Self {
            canonical: canonical.into(),
        }
    }

    pub fn select(&self, asset: &Asset) -> ProtocolKind {
        match asset.kind {
            AssetKind::NonFungible | AssetKind::Native => ProtocolKind::Relay,
            AssetKind::Fungible if asset.symbol == self.canonical => ProtocolKind::BurnMint,
            AssetKind::Fungible => ProtocolKind::Relay,
        }
    }

    /// Honors `requested` only for assets that fall under the default rule.
    pub fn resolve(
        &self,
        asset: &Asset,
        requested: Option<ProtocolKind>,
    ) -> Result<ProtocolKind, SelectionError> {
        let default = self.select(asset);
        let overridable = asset.kind == AssetKind::Fungible && asset.symbol != self.canonical;
        match requested {
            None => Ok(default),
            Some(kind) if kind == default || overridable => Ok(kind),
            Some(_) => Err(SelectionError::OverrideNotAllowed {
                asset: asset.symbol.clone(),
                default: default.to_string(),
            }),
        }
    }
}

/// Everything a transfer needs from one side to the other.
#[derive(Debug, Clone, Copy)]
pub struct TransferRoute<'a> {
    pub source: &'a Network,
    pub destination: &'a Network,
    pub asset: &'a Asset,
    pub amount: TransferAmount,
    pub recipient: Address,
}

/// Source-side transactions, built before anything is signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub approval: Option<TxRequest>,
    pub send: TxRequest,
}

#[derive(Debug, Clone)]
pub struct ProtocolStrategy {
    kind: ProtocolKind,
    relay: RelayConfig,
}

impl ProtocolStrategy {
    pub fn new(kind: ProtocolKind, relay: &RelayConfig) -> Self {
        Self {
            kind,
            relay: relay.clone(),
        }
    }

    pub fn kind(&self) -> ProtocolKind {
        self.kind
    }

    /// Contract that pulls the asset on the source network.
    pub fn spender(&self, source: &Network) -> Option<Address> {
        match self.kind {
            ProtocolKind::BurnMint => source.contracts.token_messenger,
            ProtocolKind::Relay => source.contracts.relay_endpoint,
        }
    }

    /// Builds the approval and send transactions, and checks that the
    /// destination can finalize. Any missing contract or routing id is
    /// reported here rather than mid-transfer.
    pub fn plan(&self, route: &TransferRoute<'_>) -> Result<TransferPlan, String> {
        let TransferRoute {
            source,
            destination,
            asset,
            amount,
            recipient,
        } = *route;
        let on_source = asset
            .address_for(source)
            .ok_or_else(|| format!("{} has no address on {}", asset.symbol, source.id))?;
        if asset.address_for(destination).is_none() {
            return Err(format!("{} has no address on {}", asset.symbol, destination.id));
        }
        let spender = self
            .spender(source)
            .ok_or_else(|| format!("{} has no {} contract", source.id, self.kind))?;

        let send: TxRequest = match self.kind {
            ProtocolKind::BurnMint => {
                let token = on_source
                    .contract()
                    .ok_or_else(|| format!("{} cannot be burned", asset.symbol))?;
                let destination_domain = destination
                    .routing
                    .cctp_domain
                    .ok_or_else(|| format!("{} has no CCTP domain", destination.id))?;
                if destination.contracts.message_transmitter.is_none() {
                    return Err(format!("{} has no message transmitter", destination.id));
                }
                Burn {
                    messenger: spender,
                    token,
                    amount: amount.value(),
                    destination_domain,
                    recipient,
                }
                .into()
            }
            ProtocolKind::Relay => {
                let destination_eid = destination
                    .routing
                    .relay_eid
                    .ok_or_else(|| format!("{} has no relay endpoint id", destination.id))?;
                let fee = if asset.is_non_fungible() {
                    self.relay.nft_fee_wei
                } else {
                    self.relay.fee_wei
                };
                RelaySend {
                    endpoint: spender,
                    token: on_source.contract().unwrap_or(Address::ZERO),
                    amount_or_id: amount.value(),
                    destination_eid,
                    recipient,
                    fee,
                    native: matches!(on_source, AssetAddress::Native),
                }
                .into()
            }
        };

        Ok(TransferPlan {
            approval: self.approval(asset, on_source, spender, amount),
            send,
        })
    }

    fn approval(
        &self,
        asset: &Asset,
        on_source: AssetAddress,
        spender: Address,
        amount: TransferAmount,
    ) -> Option<TxRequest> {
        let token = on_source.contract()?;
        // the relay endpoint escrows collections by id
        if asset.is_non_fungible() && self.kind == ProtocolKind::Relay {
            return None;
        }
        Some(
            Approval {
                token,
                spender,
                amount: amount.value(),
                non_fungible: asset.is_non_fungible(),
            }
            .into(),
        )
    }

    pub fn proof_request(&self, source: &Network, send_tx: TxHash) -> ProofRequest {
        ProofRequest {
            protocol: self.kind,
            source_domain: source.routing.cctp_domain,
            source_eid: source.routing.relay_eid,
            send_tx,
        }
    }

    /// Destination transaction completing the transfer. `None` when delivery
    /// is settled by the relay itself.
    pub fn finalize(&self, destination: &Network, proof: &Proof) -> Result<Option<TxRequest>, String> {
        match self.kind {
            ProtocolKind::BurnMint => {
                let transmitter = destination
                    .contracts
                    .message_transmitter
                    .ok_or_else(|| format!("{} has no message transmitter", destination.id))?;
                Ok(Some(
                    Mint {
                        transmitter,
                        message: proof.message.clone(),
                        attestation: proof.attestation.clone(),
                    }
                    .into(),
                ))
            }
            ProtocolKind::Relay => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::builtin_assets;
    use crate::network::builtin_networks;
    use alloy::primitives::{hex, U256};
    use proptest::prelude::*;

    fn asset(symbol: &str) -> Asset {
        builtin_assets()
            .into_iter()
            .find(|a| a.symbol == symbol)
            .unwrap()
    }

    #[test]
    fn default_rule() {
        let selector = ProtocolSelector::new("USDC");
        assert_eq!(selector.select(&asset("USDC")), ProtocolKind::BurnMint);
        assert_eq!(selector.select(&asset("ETH")), ProtocolKind::Relay);
        assert_eq!(selector.select(&asset("AZR")), ProtocolKind::Relay);

        let mut dai = asset("USDC");
        dai.symbol = "DAI".into();
        assert_eq!(selector.select(&dai), ProtocolKind::Relay);
        assert_eq!(
            selector.resolve(&dai, Some(ProtocolKind::BurnMint)).unwrap(),
            ProtocolKind::BurnMint
        );
    }

    #[test]
    fn override_rejected_outside_default_rule() {
        let selector = ProtocolSelector::new("USDC");
        let err = selector
            .resolve(&asset("AZR"), Some(ProtocolKind::BurnMint))
            .unwrap_err();
        assert!(matches!(err, SelectionError::OverrideNotAllowed { ref asset, .. } if asset == "AZR"));
        assert!(selector.resolve(&asset("USDC"), Some(ProtocolKind::Relay)).is_err());
        assert_eq!(
            selector.resolve(&asset("USDC"), Some(ProtocolKind::BurnMint)).unwrap(),
            ProtocolKind::BurnMint
        );
    }

    #[test]
    fn protocol_names_parse() {
        assert_eq!("cctp".parse::<ProtocolKind>().unwrap(), ProtocolKind::BurnMint);
        assert_eq!("LayerZero".parse::<ProtocolKind>().unwrap(), ProtocolKind::Relay);
        assert!("wormhole".parse::<ProtocolKind>().is_err());
    }

    #[test]
    fn burn_plan_approves_messenger_then_burns() {
        let networks = builtin_networks();
        let usdc = asset("USDC");
        let strategy = ProtocolStrategy::new(ProtocolKind::BurnMint, &RelayConfig::default());
        let route = TransferRoute {
            source: &networks[0],
            destination: &networks[1],
            asset: &usdc,
            amount: TransferAmount::Units(U256::from(50_000_000u64)),
            recipient: Address::repeat_byte(0xaa),
        };

        let plan = strategy.plan(&route).unwrap();
        let approval = plan.approval.unwrap();
        assert_eq!(&approval.data[..4], hex!("095ea7b3"));
        assert_eq!(Some(plan.send.to), networks[0].contracts.token_messenger);
        assert!(plan.send.value.is_zero());
    }

    #[test]
    fn nft_relay_plan_skips_approval_and_pays_nft_fee() {
        let networks = builtin_networks();
        let azr = asset("AZR");
        let relay = RelayConfig::default();
        let strategy = ProtocolStrategy::new(ProtocolKind::Relay, &relay);
        let route = TransferRoute {
            source: &networks[0],
            destination: &networks[1],
            asset: &azr,
            amount: TransferAmount::TokenId(U256::from(7u64)),
            recipient: Address::repeat_byte(0xaa),
        };

        let plan = strategy.plan(&route).unwrap();
        assert!(plan.approval.is_none());
        assert_eq!(plan.send.value, relay.nft_fee_wei);
        assert_eq!(Some(plan.send.to), networks[0].contracts.relay_endpoint);
    }

    #[test]
    fn missing_routing_is_reported_before_signing() {
        let mut networks = builtin_networks();
        networks[1].routing.cctp_domain = None;
        let usdc = asset("USDC");
        let strategy = ProtocolStrategy::new(ProtocolKind::BurnMint, &RelayConfig::default());
        let route = TransferRoute {
            source: &networks[0],
            destination: &networks[1],
            asset: &usdc,
            amount: TransferAmount::Units(U256::from(1u64)),
            recipient: Address::ZERO,
        };
        assert!(strategy.plan(&route).unwrap_err().contains("CCTP domain"));
    }

    #[test]
    fn relay_finalize_is_implicit() {
        let networks = builtin_networks();
        let proof = Proof::default();
        let relay = ProtocolStrategy::new(ProtocolKind::Relay, &RelayConfig::default());
        assert_eq!(relay.finalize(&networks[1], &proof).unwrap(), None);
        let mint = ProtocolStrategy::new(ProtocolKind::BurnMint, &RelayConfig::default());
        let tx = mint.finalize(&networks[1], &proof).unwrap().unwrap();
        assert_eq!(Some(tx.to), networks[1].contracts.message_transmitter);
    }

    fn any_asset() -> impl Strategy<Value = Asset> {
        (
            prop_oneof![Just("USDC"), Just("DAI"), Just("ETH"), Just("AZR")],
            prop_oneof![
                Just(AssetKind::Native),
                Just(AssetKind::Fungible),
                Just(AssetKind::NonFungible)
            ],
            0u8..19,
        )
            .prop_map(|(symbol, kind, decimals)| Asset {
                symbol: symbol.into(),
                name: symbol.into(),
                decimals,
                kind,
                addresses: Default::default(),
            })
    }

    proptest! {
        #[test]
        fn selection_is_pure_and_follows_kind(asset in any_asset()) {
            let selector = ProtocolSelector::new("USDC");
            let first = selector.select(&asset);
            prop_assert_eq!(first, selector.select(&asset.clone()));
            if asset.kind != AssetKind::Fungible {
                prop_assert_eq!(first, ProtocolKind::Relay);
            }
            prop_assert_eq!(selector.resolve(&asset, None).unwrap(), first);
        }
    }
}
