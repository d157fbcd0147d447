use std::fmt;

use alloy::primitives::TxHash;
use serde::{Deserialize, Serialize};

use crate::asset::TransferAmount;
use crate::error::FailureKind;
use crate::network::NetworkId;
use crate::proof::Proof;
use crate::strategy::ProtocolKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SendKind {
    Burn,
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProofKind {
    Attestation,
    RelayDelivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FinalizeKind {
    Mint,
    Settle,
}

/// Where a transfer attempt stands. Stages only move forward in declaration
/// order; `Failed` can be entered from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "stage", content = "kind")]
pub enum Stage {
    Idle,
    CheckingNetwork,
    Approving,
    Sending(SendKind),
    AwaitingProof(ProofKind),
    Finalizing(FinalizeKind),
    Completed,
    Failed,
}

impl Stage {
    /// Position in the forward order. `Failed` sits outside it.
    pub fn rank(self) -> Option<u8> {
        Some(match self {
            Self::Idle => 0,
            Self::CheckingNetwork => 1,
            Self::Approving => 2,
            Self::Sending(_) => 3,
            Self::AwaitingProof(_) => 4,
            Self::Finalizing(_) => 5,
            Self::Completed => 6,
            Self::Failed => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_advance_to(self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(from), Some(to)) => to > from,
            (None, Some(_)) => false,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::CheckingNetwork => "Validating Connection",
            Self::Approving => "Granting Permission",
            Self::Sending(SendKind::Burn) => "Igniting Burn",
            Self::Sending(SendKind::Message) => "Transmitting Data",
            Self::AwaitingProof(ProofKind::Attestation) => "Awaiting Circle Proof",
            Self::AwaitingProof(ProofKind::RelayDelivery) => "Relaying Asset",
            Self::Finalizing(FinalizeKind::Mint) => "Synthesizing Asset",
            Self::Finalizing(FinalizeKind::Settle) => "Finalizing Hub",
            Self::Completed => "Migration Complete",
            Self::Failed => "System Error",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Transaction hashes and proof gathered so far. Survives failure so a retry
/// can pick up where the attempt stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifacts {
    pub approval_tx: Option<TxHash>,
    pub send_tx: Option<TxHash>,
    pub proof: Option<Proof>,
    pub finalize_tx: Option<TxHash>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    /// Stage that was running when the failure happened.
    pub stage: Stage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferAttempt {
    pub id: u64,
    pub source: NetworkId,
    pub destination: NetworkId,
    pub asset: String,
    pub amount: TransferAmount,
    pub protocol: ProtocolKind,
    pub stage: Stage,
    pub history: Vec<Stage>,
    pub artifacts: Artifacts,
    pub summary: Option<String>,
    pub failure: Option<Failure>,
    /// Parked in `CheckingNetwork` until the signer is on the source chain.
    pub awaiting_network_switch: bool,
}

impl TransferAttempt {
    pub fn new(
        id: u64,
        source: NetworkId,
        destination: NetworkId,
        asset: String,
        amount: TransferAmount,
        protocol: ProtocolKind,
    ) -> Self {
        Self {
            id,
            source,
            destination,
            asset,
            amount,
            protocol,
            stage: Stage::Idle,
            history: vec![Stage::Idle],
            artifacts: Artifacts::default(),
            summary: None,
            failure: None,
            awaiting_network_switch: false,
        }
    }

    /// Moves to `next` when it lies ahead of the current stage. Returns false
    /// and leaves the attempt untouched otherwise.
    pub fn advance(&mut self, next: Stage) -> bool {
        if !self.stage.can_advance_to(next) {
            return false;
        }
        self.stage = next;
        self.history.push(next);
        true
    }

    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) -> bool {
        let stage = self.stage;
        if !self.advance(Stage::Failed) {
            return false;
        }
        self.failure = Some(Failure {
            kind,
            message: message.into(),
            stage,
        });
        true
    }
}

/// What observers see: the active attempt, if any, and the last one dropped
/// by a reset while still in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSnapshot {
    pub attempt: Option<TransferAttempt>,
    pub last_abandoned: Option<TransferAttempt>,
}

impl TransferSnapshot {
    pub fn stage(&self) -> Stage {
        self.attempt.as_ref().map_or(Stage::Idle, |a| a.stage)
    }

    pub fn status_text(&self) -> &'static str {
        self.stage().label()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use proptest::prelude::*;

    fn attempt() -> TransferAttempt {
        TransferAttempt::new(
            1,
            "sepolia".parse().unwrap(),
            "mainnet".parse().unwrap(),
            "USDC".into(),
            TransferAmount::Units(U256::from(1u64)),
            ProtocolKind::BurnMint,
        )
    }

    #[test]
    fn labels() {
        assert_eq!(Stage::Sending(SendKind::Burn).to_string(), "Igniting Burn");
        assert_eq!(
            Stage::AwaitingProof(ProofKind::RelayDelivery).label(),
            "Relaying Asset"
        );
        assert_eq!(TransferSnapshot::default().status_text(), "Idle");
    }

    #[test]
    fn failure_records_stage_and_is_terminal() {
        let mut attempt = attempt();
        assert!(attempt.advance(Stage::CheckingNetwork));
        assert!(attempt.advance(Stage::Approving));
        assert!(attempt.fail(FailureKind::UserRejected, "declined"));
        assert_eq!(attempt.failure.as_ref().unwrap().stage, Stage::Approving);
        assert!(!attempt.advance(Stage::Completed));
        assert!(!attempt.fail(FailureKind::Signer, "again"));
        assert_eq!(attempt.history.last(), Some(&Stage::Failed));
    }

    #[test]
    fn serializes_with_stage_tag() {
        let json = serde_json::to_value(Stage::Sending(SendKind::Message)).unwrap();
        assert_eq!(json, serde_json::json!({"stage": "Sending", "kind": "Message"}));
    }

    fn any_stage() -> impl Strategy<Value = Stage> {
        prop_oneof![
            Just(Stage::Idle),
            Just(Stage::CheckingNetwork),
            Just(Stage::Approving),
            Just(Stage::Sending(SendKind::Burn)),
            Just(Stage::Sending(SendKind::Message)),
            Just(Stage::AwaitingProof(ProofKind::Attestation)),
            Just(Stage::AwaitingProof(ProofKind::RelayDelivery)),
            Just(Stage::Finalizing(FinalizeKind::Mint)),
            Just(Stage::Finalizing(FinalizeKind::Settle)),
            Just(Stage::Completed),
            Just(Stage::Failed),
        ]
    }

    proptest! {
        #[test]
        fn history_is_monotonic_whatever_is_requested(
            requests in proptest::collection::vec(any_stage(), 0..30)
        ) {
            let mut attempt = attempt();
            for next in requests {
                attempt.advance(next);
            }
            let ranks: Vec<_> = attempt.history.iter().filter_map(|s| s.rank()).collect();
            prop_assert!(ranks.windows(2).all(|w| w[0] < w[1]));
            let failed = attempt.history.iter().position(|s| *s == Stage::Failed);
            if let Some(idx) = failed {
                prop_assert_eq!(idx, attempt.history.len() - 1);
            }
        }
    }
}
