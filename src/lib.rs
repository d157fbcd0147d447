//! Cross-chain bridge orchestration: moves assets between EVM networks over a
//! burn-and-mint protocol (CCTP) or a message relay (LayerZero).

pub mod annotate;
pub mod asset;
pub mod bindings;
pub mod calls;
pub mod config;
pub mod discovery;
pub mod error;
pub mod monitor;
pub mod network;
pub mod orchestrator;
pub mod proof;
pub mod registry;
pub mod rpc;
pub mod signer;
pub mod stage;
pub mod strategy;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
