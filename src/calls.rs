use alloy::{
    primitives::{Address, Bytes, U256},
    sol_types::SolCall,
};

use crate::bindings::{
    recipient_word, IMessageTransmitter, IRelayEndpoint, ITokenMessenger, IERC20, IERC721,
};
use crate::signer::TxRequest;

pub struct Approval {
    pub token: Address,
    pub spender: Address,
    pub amount: U256,
    pub non_fungible: bool,
}

impl From<Approval> for TxRequest {
    fn from(approval: Approval) -> Self {
        let data = if approval.non_fungible {
            IERC721::approveCall {
                to: approval.spender,
                tokenId: approval.amount,
            }
            .abi_encode()
        } else {
            IERC20::approveCall {
                spender: approval.spender,
                amount: approval.amount,
            }
            .abi_encode()
        };
        TxRequest {
            to: approval.token,
            data: data.into(),
            value: U256::ZERO,
        }
    }
}

pub struct Burn {
    pub messenger: Address,
    pub token: Address,
    pub amount: U256,
    pub destination_domain: u32,
    pub recipient: Address,
}

impl From<Burn> for TxRequest {
    fn from(burn: Burn) -> Self {
        let data = ITokenMessenger::depositForBurnCall {
            amount: burn.amount,
            destinationDomain: burn.destination_domain,
            mintRecipient: recipient_word(burn.recipient),
            burnToken: burn.token,
        }
        .abi_encode();
        TxRequest {
            to: burn.messenger,
            data: data.into(),
            value: U256::ZERO,
        }
    }
}

/// Relay send. `token` is zero for the native asset; `fee` rides on top of the value.
pub struct RelaySend {
    pub endpoint: Address,
    pub token: Address,
    pub amount_or_id: U256,
    pub destination_eid: u32,
    pub recipient: Address,
    pub fee: U256,
    pub native: bool,
}

impl From<RelaySend> for TxRequest {
    fn from(send: RelaySend) -> Self {
        let data = IRelayEndpoint::sendCall {
            dstEid: send.destination_eid,
            recipient: recipient_word(send.recipient),
            token: send.token,
            amountOrId: send.amount_or_id,
        }
        .abi_encode();
        let value = if send.native {
            send.amount_or_id.saturating_add(send.fee)
        } else {
            send.fee
        };
        TxRequest {
            to: send.endpoint,
            data: data.into(),
            value,
        }
    }
}

pub struct Mint {
    pub transmitter: Address,
    pub message: Bytes,
    pub attestation: Bytes,
}

impl From<Mint> for TxRequest {
    fn from(mint: Mint) -> Self {
        let data = IMessageTransmitter::receiveMessageCall {
            message: mint.message,
            attestation: mint.attestation,
        }
        .abi_encode();
        TxRequest {
            to: mint.transmitter,
            data: data.into(),
            value: U256::ZERO,
        }
    }
}

pub fn balance_of(owner: Address) -> Bytes {
    IERC20::balanceOfCall { owner }.abi_encode().into()
}

pub fn decode_balance(data: &[u8]) -> Result<U256, String> {
    IERC20::balanceOfCall::abi_decode_returns(data, true)
        .map(|ret| ret._0)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, hex};

    const OWNER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

    #[test]
    fn balance_of_uses_erc20_selector() {
        let data = balance_of(OWNER);
        assert_eq!(&data[..4], hex!("70a08231"));
        assert_eq!(data.len(), 36);
        assert_eq!(&data[16..], OWNER.as_slice());
    }

    #[test]
    fn approval_targets_token_with_erc20_selector() {
        let tx: TxRequest = Approval {
            token: Address::repeat_byte(0x11),
            spender: OWNER,
            amount: U256::from(50_000_000u64),
            non_fungible: false,
        }
        .into();
        assert_eq!(tx.to, Address::repeat_byte(0x11));
        assert_eq!(&tx.data[..4], hex!("095ea7b3"));
        assert_eq!(U256::from_be_slice(&tx.data[36..68]), U256::from(50_000_000u64));
        assert!(tx.value.is_zero());
    }

    #[test]
    fn native_relay_send_carries_amount_plus_fee() {
        let send = |native| -> TxRequest {
            RelaySend {
                endpoint: Address::repeat_byte(0x22),
                token: Address::ZERO,
                amount_or_id: U256::from(1_000u64),
                destination_eid: 30101,
                recipient: OWNER,
                fee: U256::from(5u64),
                native,
            }
            .into()
        };
        assert_eq!(send(true).value, U256::from(1_005u64));
        assert_eq!(send(false).value, U256::from(5u64));
    }

    #[test]
    fn balance_decodes_word() {
        let word = U256::from(42u64).to_be_bytes::<32>();
        assert_eq!(decode_balance(&word).unwrap(), U256::from(42u64));
        assert!(decode_balance(&[1, 2, 3]).is_err());
    }
}
