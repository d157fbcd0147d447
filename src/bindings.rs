use alloy::{
    primitives::{Address, B256},
    sol,
};

sol! {
    #[allow(missing_docs)]
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function balanceOf(address owner) external view returns (uint256);
    }

    #[allow(missing_docs)]
    interface IERC721 {
        function approve(address to, uint256 tokenId) external;
    }

    #[allow(missing_docs)]
    interface ITokenMessenger {
        function depositForBurn(
            uint256 amount,
            uint32 destinationDomain,
            bytes32 mintRecipient,
            address burnToken
        ) external returns (uint64 nonce);
    }

    #[allow(missing_docs)]
    interface IMessageTransmitter {
        function receiveMessage(bytes message, bytes attestation) external returns (bool success);
    }

    #[allow(missing_docs)]
    interface IRelayEndpoint {
        function send(
            uint32 dstEid,
            bytes32 recipient,
            address token,
            uint256 amountOrId
        ) external payable returns (bytes32 guid);
    }
}

/// Left-pads an address into the bytes32 recipient form both protocols use.
pub fn recipient_word(address: Address) -> B256 {
    address.into_word()
}
