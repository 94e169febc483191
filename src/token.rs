// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Minimal staking-token surface: just enough ERC-20/ERC-827 to move
//! stakes into the voting machine.

use std::sync::Arc;

use crate::error::GovernanceResult;
use crate::eth_client::{encode_call, EthClient};
use crate::types::take_uint;
use ethers::abi::{ParamType, Token};
use ethers::providers::JsonRpcClient;
use ethers::types::{Address as EthAddress, Bytes, U256};

/// Calldata for `approve(spender, amount)`
pub fn approve_calldata(spender: EthAddress, amount: U256) -> Bytes {
    encode_call(
        "approve(address,uint256)",
        &[Token::Address(spender), Token::Uint(amount)],
    )
}

/// Calldata for the ERC-827 `approveAndCall(spender, value, data)`:
/// approves the transfer and hands `data` to the spender in the same
/// transaction.
pub fn approve_and_call_calldata(spender: EthAddress, value: U256, data: Bytes) -> Bytes {
    encode_call(
        "approveAndCall(address,uint256,bytes)",
        &[
            Token::Address(spender),
            Token::Uint(value),
            Token::Bytes(data.to_vec()),
        ],
    )
}

/// Read-only client for the voting machine's staking token
#[derive(Debug, Clone)]
pub struct StakingTokenClient<P> {
    client: Arc<EthClient<P>>,
    pub address: EthAddress,
}

impl<P> StakingTokenClient<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(client: Arc<EthClient<P>>, address: EthAddress) -> Self {
        Self { client, address }
    }

    pub async fn balance_of(&self, owner: EthAddress) -> GovernanceResult<U256> {
        let tokens = self
            .client
            .call_decoded(
                self.address,
                "balanceOf(address)",
                &[Token::Address(owner)],
                &[ParamType::Uint(256)],
            )
            .await?;
        take_uint(tokens.into_iter().next(), "balance")
    }

    pub async fn allowance(
        &self,
        owner: EthAddress,
        spender: EthAddress,
    ) -> GovernanceResult<U256> {
        let tokens = self
            .client
            .call_decoded(
                self.address,
                "allowance(address,address)",
                &[Token::Address(owner), Token::Address(spender)],
                &[ParamType::Uint(256)],
            )
            .await?;
        take_uint(tokens.into_iter().next(), "allowance")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approve_calldata_layout() {
        let data = approve_calldata(EthAddress::repeat_byte(1), U256::from(10u64));
        // selector + 2 words
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(
            &data[..4],
            ethers::utils::id("approve(address,uint256)").as_slice()
        );
    }

    #[test]
    fn test_approve_and_call_embeds_inner_calldata() {
        let inner: Bytes = vec![0xde, 0xad, 0xbe, 0xef].into();
        let data = approve_and_call_calldata(
            EthAddress::repeat_byte(2),
            U256::from(5u64),
            inner.clone(),
        );
        assert_eq!(
            &data[..4],
            ethers::utils::id("approveAndCall(address,uint256,bytes)").as_slice()
        );
        // The dynamic bytes payload appears verbatim in the encoding
        let hay = data.to_vec();
        let needle = inner.to_vec();
        assert!(hay
            .windows(needle.len())
            .any(|window| window == needle.as_slice()));
    }
}
