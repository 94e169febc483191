// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shared builders for unit tests: canned logs, eth_call mocks and
//! tracing setup.

use crate::abi::{
    CrRedeemReputationFilter, RedeemEtherFilter, RedeemExternalTokenFilter,
    RedeemNativeTokenFilter,
};
use crate::mock_provider::EthMockProvider;
use crate::types::EthLog;
use ethers::abi::Token;
use ethers::contract::EthEvent;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address as EthAddress, Bytes, Log, TransactionRequest, TxHash, H256, U256, U64,
};
use ethers::utils::keccak256;
use serde_json::json;

/// Amount carried by every log built with [`log_for_event`]
pub const REDEEM_AMOUNT: u64 = 42;

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

fn is_reward_scheme_topic(topic0: H256) -> bool {
    topic0 == CrRedeemReputationFilter::signature()
        || topic0 == RedeemEtherFilter::signature()
        || topic0 == RedeemNativeTokenFilter::signature()
        || topic0 == RedeemExternalTokenFilter::signature()
}

/// Build a decodable redemption-shaped log. The emitting contract
/// address doubles as the avatar topic. ContributionReward events carry
/// their indexed fields in (avatar, proposalId) order, the voting
/// machine in (proposalId, avatar) order.
pub fn log_for_event(
    topic0: H256,
    contract: EthAddress,
    proposal_id: H256,
    beneficiary: EthAddress,
    tx_hash: TxHash,
    block_number: u64,
) -> EthLog {
    let avatar = H256::from(contract);
    let topics = if is_reward_scheme_topic(topic0) {
        vec![topic0, avatar, proposal_id, H256::from(beneficiary)]
    } else {
        vec![topic0, proposal_id, avatar, H256::from(beneficiary)]
    };
    let amount = if topic0 == CrRedeemReputationFilter::signature() {
        Token::Int(U256::from(REDEEM_AMOUNT))
    } else {
        Token::Uint(U256::from(REDEEM_AMOUNT))
    };
    let log = Log {
        address: contract,
        topics,
        data: ethers::abi::encode(&[amount]).into(),
        block_number: Some(U64::from(block_number)),
        transaction_hash: Some(tx_hash),
        ..Default::default()
    };
    EthLog {
        block_number,
        tx_hash,
        log,
    }
}

/// Minimal decodable log with no data payload, for correlator tests
/// that never decode arguments
pub fn eth_log(contract: EthAddress, topic0: H256, tx_hash: TxHash, block_number: u64) -> EthLog {
    let log = Log {
        address: contract,
        topics: vec![topic0],
        data: Bytes::default(),
        block_number: Some(U64::from(block_number)),
        transaction_hash: Some(tx_hash),
        ..Default::default()
    };
    EthLog {
        block_number,
        tx_hash,
        log,
    }
}

/// Register a response for an `eth_call` against `to` with exact
/// calldata, returning the ABI encoding of `return_tokens`.
pub fn mock_eth_call(
    mock: &EthMockProvider,
    to: EthAddress,
    data: Bytes,
    return_tokens: &[Token],
) {
    let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
    let output: Bytes = ethers::abi::encode(return_tokens).into();
    mock.add_response_value("eth_call", json!([tx, "latest"]), json!(output))
        .unwrap();
}

/// Register a response for `eth_sendTransaction` of this exact request,
/// returning a hash derived from the request so distinct transactions
/// get distinct hashes.
pub fn mock_send_transaction(
    mock: &EthMockProvider,
    from: EthAddress,
    to: EthAddress,
    data: Bytes,
) -> TxHash {
    let mut seed = Vec::new();
    seed.extend_from_slice(from.as_bytes());
    seed.extend_from_slice(to.as_bytes());
    seed.extend_from_slice(&data);
    let tx_hash = TxHash::from(keccak256(&seed));

    let tx = TransactionRequest::new().from(from).to(to).data(data);
    mock.add_response::<_, TxHash, TxHash>("eth_sendTransaction", [tx], tx_hash)
        .unwrap();
    tx_hash
}
