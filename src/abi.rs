// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Typed event bindings for the two reward-emitting contracts: the
//! GenesisProtocol voting machine and the ContributionReward scheme.
//!
//! Both contracts emit an event named `RedeemReputation`; the pair of
//! (emitting contract, event name) is what disambiguates them, which is
//! why every decoder here is matched on topic0 *and* looked up per
//! source contract by the correlator.

use crate::error::{GovernanceError, GovernanceResult};
use crate::types::EthLog;
use ethers::abi::RawLog;
use ethers::contract::{EthEvent, EthLogDecode};
use ethers::types::{Address as EthAddress, H256, I256, U256};

// GenesisProtocol events

#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "NewProposal",
    abi = "NewProposal(bytes32,address,uint256,address,bytes32)"
)]
pub struct NewProposalFilter {
    #[ethevent(indexed)]
    pub proposal_id: H256,
    #[ethevent(indexed)]
    pub avatar: EthAddress,
    pub num_of_choices: U256,
    pub proposer: EthAddress,
    pub params_hash: H256,
}

#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "ExecuteProposal",
    abi = "ExecuteProposal(bytes32,address,uint256,uint256)"
)]
pub struct ExecuteProposalFilter {
    #[ethevent(indexed)]
    pub proposal_id: H256,
    #[ethevent(indexed)]
    pub avatar: EthAddress,
    pub decision: U256,
    pub total_reputation: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "GPExecuteProposal",
    abi = "GPExecuteProposal(bytes32,uint8)"
)]
pub struct GpExecuteProposalFilter {
    #[ethevent(indexed)]
    pub proposal_id: H256,
    pub execution_state: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "VoteProposal",
    abi = "VoteProposal(bytes32,address,address,uint256,uint256)"
)]
pub struct VoteProposalFilter {
    #[ethevent(indexed)]
    pub proposal_id: H256,
    #[ethevent(indexed)]
    pub avatar: EthAddress,
    #[ethevent(indexed)]
    pub voter: EthAddress,
    pub vote: U256,
    pub reputation: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "Stake",
    abi = "Stake(bytes32,address,address,uint256,uint256)"
)]
pub struct StakeFilter {
    #[ethevent(indexed)]
    pub proposal_id: H256,
    #[ethevent(indexed)]
    pub avatar: EthAddress,
    #[ethevent(indexed)]
    pub staker: EthAddress,
    pub vote: U256,
    pub amount: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(name = "Redeem", abi = "Redeem(bytes32,address,address,uint256)")]
pub struct RedeemFilter {
    #[ethevent(indexed)]
    pub proposal_id: H256,
    #[ethevent(indexed)]
    pub avatar: EthAddress,
    #[ethevent(indexed)]
    pub beneficiary: EthAddress,
    pub amount: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "RedeemReputation",
    abi = "RedeemReputation(bytes32,address,address,uint256)"
)]
pub struct RedeemReputationFilter {
    #[ethevent(indexed)]
    pub proposal_id: H256,
    #[ethevent(indexed)]
    pub avatar: EthAddress,
    #[ethevent(indexed)]
    pub beneficiary: EthAddress,
    pub amount: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "RedeemDaoBounty",
    abi = "RedeemDaoBounty(bytes32,address,address,uint256)"
)]
pub struct RedeemDaoBountyFilter {
    #[ethevent(indexed)]
    pub proposal_id: H256,
    #[ethevent(indexed)]
    pub avatar: EthAddress,
    #[ethevent(indexed)]
    pub beneficiary: EthAddress,
    pub amount: U256,
}

// ContributionReward events. Note the flipped (avatar, proposalId) order
// and the signed reputation amount.

#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "RedeemReputation",
    abi = "RedeemReputation(address,bytes32,address,int256)"
)]
pub struct CrRedeemReputationFilter {
    #[ethevent(indexed)]
    pub avatar: EthAddress,
    #[ethevent(indexed)]
    pub proposal_id: H256,
    #[ethevent(indexed)]
    pub beneficiary: EthAddress,
    pub amount: I256,
}

#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "RedeemEther",
    abi = "RedeemEther(address,bytes32,address,uint256)"
)]
pub struct RedeemEtherFilter {
    #[ethevent(indexed)]
    pub avatar: EthAddress,
    #[ethevent(indexed)]
    pub proposal_id: H256,
    #[ethevent(indexed)]
    pub beneficiary: EthAddress,
    pub amount: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "RedeemNativeToken",
    abi = "RedeemNativeToken(address,bytes32,address,uint256)"
)]
pub struct RedeemNativeTokenFilter {
    #[ethevent(indexed)]
    pub avatar: EthAddress,
    #[ethevent(indexed)]
    pub proposal_id: H256,
    #[ethevent(indexed)]
    pub beneficiary: EthAddress,
    pub amount: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "RedeemExternalToken",
    abi = "RedeemExternalToken(address,bytes32,address,uint256)"
)]
pub struct RedeemExternalTokenFilter {
    #[ethevent(indexed)]
    pub avatar: EthAddress,
    #[ethevent(indexed)]
    pub proposal_id: H256,
    #[ethevent(indexed)]
    pub beneficiary: EthAddress,
    pub amount: U256,
}

/// Any event this crate knows how to decode, tagged by source contract
/// family where the bare event name is ambiguous.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GovernanceEvent {
    NewProposal(NewProposalFilter),
    ExecuteProposal(ExecuteProposalFilter),
    GpExecuteProposal(GpExecuteProposalFilter),
    VoteProposal(VoteProposalFilter),
    Stake(StakeFilter),
    Redeem(RedeemFilter),
    RedeemReputation(RedeemReputationFilter),
    RedeemDaoBounty(RedeemDaoBountyFilter),
    CrRedeemReputation(CrRedeemReputationFilter),
    RedeemEther(RedeemEtherFilter),
    RedeemNativeToken(RedeemNativeTokenFilter),
    RedeemExternalToken(RedeemExternalTokenFilter),
}

impl GovernanceEvent {
    /// Try to decode a recognized event out of a raw log. Returns `None`
    /// if the log's topic0 matches no known event.
    pub fn try_from_eth_log(log: &EthLog) -> Option<GovernanceEvent> {
        let Some(topic0) = log.log.topics.first().copied() else {
            return None;
        };
        let raw = RawLog {
            topics: log.log.topics.clone(),
            data: log.log.data.to_vec(),
        };
        macro_rules! try_decode {
            ($filter:ty, $variant:ident) => {
                if topic0 == <$filter>::signature() {
                    return <$filter as EthEvent>::decode_log(&raw)
                        .ok()
                        .map(GovernanceEvent::$variant);
                }
            };
        }
        try_decode!(NewProposalFilter, NewProposal);
        try_decode!(ExecuteProposalFilter, ExecuteProposal);
        try_decode!(GpExecuteProposalFilter, GpExecuteProposal);
        try_decode!(VoteProposalFilter, VoteProposal);
        try_decode!(StakeFilter, Stake);
        try_decode!(RedeemFilter, Redeem);
        try_decode!(RedeemReputationFilter, RedeemReputation);
        try_decode!(RedeemDaoBountyFilter, RedeemDaoBounty);
        try_decode!(CrRedeemReputationFilter, CrRedeemReputation);
        try_decode!(RedeemEtherFilter, RedeemEther);
        try_decode!(RedeemNativeTokenFilter, RedeemNativeToken);
        try_decode!(RedeemExternalTokenFilter, RedeemExternalToken);
        None
    }
}

/// Decode the (proposal id, beneficiary, amount) triple shared by every
/// redemption-family event. The ContributionReward reputation amount is
/// signed on chain; negative values never reach redemption, so it is
/// clamped at zero here.
pub fn decode_redemption(
    topic0: H256,
    log: &EthLog,
) -> GovernanceResult<(H256, EthAddress, U256)> {
    let raw = RawLog {
        topics: log.log.topics.clone(),
        data: log.log.data.to_vec(),
    };
    macro_rules! redemption {
        ($filter:ty) => {
            if topic0 == <$filter>::signature() {
                let ev = <$filter as EthEvent>::decode_log(&raw)
                    .map_err(|e| GovernanceError::AbiDecodeError(e.to_string()))?;
                return Ok((ev.proposal_id, ev.beneficiary, ev.amount));
            }
        };
    }
    redemption!(RedeemFilter);
    redemption!(RedeemReputationFilter);
    redemption!(RedeemDaoBountyFilter);
    redemption!(RedeemEtherFilter);
    redemption!(RedeemNativeTokenFilter);
    redemption!(RedeemExternalTokenFilter);
    if topic0 == CrRedeemReputationFilter::signature() {
        let ev = <CrRedeemReputationFilter as EthEvent>::decode_log(&raw)
            .map_err(|e| GovernanceError::AbiDecodeError(e.to_string()))?;
        let amount = if ev.amount.is_negative() {
            U256::zero()
        } else {
            ev.amount.into_raw()
        };
        return Ok((ev.proposal_id, ev.beneficiary, amount));
    }
    Err(GovernanceError::AbiDecodeError(format!(
        "topic {:?} is not a redemption event",
        topic0
    )))
}
