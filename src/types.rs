// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{GovernanceError, GovernanceResult};
use ethers::abi::Token;
use ethers::types::{Address as EthAddress, Log, H256, U256};
pub use ethers::types::H256 as ProposalId;
pub use ethers::types::H256 as EthTransactionHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Vote choice for the binary voting machine
pub const VOTE_YES: u32 = 1;
/// Vote choice against
pub const VOTE_NO: u32 = 2;
/// Abstain sentinel; valid input to `voteStatus` but not a winning choice
pub const VOTE_NONE: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthLog {
    pub block_number: u64,
    pub tx_hash: H256,
    pub log: Log,
}

/// The state a proposal is in, as stored by the voting machine.
///
/// Transitions never regress; the quiet-ending rule only extends the
/// boosted-phase deadline, it does not move the state backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProposalState {
    None = 0,
    Closed = 1,
    Executed = 2,
    PreBoosted = 3,
    Boosted = 4,
    QuietEndingPeriod = 5,
}

impl ProposalState {
    /// States in which votes and stakes are accepted
    pub fn is_votable(&self) -> bool {
        matches!(
            self,
            ProposalState::PreBoosted | ProposalState::Boosted | ProposalState::QuietEndingPeriod
        )
    }

    /// Terminal states; the proposal struct is immutable from here on
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProposalState::Executed | ProposalState::Closed)
    }
}

impl TryFrom<u8> for ProposalState {
    type Error = GovernanceError;

    fn try_from(v: u8) -> GovernanceResult<Self> {
        match v {
            0 => Ok(ProposalState::None),
            1 => Ok(ProposalState::Closed),
            2 => Ok(ProposalState::Executed),
            3 => Ok(ProposalState::PreBoosted),
            4 => Ok(ProposalState::Boosted),
            5 => Ok(ProposalState::QuietEndingPeriod),
            other => Err(GovernanceError::AbiDecodeError(format!(
                "unknown proposal state {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ProposalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProposalState::None => "None",
            ProposalState::Closed => "Closed",
            ProposalState::Executed => "Executed",
            ProposalState::PreBoosted => "PreBoosted",
            ProposalState::Boosted => "Boosted",
            ProposalState::QuietEndingPeriod => "QuietEndingPeriod",
        };
        write!(f, "{}", s)
    }
}

/// How an executed proposal came to be executed, from the
/// `GPExecuteProposal` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExecutionState {
    None = 0,
    PreBoostedTimeOut = 1,
    PreBoostedBarCrossed = 2,
    BoostedTimeOut = 3,
    BoostedBarCrossed = 4,
}

impl TryFrom<u8> for ExecutionState {
    type Error = GovernanceError;

    fn try_from(v: u8) -> GovernanceResult<Self> {
        match v {
            0 => Ok(ExecutionState::None),
            1 => Ok(ExecutionState::PreBoostedTimeOut),
            2 => Ok(ExecutionState::PreBoostedBarCrossed),
            3 => Ok(ExecutionState::BoostedTimeOut),
            4 => Ok(ExecutionState::BoostedBarCrossed),
            other => Err(GovernanceError::AbiDecodeError(format!(
                "unknown execution state {}",
                other
            ))),
        }
    }
}

/// A proposal as stored by the voting machine, decoded from the
/// `proposals(bytes32)` tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub proposal_id: ProposalId,
    /// The organization this proposal belongs to
    pub avatar: EthAddress,
    pub num_of_choices: u32,
    pub executable: EthAddress,
    pub voters_stakes: U256,
    /// Unix seconds
    pub submitted_time: u64,
    /// Unix seconds; 0 until the proposal is boosted
    pub boosted_phase_time: u64,
    pub state: ProposalState,
    pub winning_vote: u32,
    pub proposer: EthAddress,
    /// Seconds; grows under the quiet-ending rule
    pub current_boosted_vote_period_limit: u64,
    pub params_hash: H256,
    pub dao_bounty_remain: U256,
}

impl Proposal {
    /// Decode the tuple returned by `proposals(bytes32)`. The field order
    /// is fixed by the contract storage layout.
    pub fn from_tokens(proposal_id: ProposalId, tokens: Vec<Token>) -> GovernanceResult<Self> {
        if tokens.len() != 12 {
            return Err(GovernanceError::AbiDecodeError(format!(
                "proposals() returned {} values, expected 12",
                tokens.len()
            )));
        }
        let mut it = tokens.into_iter();
        let avatar = take_address(it.next(), "avatar")?;
        let num_of_choices = take_uint(it.next(), "numOfChoices")?.as_u32();
        let executable = take_address(it.next(), "executable")?;
        let voters_stakes = take_uint(it.next(), "votersStakes")?;
        let submitted_time = take_uint(it.next(), "submittedTime")?.as_u64();
        let boosted_phase_time = take_uint(it.next(), "boostedPhaseTime")?.as_u64();
        let state = ProposalState::try_from(take_uint(it.next(), "state")?.as_u64() as u8)?;
        let winning_vote = take_uint(it.next(), "winningVote")?.as_u32();
        let proposer = take_address(it.next(), "proposer")?;
        let current_boosted_vote_period_limit =
            take_uint(it.next(), "currentBoostedVotePeriodLimit")?.as_u64();
        let params_hash = take_fixed_bytes32(it.next(), "paramsHash")?;
        let dao_bounty_remain = take_uint(it.next(), "daoBountyRemain")?;

        Ok(Proposal {
            proposal_id,
            avatar,
            num_of_choices,
            executable,
            voters_stakes,
            submitted_time,
            boosted_phase_time,
            state,
            winning_vote,
            proposer,
            current_boosted_vote_period_limit,
            params_hash,
            dao_bounty_remain,
        })
    }
}

/// A proposal that reached a terminal decision, enriched with the
/// `ExecuteProposal` event payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedProposal {
    pub proposal: Proposal,
    /// The winning choice at execution time
    pub decision: u32,
    /// Total DAO reputation when the proposal was created
    pub total_reputation: U256,
    pub execution_state: ExecutionState,
}

/// Vote committed by one voter on one proposal. A repeat vote by the same
/// voter overwrites this record; last vote wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoterInfo {
    pub vote: u32,
    pub reputation: U256,
}

/// Stake committed by one staker on one proposal. The option is fixed by
/// the first stake; repeated stakes accumulate into `stake`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakerInfo {
    pub vote: u32,
    pub stake: U256,
}

/// Per-proposal vote and stake tallies, from `proposalStatus(bytes32)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProposalStatus {
    pub pre_boosted_votes_yes: U256,
    pub pre_boosted_votes_no: U256,
    /// Staking tokens currently redeemable by stakers
    pub total_staker_stakes: U256,
    /// Staking tokens currently redeemable by everyone
    pub total_staked: U256,
    pub stakes_yes: U256,
    pub stakes_no: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreThresholdParams {
    pub threshold_const_a: U256,
    pub threshold_const_b: u64,
}

pub(crate) fn take_address(t: Option<Token>, field: &str) -> GovernanceResult<EthAddress> {
    match t {
        Some(Token::Address(a)) => Ok(a),
        other => Err(GovernanceError::AbiDecodeError(format!(
            "expected address for {}, got {:?}",
            field, other
        ))),
    }
}

pub(crate) fn take_uint(t: Option<Token>, field: &str) -> GovernanceResult<U256> {
    match t {
        Some(Token::Uint(v)) => Ok(v),
        other => Err(GovernanceError::AbiDecodeError(format!(
            "expected uint for {}, got {:?}",
            field, other
        ))),
    }
}

pub(crate) fn take_bool(t: Option<Token>, field: &str) -> GovernanceResult<bool> {
    match t {
        Some(Token::Bool(b)) => Ok(b),
        other => Err(GovernanceError::AbiDecodeError(format!(
            "expected bool for {}, got {:?}",
            field, other
        ))),
    }
}

pub(crate) fn take_fixed_bytes32(t: Option<Token>, field: &str) -> GovernanceResult<H256> {
    match t {
        Some(Token::FixedBytes(b)) if b.len() == 32 => Ok(H256::from_slice(&b)),
        other => Err(GovernanceError::AbiDecodeError(format!(
            "expected bytes32 for {}, got {:?}",
            field, other
        ))),
    }
}
