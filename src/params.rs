// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The fourteen governance parameters of the voting machine.
//!
//! A parameter set is registered on chain under the keccak hash of its
//! ordered tuple; `GovernanceParams::hash` reproduces that hash locally so
//! a configuration can be verified by exact match without a network call.

use crate::error::{GovernanceError, GovernanceResult};
use ethers::abi::Token;
use ethers::types::{H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

/// Upper bound on wei-denominated parameters, 10^26
fn max_eth_value() -> U256 {
    U256::exp10(26)
}

fn wei(eth: u64) -> U256 {
    U256::from(eth) * U256::exp10(18)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GovernanceParams {
    /// Percent of total DAO reputation behind one choice that triggers
    /// immediate execution, in (0, 100]
    pub pre_boosted_vote_required_percentage: u64,
    /// Seconds a proposal may stay pre-boosted before it closes
    pub pre_boosted_vote_period_limit: u64,
    /// Seconds of the boosted phase, inclusive of the quiet ending period
    pub boosted_vote_period_limit: u64,
    /// Threshold constant A, in wei
    pub threshold_const_a: U256,
    /// Threshold constant B, in (0, 100000000]
    pub threshold_const_b: u64,
    /// Floor on the staking fee, in wei
    pub minimum_staking_fee: U256,
    /// Seconds of the anti-sniping window at the end of the boosted phase
    pub quiet_ending_period: u64,
    /// Proposer reputation reward constant A, in [0, 100000000]
    pub proposing_rep_reward_const_a: u64,
    /// Proposer reputation reward constant B, in [0, 100000000]
    pub proposing_rep_reward_const_b: u64,
    /// Percent of stakes shared with voters, in [0, 100]
    pub staker_fee_ratio_for_voters: u64,
    /// Percent of reputation deducted from losing pre-boosted voters, in [0, 100]
    pub voters_reputation_loss_ratio: u64,
    /// Percent of lost reputation rewarded to winning voters, in [0, 100]
    pub voters_gain_rep_ratio_from_lost_rep: u64,
    /// Bounty multiple, strictly between stakerFeeRatioForVoters and twice it
    pub dao_bounty_const: u64,
    /// Upper bound on the total bounty on one proposal, in wei
    pub dao_bounty_limit: U256,
}

impl Default for GovernanceParams {
    fn default() -> Self {
        Self {
            pre_boosted_vote_required_percentage: 50,
            pre_boosted_vote_period_limit: 1_814_400,
            boosted_vote_period_limit: 259_200,
            threshold_const_a: wei(7),
            threshold_const_b: 3,
            minimum_staking_fee: U256::zero(),
            quiet_ending_period: 86_400,
            proposing_rep_reward_const_a: 5,
            proposing_rep_reward_const_b: 5,
            staker_fee_ratio_for_voters: 50,
            voters_reputation_loss_ratio: 1,
            voters_gain_rep_ratio_from_lost_rep: 80,
            dao_bounty_const: 75,
            dao_bounty_limit: wei(100),
        }
    }
}

impl GovernanceParams {
    /// Validate every field against the contract's accepted bounds.
    /// All-or-nothing: the first violated rule is reported and nothing is
    /// submitted.
    pub fn validate(&self) -> GovernanceResult<()> {
        if self.minimum_staking_fee > max_eth_value() {
            return Err(invalid(
                "minimumStakingFee",
                format!("must be less than {}", max_eth_value()),
            ));
        }
        if self.proposing_rep_reward_const_a > 100_000_000 {
            return Err(invalid(
                "proposingRepRewardConstA",
                "must be greater than or equal to 0 and less than or equal to 100000000",
            ));
        }
        if self.proposing_rep_reward_const_b > 100_000_000 {
            return Err(invalid(
                "proposingRepRewardConstB",
                "must be greater than or equal to 0 and less than or equal to 100000000",
            ));
        }
        if self.threshold_const_a > max_eth_value() {
            return Err(invalid(
                "thresholdConstA",
                format!("must be less than {}", max_eth_value()),
            ));
        }
        if self.threshold_const_b == 0 || self.threshold_const_b > 100_000_000 {
            return Err(invalid(
                "thresholdConstB",
                "must be greater than 0 and less than or equal to 100000000",
            ));
        }
        if self.pre_boosted_vote_required_percentage == 0
            || self.pre_boosted_vote_required_percentage > 100
        {
            return Err(invalid(
                "preBoostedVoteRequiredPercentage",
                "must be greater than 0 and less than or equal to 100",
            ));
        }
        if self.staker_fee_ratio_for_voters > 100 {
            return Err(invalid(
                "stakerFeeRatioForVoters",
                "must be greater than or equal to 0 and less than or equal to 100",
            ));
        }
        if self.voters_gain_rep_ratio_from_lost_rep > 100 {
            return Err(invalid(
                "votersGainRepRatioFromLostRep",
                "must be greater than or equal to 0 and less than or equal to 100",
            ));
        }
        if self.voters_reputation_loss_ratio > 100 {
            return Err(invalid(
                "votersReputationLossRatio",
                "must be greater than or equal to 0 and less than or equal to 100",
            ));
        }
        if self.dao_bounty_const <= self.staker_fee_ratio_for_voters
            || self.dao_bounty_const >= self.staker_fee_ratio_for_voters * 2
        {
            return Err(invalid(
                "daoBountyConst",
                "must be greater than stakerFeeRatioForVoters and less than 2*stakerFeeRatioForVoters",
            ));
        }
        Ok(())
    }

    /// The ordered tuple the contract hashes and stores. Order is part of
    /// the contract interface and must not change.
    pub fn to_tuple(&self) -> [U256; 14] {
        [
            U256::from(self.pre_boosted_vote_required_percentage),
            U256::from(self.pre_boosted_vote_period_limit),
            U256::from(self.boosted_vote_period_limit),
            self.threshold_const_a,
            U256::from(self.threshold_const_b),
            self.minimum_staking_fee,
            U256::from(self.quiet_ending_period),
            U256::from(self.proposing_rep_reward_const_a),
            U256::from(self.proposing_rep_reward_const_b),
            U256::from(self.staker_fee_ratio_for_voters),
            U256::from(self.voters_reputation_loss_ratio),
            U256::from(self.voters_gain_rep_ratio_from_lost_rep),
            U256::from(self.dao_bounty_const),
            self.dao_bounty_limit,
        ]
    }

    /// Deterministic parameter hash: keccak256 over the ABI encoding of
    /// the ordered tuple. Matches the hash under which `setParameters`
    /// registers this configuration.
    pub fn hash(&self) -> H256 {
        let tokens: Vec<Token> = self.to_tuple().iter().map(|v| Token::Uint(*v)).collect();
        let encoded = ethers::abi::encode(&[Token::FixedArray(tokens)]);
        H256::from(keccak256(encoded))
    }

    /// Decode the tuple returned by `parameters(bytes32)`
    pub fn from_tokens(tokens: Vec<Token>) -> GovernanceResult<Self> {
        if tokens.len() != 14 {
            return Err(GovernanceError::AbiDecodeError(format!(
                "parameters() returned {} values, expected 14",
                tokens.len()
            )));
        }
        let mut values = Vec::with_capacity(14);
        for (i, t) in tokens.into_iter().enumerate() {
            match t {
                Token::Uint(v) => values.push(v),
                other => {
                    return Err(GovernanceError::AbiDecodeError(format!(
                        "expected uint at parameter index {}, got {:?}",
                        i, other
                    )))
                }
            }
        }
        Ok(Self {
            pre_boosted_vote_required_percentage: values[0].as_u64(),
            pre_boosted_vote_period_limit: values[1].as_u64(),
            boosted_vote_period_limit: values[2].as_u64(),
            threshold_const_a: values[3],
            threshold_const_b: values[4].as_u64(),
            minimum_staking_fee: values[5],
            quiet_ending_period: values[6].as_u64(),
            proposing_rep_reward_const_a: values[7].as_u64(),
            proposing_rep_reward_const_b: values[8].as_u64(),
            staker_fee_ratio_for_voters: values[9].as_u64(),
            voters_reputation_loss_ratio: values[10].as_u64(),
            voters_gain_rep_ratio_from_lost_rep: values[11].as_u64(),
            dao_bounty_const: values[12].as_u64(),
            dao_bounty_limit: values[13],
        })
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> GovernanceError {
    GovernanceError::InvalidParameter {
        field,
        reason: reason.into(),
    }
}
