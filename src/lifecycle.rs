// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pure phase arithmetic for the voting machine.
//!
//! Everything here mirrors the authoritative on-chain rules so that
//! operations can be validated locally before a transaction is submitted
//! and so that callers can reason about deadlines without a node round
//! trip. Nothing in this module performs I/O.

use crate::error::{GovernanceError, GovernanceResult};
use crate::params::GovernanceParams;
use crate::types::{Proposal, ProposalState};
use ethers::types::{I256, U256};

/// Reject votes and stakes outside `[0, num_of_choices]`. Zero is the
/// abstain sentinel accepted by `voteStatus` queries.
pub fn validate_choice(vote: u32, num_choices: u32) -> GovernanceResult<()> {
    if vote > num_choices {
        return Err(GovernanceError::InvalidVoteChoice { vote, num_choices });
    }
    Ok(())
}

/// Reject lifecycle operations on proposals no longer accepting votes
pub fn ensure_votable(state: ProposalState) -> GovernanceResult<()> {
    if !state.is_votable() {
        return Err(GovernanceError::Generic(format!(
            "proposal is not votable in state {}",
            state
        )));
    }
    Ok(())
}

/// Redemption is only permitted once the proposal reached a terminal state
pub fn ensure_redeemable(state: ProposalState) -> GovernanceResult<()> {
    if !state.is_terminal() {
        return Err(GovernanceError::WrongStateForRedeem(state));
    }
    Ok(())
}

/// The moment (unix seconds) after which the current phase can be closed
/// by an `execute` call. For a pre-boosted proposal this is driven by the
/// submission time; once boosted, by the boosted-phase start and the
/// (quiet-ending-extensible) boosted period limit.
pub fn voting_deadline(proposal: &Proposal, params: &GovernanceParams) -> u64 {
    match proposal.state {
        ProposalState::Boosted | ProposalState::QuietEndingPeriod => proposal
            .boosted_phase_time
            .saturating_add(proposal.current_boosted_vote_period_limit),
        _ => proposal
            .submitted_time
            .saturating_add(params.pre_boosted_vote_period_limit),
    }
}

/// Whether `now` falls inside the quiet ending window of a boosted
/// proposal: the last `quiet_ending_period` seconds before the deadline.
pub fn in_quiet_ending_window(deadline: u64, now: u64, quiet_ending_period: u64) -> bool {
    now < deadline && deadline.saturating_sub(now) <= quiet_ending_period
}

/// Apply the quiet-ending rule to a vote that flips the winning choice.
///
/// Returns the new `currentBoostedVotePeriodLimit` when the flip happens
/// inside the quiet ending window, `None` otherwise. The window is a
/// moving one: every flip inside it restarts the full period from the
/// moment of the flip.
pub fn quiet_ending_extension(
    proposal: &Proposal,
    params: &GovernanceParams,
    now: u64,
    flips_winning_choice: bool,
) -> Option<u64> {
    if !flips_winning_choice {
        return None;
    }
    if !matches!(
        proposal.state,
        ProposalState::Boosted | ProposalState::QuietEndingPeriod
    ) {
        return None;
    }
    let deadline = proposal
        .boosted_phase_time
        .saturating_add(proposal.current_boosted_vote_period_limit);
    if !in_quiet_ending_window(deadline, now, params.quiet_ending_period) {
        return None;
    }
    // New deadline is quiet_ending_period past the flip; the stored value
    // is a period limit relative to boosted_phase_time.
    let new_deadline = now.saturating_add(params.quiet_ending_period);
    Some(new_deadline.saturating_sub(proposal.boosted_phase_time))
}

/// The score a proposal must exceed to be boosted:
/// `thresholdConstA * thresholdConstB ^ boostedProposalsCount`.
///
/// Saturates at `U256::MAX` instead of mirroring the contract's overflow
/// revert; the saturated value is only ever compared against, never
/// submitted.
pub fn boost_threshold(const_a: U256, const_b: u64, boosted_count: u64) -> U256 {
    let mut threshold = const_a;
    for _ in 0..boosted_count {
        threshold = match threshold.checked_mul(U256::from(const_b)) {
            Some(v) => v,
            None => return U256::MAX,
        };
    }
    threshold
}

/// A proposal's score: net stake behind YES
pub fn score(stakes_yes: U256, stakes_no: U256) -> I256 {
    I256::from_raw(stakes_yes).saturating_sub(I256::from_raw(stakes_no))
}

/// Whether the score clears the boost threshold
pub fn crosses_threshold(score: I256, threshold: U256) -> bool {
    !score.is_negative() && score.into_raw() > threshold
}

/// Immediate-execution shortcut: true when the reputation behind the
/// winning choice exceeds the required percentage of total DAO
/// reputation, in which case the proposal executes regardless of phase.
pub fn is_decisive(choice_reputation: U256, total_reputation: U256, required_percentage: u64) -> bool {
    if total_reputation.is_zero() {
        return false;
    }
    // choice / total > required / 100, kept in integer arithmetic
    choice_reputation.saturating_mul(U256::from(100u64))
        > total_reputation.saturating_mul(U256::from(required_percentage))
}

/// Whether an `execute` call would transition the proposal right now:
/// either the phase deadline has elapsed, or a decisive vote is in.
/// An explicit `execute` invocation is still required to observe the
/// transition; the contract never advances on its own.
pub fn is_executable(
    proposal: &Proposal,
    params: &GovernanceParams,
    now: u64,
    winning_choice_reputation: U256,
    total_reputation: U256,
) -> bool {
    if proposal.state.is_terminal() || proposal.state == ProposalState::None {
        return false;
    }
    if is_decisive(
        winning_choice_reputation,
        total_reputation,
        params.pre_boosted_vote_required_percentage,
    ) {
        return true;
    }
    now >= voting_deadline(proposal, params)
}
