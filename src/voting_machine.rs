// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Client bindings for the GenesisProtocol voting machine.
//!
//! Every state-mutating operation validates its inputs locally first
//! (guaranteeing no wasted gas on calls the contract would revert),
//! announces itself on the transaction tracker, submits, and resolves
//! each constituent transaction to a mined or failed notification.

use std::sync::Arc;

use crate::abi::{GpExecuteProposalFilter, NewProposalFilter};
use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, GovernanceResult};
use crate::eth_client::{encode_call, EthClient};
use crate::lifecycle;
use crate::metrics::GovernanceMetrics;
use crate::params::GovernanceParams;
use crate::registry::{ContractRegistry, GENESIS_PROTOCOL};
use crate::token::{self, StakingTokenClient};
use crate::tracker::{TrackingPayload, TransactionTracker};
use crate::types::{
    take_address, take_bool, take_uint, ExecutionState, Proposal, ProposalId, ProposalState,
    ProposalStatus, ScoreThresholdParams, StakerInfo, VoterInfo,
};
use async_trait::async_trait;
use ethers::abi::{ParamType, Token};
use ethers::contract::{EthEvent, EthLogDecode};
use ethers::providers::JsonRpcClient;
use ethers::types::{
    Address as EthAddress, Bytes, TransactionReceipt, TransactionRequest, TxHash, H256, I256, U256,
};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::debug;

/// Handle to a submitted transaction: the raw hash plus a `wait_mined`
/// accessor resolving to the receipt (or the failure).
#[derive(Debug)]
pub struct TxHandle {
    pub tx_hash: TxHash,
    pub payload: TrackingPayload,
    receipt_rx: oneshot::Receiver<GovernanceResult<TransactionReceipt>>,
}

impl TxHandle {
    pub async fn wait_mined(self) -> GovernanceResult<TransactionReceipt> {
        match self.receipt_rx.await {
            Ok(result) => result,
            Err(_) => Err(GovernanceError::Generic(
                "receipt watcher dropped before resolving".to_string(),
            )),
        }
    }
}

/// Result of a `propose` call; the proposal id is assigned on chain and
/// read back out of the mined receipt's `NewProposal` event.
#[derive(Debug)]
pub struct ProposalHandle {
    handle: TxHandle,
}

impl ProposalHandle {
    pub fn tx_hash(&self) -> TxHash {
        self.handle.tx_hash
    }

    pub async fn wait_proposal_id(self) -> GovernanceResult<ProposalId> {
        let receipt = self.handle.wait_mined().await?;
        proposal_id_from_receipt(&receipt)
    }
}

/// Extract the proposal id assigned by a mined `propose` transaction
pub fn proposal_id_from_receipt(receipt: &TransactionReceipt) -> GovernanceResult<ProposalId> {
    let signature = NewProposalFilter::signature();
    receipt
        .logs
        .iter()
        .find(|log| log.topics.first() == Some(&signature))
        .and_then(|log| log.topics.get(1).copied())
        .ok_or(GovernanceError::MissingEventInReceipt("NewProposal"))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeOptions {
    pub avatar: EthAddress,
    pub num_of_choices: u32,
    pub executable: EthAddress,
    pub params_hash: H256,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOptions {
    pub proposal_id: ProposalId,
    pub vote: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteWithSpecifiedAmountsOptions {
    pub proposal_id: ProposalId,
    pub vote: u32,
    pub reputation: U256,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeOptions {
    pub proposal_id: ProposalId,
    pub vote: u32,
    /// Token amount, in wei
    pub amount: U256,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemOptions {
    pub proposal_id: ProposalId,
    pub beneficiary_address: EthAddress,
}

/// The operations any voting-machine variant offers
#[async_trait]
pub trait VotingMachine {
    async fn propose(&self, options: ProposeOptions) -> GovernanceResult<ProposalHandle>;
    async fn vote(&self, options: VoteOptions) -> GovernanceResult<TxHandle>;
    async fn vote_with_specified_amounts(
        &self,
        options: VoteWithSpecifiedAmountsOptions,
    ) -> GovernanceResult<TxHandle>;
    async fn stake(&self, options: StakeOptions) -> GovernanceResult<TxHandle>;
    async fn execute(&self, proposal_id: ProposalId) -> GovernanceResult<TxHandle>;
    async fn get_state(&self, proposal_id: ProposalId) -> GovernanceResult<ProposalState>;
    async fn get_number_of_choices(&self, proposal_id: ProposalId) -> GovernanceResult<u32>;
    async fn get_winning_vote(&self, proposal_id: ProposalId) -> GovernanceResult<u32>;
    fn allowed_range_of_choices(&self) -> (u32, u32);
}

/// Reward redemption, offered by machines whose proposals pay out
#[async_trait]
pub trait Redeemable {
    async fn redeem(&self, options: RedeemOptions) -> GovernanceResult<TxHandle>;
    async fn redeem_dao_bounty(&self, options: RedeemOptions) -> GovernanceResult<TxHandle>;
}

/// GenesisProtocol accepts binary proposals only
pub const MIN_CHOICES: u32 = 2;
pub const MAX_CHOICES: u32 = 2;

pub struct GenesisProtocolClient<P> {
    client: Arc<EthClient<P>>,
    tracker: Arc<TransactionTracker>,
    config: GovernanceConfig,
    /// Deployed voting machine address
    pub address: EthAddress,
    /// The transacting account
    account: EthAddress,
    metrics: Option<Arc<GovernanceMetrics>>,
}

impl<P> GenesisProtocolClient<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(
        client: Arc<EthClient<P>>,
        tracker: Arc<TransactionTracker>,
        address: EthAddress,
        account: EthAddress,
        config: GovernanceConfig,
    ) -> Self {
        Self {
            client,
            tracker,
            config,
            address,
            account,
            metrics: None,
        }
    }

    pub fn from_registry(
        client: Arc<EthClient<P>>,
        tracker: Arc<TransactionTracker>,
        registry: &ContractRegistry,
        account: EthAddress,
        config: GovernanceConfig,
    ) -> GovernanceResult<Self> {
        let address = registry.require(GENESIS_PROTOCOL)?;
        Ok(Self::new(client, tracker, address, account, config))
    }

    /// Attach metrics for monitoring
    pub fn with_metrics(mut self, metrics: Arc<GovernanceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn eth_client(&self) -> &Arc<EthClient<P>> {
        &self.client
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    // ---- mutating operations ----

    pub async fn propose(&self, options: ProposeOptions) -> GovernanceResult<ProposalHandle> {
        if options.avatar.is_zero() {
            return Err(GovernanceError::MissingField("avatar"));
        }
        if options.num_of_choices < MIN_CHOICES || options.num_of_choices > MAX_CHOICES {
            return Err(GovernanceError::InvalidNumberOfChoices {
                num_of_choices: options.num_of_choices,
                min: MIN_CHOICES,
                max: MAX_CHOICES,
            });
        }

        let payload = self
            .tracker
            .kickoff("GenesisProtocol.propose", options_json(&options), 1)
            .await;
        let data = encode_call(
            "propose(uint256,bytes32,address,address)",
            &[
                Token::Uint(U256::from(options.num_of_choices)),
                Token::FixedBytes(options.params_hash.as_bytes().to_vec()),
                Token::Address(options.avatar),
                Token::Address(options.executable),
            ],
        );
        let handle = self.send_tracked(&payload, self.address, data).await?;
        Ok(ProposalHandle { handle })
    }

    pub async fn vote(&self, options: VoteOptions) -> GovernanceResult<TxHandle> {
        self.validate_vote(options.proposal_id, options.vote).await?;

        let payload = self
            .tracker
            .kickoff("GenesisProtocol.vote", options_json(&options), 1)
            .await;
        let data = encode_call(
            "vote(bytes32,uint256)",
            &[
                Token::FixedBytes(options.proposal_id.as_bytes().to_vec()),
                Token::Uint(U256::from(options.vote)),
            ],
        );
        self.send_tracked(&payload, self.address, data).await
    }

    pub async fn vote_with_specified_amounts(
        &self,
        options: VoteWithSpecifiedAmountsOptions,
    ) -> GovernanceResult<TxHandle> {
        self.validate_vote(options.proposal_id, options.vote).await?;

        let payload = self
            .tracker
            .kickoff(
                "GenesisProtocol.voteWithSpecifiedAmounts",
                options_json(&options),
                1,
            )
            .await;
        let data = encode_call(
            "voteWithSpecifiedAmounts(bytes32,uint256,uint256,uint256)",
            &[
                Token::FixedBytes(options.proposal_id.as_bytes().to_vec()),
                Token::Uint(U256::from(options.vote)),
                Token::Uint(options.reputation),
                Token::Uint(U256::zero()),
            ],
        );
        self.send_tracked(&payload, self.address, data).await
    }

    /// Stake tokens on the outcome matching `vote`. With
    /// `auto-approve-token-transfers` on, the token transfer to the
    /// voting machine is approved first; the operation then spans two
    /// transactions and subscribers see two mined notifications.
    pub async fn stake(&self, options: StakeOptions) -> GovernanceResult<TxHandle> {
        self.validate_vote(options.proposal_id, options.vote).await?;
        if options.amount.is_zero() {
            return Err(GovernanceError::InvalidStakeAmount);
        }

        let auto_approve = self.config.auto_approve_token_transfers;
        let payload = self
            .tracker
            .kickoff(
                "GenesisProtocol.stake",
                options_json(&options),
                1 + u32::from(auto_approve),
            )
            .await;

        if auto_approve {
            let staking_token = self.get_staking_token_address().await?;
            let approve = token::approve_calldata(self.address, options.amount);
            let handle = self.send_tracked(&payload, staking_token, approve).await?;
            handle.wait_mined().await?;
        }

        let data = stake_calldata(options.proposal_id, options.vote, options.amount);
        self.send_tracked(&payload, self.address, data).await
    }

    /// Approve the token transfer and stake in one transaction, via the
    /// staking token's ERC-827 `approveAndCall` carrying the encoded
    /// `stake` call.
    pub async fn stake_with_approval(&self, options: StakeOptions) -> GovernanceResult<TxHandle> {
        self.validate_vote(options.proposal_id, options.vote).await?;
        if options.amount.is_zero() {
            return Err(GovernanceError::InvalidStakeAmount);
        }

        let staking_token = self.get_staking_token_address().await?;
        let payload = self
            .tracker
            .kickoff(
                "GenesisProtocol.stakeWithApproval",
                options_json(&options),
                1,
            )
            .await;
        let inner = stake_calldata(options.proposal_id, options.vote, options.amount);
        let data = token::approve_and_call_calldata(self.address, options.amount, inner);
        self.send_tracked(&payload, staking_token, data).await
    }

    /// Close out an elapsed or decided proposal. The contract never
    /// advances on its own: this call is what makes a deadline-driven
    /// transition observable.
    pub async fn execute(&self, proposal_id: ProposalId) -> GovernanceResult<TxHandle> {
        require_proposal_id(proposal_id)?;
        let payload = self
            .tracker
            .kickoff(
                "GenesisProtocol.execute",
                serde_json::json!({ "proposalId": proposal_id }),
                1,
            )
            .await;
        let data = encode_call(
            "execute(bytes32)",
            &[Token::FixedBytes(proposal_id.as_bytes().to_vec())],
        );
        self.send_tracked(&payload, self.address, data).await
    }

    /// Redeem tokens and reputation due the beneficiary, excluding the
    /// dao bounty. Rejected locally unless the proposal reached a
    /// terminal state, to avoid wasting gas on a certain revert.
    pub async fn redeem(&self, options: RedeemOptions) -> GovernanceResult<TxHandle> {
        self.validate_redeem(&options).await?;
        let payload = self
            .tracker
            .kickoff("GenesisProtocol.redeem", options_json(&options), 1)
            .await;
        let data = encode_call(
            "redeem(bytes32,address)",
            &[
                Token::FixedBytes(options.proposal_id.as_bytes().to_vec()),
                Token::Address(options.beneficiary_address),
            ],
        );
        self.send_tracked(&payload, self.address, data).await
    }

    /// Redeem the dao bounty due the beneficiary
    pub async fn redeem_dao_bounty(&self, options: RedeemOptions) -> GovernanceResult<TxHandle> {
        self.validate_redeem(&options).await?;
        let payload = self
            .tracker
            .kickoff("GenesisProtocol.redeemDaoBounty", options_json(&options), 1)
            .await;
        let data = encode_call(
            "redeemDaoBounty(bytes32,address)",
            &[
                Token::FixedBytes(options.proposal_id.as_bytes().to_vec()),
                Token::Address(options.beneficiary_address),
            ],
        );
        self.send_tracked(&payload, self.address, data).await
    }

    /// Register a parameter set. Validation is all-or-nothing and local;
    /// the returned hash is the one the configuration is registered
    /// under and equals `params.hash()`.
    pub async fn set_parameters(
        &self,
        params: &GovernanceParams,
    ) -> GovernanceResult<(TxHandle, H256)> {
        params.validate()?;
        let payload = self
            .tracker
            .kickoff(
                "GenesisProtocol.setParameters",
                serde_json::to_value(params).unwrap_or_default(),
                1,
            )
            .await;
        let tokens: Vec<Token> = params.to_tuple().iter().map(|v| Token::Uint(*v)).collect();
        let data = encode_call("setParameters(uint256[14])", &[Token::FixedArray(tokens)]);
        let handle = self.send_tracked(&payload, self.address, data).await?;
        Ok((handle, params.hash()))
    }

    /// The hash under which `set_parameters` registers a configuration
    pub fn get_parameters_hash(&self, params: &GovernanceParams) -> H256 {
        params.hash()
    }

    // This voting machine variant has no proposal cancellation and no
    // owner voting; fail before touching the network.

    pub async fn cancel_proposal(&self, _proposal_id: ProposalId) -> GovernanceResult<TxHandle> {
        Err(GovernanceError::UnsupportedOperation("cancelProposal"))
    }

    pub async fn owner_vote(&self, _options: VoteOptions) -> GovernanceResult<TxHandle> {
        Err(GovernanceError::UnsupportedOperation("ownerVote"))
    }

    pub async fn cancel_vote(&self, _proposal_id: ProposalId) -> GovernanceResult<TxHandle> {
        Err(GovernanceError::UnsupportedOperation("cancelVote"))
    }

    // ---- read queries ----

    pub async fn get_state(&self, proposal_id: ProposalId) -> GovernanceResult<ProposalState> {
        require_proposal_id(proposal_id)?;
        let tokens = self
            .call_proposal("state(bytes32)", proposal_id, &[ParamType::Uint(8)])
            .await?;
        let state = take_uint(tokens.into_iter().next(), "state")?.as_u64();
        ProposalState::try_from(state as u8)
    }

    pub async fn is_votable(&self, proposal_id: ProposalId) -> GovernanceResult<bool> {
        Ok(self.get_state(proposal_id).await?.is_votable())
    }

    pub async fn get_proposal(&self, proposal_id: ProposalId) -> GovernanceResult<Proposal> {
        require_proposal_id(proposal_id)?;
        let tokens = self
            .call_proposal(
                "proposals(bytes32)",
                proposal_id,
                &[
                    ParamType::Address,
                    ParamType::Uint(256),
                    ParamType::Address,
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                    ParamType::Uint(8),
                    ParamType::Uint(256),
                    ParamType::Address,
                    ParamType::Uint(256),
                    ParamType::FixedBytes(32),
                    ParamType::Uint(256),
                ],
            )
            .await?;
        Proposal::from_tokens(proposal_id, tokens)
    }

    pub async fn get_proposal_status(
        &self,
        proposal_id: ProposalId,
    ) -> GovernanceResult<ProposalStatus> {
        require_proposal_id(proposal_id)?;
        let tokens = self
            .call_proposal(
                "proposalStatus(bytes32)",
                proposal_id,
                &vec![ParamType::Uint(256); 6],
            )
            .await?;
        let mut it = tokens.into_iter();
        Ok(ProposalStatus {
            pre_boosted_votes_yes: take_uint(it.next(), "preBoostedVotesYes")?,
            pre_boosted_votes_no: take_uint(it.next(), "preBoostedVotesNo")?,
            total_staker_stakes: take_uint(it.next(), "totalStakerStakes")?,
            total_staked: take_uint(it.next(), "totalStaked")?,
            stakes_yes: take_uint(it.next(), "stakesYes")?,
            stakes_no: take_uint(it.next(), "stakesNo")?,
        })
    }

    pub async fn get_voter_info(
        &self,
        proposal_id: ProposalId,
        voter: EthAddress,
    ) -> GovernanceResult<VoterInfo> {
        require_proposal_id(proposal_id)?;
        let tokens = self
            .client
            .call_decoded(
                self.address,
                "voteInfo(bytes32,address)",
                &[
                    Token::FixedBytes(proposal_id.as_bytes().to_vec()),
                    Token::Address(voter),
                ],
                &[ParamType::Uint(256), ParamType::Uint(256)],
            )
            .await?;
        let mut it = tokens.into_iter();
        Ok(VoterInfo {
            vote: take_uint(it.next(), "vote")?.as_u32(),
            reputation: take_uint(it.next(), "reputation")?,
        })
    }

    pub async fn get_staker_info(
        &self,
        proposal_id: ProposalId,
        staker: EthAddress,
    ) -> GovernanceResult<StakerInfo> {
        require_proposal_id(proposal_id)?;
        let tokens = self
            .client
            .call_decoded(
                self.address,
                "getStaker(bytes32,address)",
                &[
                    Token::FixedBytes(proposal_id.as_bytes().to_vec()),
                    Token::Address(staker),
                ],
                &[ParamType::Uint(256), ParamType::Uint(256)],
            )
            .await?;
        let mut it = tokens.into_iter();
        Ok(StakerInfo {
            vote: take_uint(it.next(), "vote")?.as_u32(),
            stake: take_uint(it.next(), "stake")?,
        })
    }

    /// Reputation currently voted on the given choice
    pub async fn get_vote_status(
        &self,
        proposal_id: ProposalId,
        vote: u32,
    ) -> GovernanceResult<U256> {
        self.validate_vote(proposal_id, vote).await?;
        let tokens = self
            .client
            .call_decoded(
                self.address,
                "voteStatus(bytes32,uint256)",
                &[
                    Token::FixedBytes(proposal_id.as_bytes().to_vec()),
                    Token::Uint(U256::from(vote)),
                ],
                &[ParamType::Uint(256)],
            )
            .await?;
        take_uint(tokens.into_iter().next(), "voteStatus")
    }

    pub async fn get_winning_vote(&self, proposal_id: ProposalId) -> GovernanceResult<u32> {
        require_proposal_id(proposal_id)?;
        let tokens = self
            .call_proposal("winningVote(bytes32)", proposal_id, &[ParamType::Uint(256)])
            .await?;
        Ok(take_uint(tokens.into_iter().next(), "winningVote")?.as_u32())
    }

    pub async fn get_number_of_choices(&self, proposal_id: ProposalId) -> GovernanceResult<u32> {
        require_proposal_id(proposal_id)?;
        let tokens = self
            .call_proposal(
                "getNumberOfChoices(bytes32)",
                proposal_id,
                &[ParamType::Uint(256)],
            )
            .await?;
        Ok(take_uint(tokens.into_iter().next(), "numOfChoices")?.as_u32())
    }

    /// Whether the proposal's score currently clears the boost threshold
    pub async fn should_boost(&self, proposal_id: ProposalId) -> GovernanceResult<bool> {
        require_proposal_id(proposal_id)?;
        let tokens = self
            .call_proposal("shouldBoost(bytes32)", proposal_id, &[ParamType::Bool])
            .await?;
        take_bool(tokens.into_iter().next(), "shouldBoost")
    }

    pub async fn get_score(&self, proposal_id: ProposalId) -> GovernanceResult<I256> {
        require_proposal_id(proposal_id)?;
        let tokens = self
            .call_proposal("score(bytes32)", proposal_id, &[ParamType::Int(256)])
            .await?;
        match tokens.into_iter().next() {
            Some(Token::Int(v)) => Ok(I256::from_raw(v)),
            other => Err(GovernanceError::AbiDecodeError(format!(
                "expected int for score, got {:?}",
                other
            ))),
        }
    }

    /// The score a proposal of this avatar must exceed to be boosted.
    /// Depends on the avatar's currently-boosted proposal count; see
    /// [`lifecycle::boost_threshold`] for the local arithmetic.
    pub async fn get_threshold(
        &self,
        params_hash: H256,
        avatar: EthAddress,
    ) -> GovernanceResult<I256> {
        let tokens = self
            .client
            .call_decoded(
                self.address,
                "threshold(bytes32,address)",
                &[
                    Token::FixedBytes(params_hash.as_bytes().to_vec()),
                    Token::Address(avatar),
                ],
                &[ParamType::Int(256)],
            )
            .await?;
        match tokens.into_iter().next() {
            Some(Token::Int(v)) => Ok(I256::from_raw(v)),
            other => Err(GovernanceError::AbiDecodeError(format!(
                "expected int for threshold, got {:?}",
                other
            ))),
        }
    }

    /// Boosted proposals of the avatar, not counting expired-but-not-yet
    /// -executed ones
    pub async fn get_boosted_proposals_count(
        &self,
        avatar: EthAddress,
    ) -> GovernanceResult<U256> {
        if avatar.is_zero() {
            return Err(GovernanceError::MissingField("avatar"));
        }
        let tokens = self
            .client
            .call_decoded(
                self.address,
                "getBoostedProposalsCount(address)",
                &[Token::Address(avatar)],
                &[ParamType::Uint(256)],
            )
            .await?;
        take_uint(tokens.into_iter().next(), "boostedProposalsCount")
    }

    pub async fn get_score_threshold_params(
        &self,
        avatar: EthAddress,
    ) -> GovernanceResult<ScoreThresholdParams> {
        if avatar.is_zero() {
            return Err(GovernanceError::MissingField("avatar"));
        }
        let tokens = self
            .client
            .call_decoded(
                self.address,
                "scoreThresholdParams(address)",
                &[Token::Address(avatar)],
                &[ParamType::Uint(256), ParamType::Uint(256)],
            )
            .await?;
        let mut it = tokens.into_iter();
        Ok(ScoreThresholdParams {
            threshold_const_a: take_uint(it.next(), "thresholdConstA")?,
            threshold_const_b: take_uint(it.next(), "thresholdConstB")?.as_u64(),
        })
    }

    pub async fn get_proposal_avatar(
        &self,
        proposal_id: ProposalId,
    ) -> GovernanceResult<EthAddress> {
        require_proposal_id(proposal_id)?;
        let tokens = self
            .call_proposal("proposalAvatar(bytes32)", proposal_id, &[ParamType::Address])
            .await?;
        take_address(tokens.into_iter().next(), "avatar")
    }

    /// Decode a registered parameter set by its hash
    pub async fn get_parameters(&self, params_hash: H256) -> GovernanceResult<GovernanceParams> {
        let tokens = self
            .client
            .call_decoded(
                self.address,
                "parameters(bytes32)",
                &[Token::FixedBytes(params_hash.as_bytes().to_vec())],
                &vec![ParamType::Uint(256); 14],
            )
            .await?;
        GovernanceParams::from_tokens(tokens)
    }

    pub async fn get_staking_token_address(&self) -> GovernanceResult<EthAddress> {
        let tokens = self
            .client
            .call_decoded(self.address, "stakingToken()", &[], &[ParamType::Address])
            .await?;
        take_address(tokens.into_iter().next(), "stakingToken")
    }

    pub async fn get_staking_token(&self) -> GovernanceResult<StakingTokenClient<P>> {
        let address = self.get_staking_token_address().await?;
        Ok(StakingTokenClient::new(self.client.clone(), address))
    }

    /// How the proposal came to be executed, from the historical
    /// `GPExecuteProposal` event; `None` when it has not executed (or the
    /// proposal is unknown).
    pub async fn get_proposal_execution_state(
        &self,
        proposal_id: ProposalId,
        from_block: u64,
    ) -> GovernanceResult<ExecutionState> {
        require_proposal_id(proposal_id)?;
        let latest = self.client.get_latest_block_id().await?;
        let logs = self
            .client
            .get_events_in_range(
                self.address,
                Some(GpExecuteProposalFilter::signature()),
                from_block,
                latest,
            )
            .await?;
        for log in logs {
            if log.log.topics.get(1) == Some(&proposal_id) {
                let raw = ethers::abi::RawLog {
                    topics: log.log.topics.clone(),
                    data: log.log.data.to_vec(),
                };
                let event = <GpExecuteProposalFilter as EthEvent>::decode_log(&raw)
                    .map_err(|e| GovernanceError::AbiDecodeError(e.to_string()))?;
                return ExecutionState::try_from(event.execution_state.as_u64() as u8);
            }
        }
        Ok(ExecutionState::None)
    }

    // ---- internals ----

    async fn validate_vote(&self, proposal_id: ProposalId, vote: u32) -> GovernanceResult<()> {
        require_proposal_id(proposal_id)?;
        let num_choices = self.get_number_of_choices(proposal_id).await?;
        lifecycle::validate_choice(vote, num_choices)
    }

    async fn validate_redeem(&self, options: &RedeemOptions) -> GovernanceResult<()> {
        require_proposal_id(options.proposal_id)?;
        if options.beneficiary_address.is_zero() {
            return Err(GovernanceError::MissingField("beneficiaryAddress"));
        }
        let state = self.get_state(options.proposal_id).await?;
        lifecycle::ensure_redeemable(state)
    }

    async fn call_proposal(
        &self,
        signature: &str,
        proposal_id: ProposalId,
        outputs: &[ParamType],
    ) -> GovernanceResult<Vec<Token>> {
        debug!("[GenesisProtocol] {} for {:?}", signature, proposal_id);
        self.client
            .call_decoded(
                self.address,
                signature,
                &[Token::FixedBytes(proposal_id.as_bytes().to_vec())],
                outputs,
            )
            .await
    }

    async fn send_tracked(
        &self,
        payload: &TrackingPayload,
        to: EthAddress,
        data: Bytes,
    ) -> GovernanceResult<TxHandle> {
        submit_tracked(
            &self.client,
            &self.tracker,
            &self.metrics,
            payload,
            self.account,
            to,
            data,
            self.config.receipt_poll_interval(),
        )
        .await
    }
}

/// Submit calldata as one tracked transaction: publish `sent` once the
/// hash is known, spawn a watcher resolving it to `mined` or `failed`,
/// and hand back the handle. Shared by every wrapper that mutates state.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn submit_tracked<P>(
    client: &Arc<EthClient<P>>,
    tracker: &Arc<TransactionTracker>,
    metrics: &Option<Arc<GovernanceMetrics>>,
    payload: &TrackingPayload,
    from: EthAddress,
    to: EthAddress,
    data: Bytes,
    receipt_poll_interval: std::time::Duration,
) -> GovernanceResult<TxHandle>
where
    P: JsonRpcClient + 'static,
{
    let tx = TransactionRequest::new().from(from).to(to).data(data);
    let tx_hash = match client.submit_transaction(tx).await {
        Ok(tx_hash) => tx_hash,
        Err(e) => {
            if let Some(m) = metrics {
                m.transaction_failures
                    .with_label_values(&[&payload.function_name, e.error_type()])
                    .inc();
            }
            tracker.failed(payload, None, e.to_string()).await;
            return Err(e);
        }
    };
    if let Some(m) = metrics {
        m.transactions_submitted
            .with_label_values(&[&payload.function_name])
            .inc();
    }
    tracker.sent(payload, tx_hash).await;

    let (result_tx, receipt_rx) = oneshot::channel();
    let client = client.clone();
    let tracker = tracker.clone();
    let metrics = metrics.clone();
    let watch_payload = payload.clone();
    tokio::spawn(async move {
        let result = client.wait_for_receipt(tx_hash, receipt_poll_interval).await;
        match &result {
            Ok(receipt) => tracker.mined(&watch_payload, receipt.clone()).await,
            Err(e) => {
                if let Some(ref m) = metrics {
                    m.transaction_failures
                        .with_label_values(&[&watch_payload.function_name, e.error_type()])
                        .inc();
                }
                tracker
                    .failed(&watch_payload, Some(tx_hash), e.to_string())
                    .await
            }
        }
        let _ = result_tx.send(result);
    });

    Ok(TxHandle {
        tx_hash,
        payload: payload.clone(),
        receipt_rx,
    })
}

fn require_proposal_id(proposal_id: ProposalId) -> GovernanceResult<()> {
    if proposal_id.is_zero() {
        return Err(GovernanceError::MissingField("proposalId"));
    }
    Ok(())
}

fn stake_calldata(proposal_id: ProposalId, vote: u32, amount: U256) -> Bytes {
    encode_call(
        "stake(bytes32,uint256,uint256)",
        &[
            Token::FixedBytes(proposal_id.as_bytes().to_vec()),
            Token::Uint(U256::from(vote)),
            Token::Uint(amount),
        ],
    )
}

fn options_json<T: Serialize>(options: &T) -> serde_json::Value {
    serde_json::to_value(options).unwrap_or_default()
}

#[async_trait]
impl<P> VotingMachine for GenesisProtocolClient<P>
where
    P: JsonRpcClient + 'static,
{
    async fn propose(&self, options: ProposeOptions) -> GovernanceResult<ProposalHandle> {
        GenesisProtocolClient::propose(self, options).await
    }

    async fn vote(&self, options: VoteOptions) -> GovernanceResult<TxHandle> {
        GenesisProtocolClient::vote(self, options).await
    }

    async fn vote_with_specified_amounts(
        &self,
        options: VoteWithSpecifiedAmountsOptions,
    ) -> GovernanceResult<TxHandle> {
        GenesisProtocolClient::vote_with_specified_amounts(self, options).await
    }

    async fn stake(&self, options: StakeOptions) -> GovernanceResult<TxHandle> {
        GenesisProtocolClient::stake(self, options).await
    }

    async fn execute(&self, proposal_id: ProposalId) -> GovernanceResult<TxHandle> {
        GenesisProtocolClient::execute(self, proposal_id).await
    }

    async fn get_state(&self, proposal_id: ProposalId) -> GovernanceResult<ProposalState> {
        GenesisProtocolClient::get_state(self, proposal_id).await
    }

    async fn get_number_of_choices(&self, proposal_id: ProposalId) -> GovernanceResult<u32> {
        GenesisProtocolClient::get_number_of_choices(self, proposal_id).await
    }

    async fn get_winning_vote(&self, proposal_id: ProposalId) -> GovernanceResult<u32> {
        GenesisProtocolClient::get_winning_vote(self, proposal_id).await
    }

    fn allowed_range_of_choices(&self) -> (u32, u32) {
        (MIN_CHOICES, MAX_CHOICES)
    }
}

#[async_trait]
impl<P> Redeemable for GenesisProtocolClient<P>
where
    P: JsonRpcClient + 'static,
{
    async fn redeem(&self, options: RedeemOptions) -> GovernanceResult<TxHandle> {
        GenesisProtocolClient::redeem(self, options).await
    }

    async fn redeem_dao_bounty(&self, options: RedeemOptions) -> GovernanceResult<TxHandle> {
        GenesisProtocolClient::redeem_dao_bounty(self, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_provider::EthMockProvider;
    use crate::test_utils::{init_test_logging, mock_eth_call, mock_send_transaction};
    use ethers::types::U64;

    fn test_client(mock: EthMockProvider) -> GenesisProtocolClient<EthMockProvider> {
        let client = Arc::new(EthClient::new_mocked(mock));
        let tracker = Arc::new(TransactionTracker::new());
        GenesisProtocolClient::new(
            client,
            tracker,
            EthAddress::repeat_byte(0x61),
            EthAddress::repeat_byte(0x11),
            GovernanceConfig {
                receipt_poll_interval_ms: 1,
                ..Default::default()
            },
        )
    }

    fn proposal_id() -> ProposalId {
        ProposalId::repeat_byte(0x42)
    }

    fn mock_num_choices(mock: &EthMockProvider, gp: EthAddress, pid: ProposalId, n: u64) {
        mock_eth_call(
            mock,
            gp,
            encode_call(
                "getNumberOfChoices(bytes32)",
                &[Token::FixedBytes(pid.as_bytes().to_vec())],
            ),
            &[Token::Uint(U256::from(n))],
        );
    }

    fn mock_state(mock: &EthMockProvider, gp: EthAddress, pid: ProposalId, state: ProposalState) {
        mock_eth_call(
            mock,
            gp,
            encode_call(
                "state(bytes32)",
                &[Token::FixedBytes(pid.as_bytes().to_vec())],
            ),
            &[Token::Uint(U256::from(state as u8))],
        );
    }

    #[tokio::test]
    async fn test_vote_rejects_out_of_range_choice_before_submission() {
        init_test_logging();
        let mock = EthMockProvider::new();
        let gp = EthAddress::repeat_byte(0x61);
        mock_num_choices(&mock, gp, proposal_id(), 2);
        // Deliberately no eth_sendTransaction response: a submission
        // attempt would surface as a provider error, not a validation one.
        let machine = test_client(mock);

        for vote in [3u32, 13] {
            let err = machine
                .vote(VoteOptions {
                    proposal_id: proposal_id(),
                    vote,
                })
                .await
                .unwrap_err();
            assert_eq!(err.error_type(), "invalid_vote_choice");
            assert!(err.is_validation());
        }
    }

    #[tokio::test]
    async fn test_vote_requires_proposal_id() {
        init_test_logging();
        let machine = test_client(EthMockProvider::new());
        let err = machine
            .vote(VoteOptions {
                proposal_id: ProposalId::zero(),
                vote: 1,
            })
            .await
            .unwrap_err();
        assert_eq!(err, GovernanceError::MissingField("proposalId"));
    }

    #[tokio::test]
    async fn test_stake_rejects_zero_amount() {
        init_test_logging();
        let mock = EthMockProvider::new();
        let gp = EthAddress::repeat_byte(0x61);
        mock_num_choices(&mock, gp, proposal_id(), 2);
        let machine = test_client(mock);

        let err = machine
            .stake(StakeOptions {
                proposal_id: proposal_id(),
                vote: 1,
                amount: U256::zero(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, GovernanceError::InvalidStakeAmount);
    }

    #[tokio::test]
    async fn test_redeem_rejects_every_non_terminal_state() {
        init_test_logging();
        let gp = EthAddress::repeat_byte(0x61);
        for state in [
            ProposalState::None,
            ProposalState::PreBoosted,
            ProposalState::Boosted,
            ProposalState::QuietEndingPeriod,
        ] {
            let mock = EthMockProvider::new();
            mock_state(&mock, gp, proposal_id(), state);
            let machine = test_client(mock);
            let err = machine
                .redeem(RedeemOptions {
                    proposal_id: proposal_id(),
                    beneficiary_address: EthAddress::repeat_byte(0x22),
                })
                .await
                .unwrap_err();
            assert_eq!(err, GovernanceError::WrongStateForRedeem(state));

            let err = machine
                .redeem_dao_bounty(RedeemOptions {
                    proposal_id: proposal_id(),
                    beneficiary_address: EthAddress::repeat_byte(0x22),
                })
                .await
                .unwrap_err();
            assert_eq!(err, GovernanceError::WrongStateForRedeem(state));
        }
    }

    #[tokio::test]
    async fn test_redeem_submits_in_terminal_state() {
        init_test_logging();
        let mock = EthMockProvider::new();
        let gp = EthAddress::repeat_byte(0x61);
        let account = EthAddress::repeat_byte(0x11);
        mock_state(&mock, gp, proposal_id(), ProposalState::Executed);
        let data = encode_call(
            "redeem(bytes32,address)",
            &[
                Token::FixedBytes(proposal_id().as_bytes().to_vec()),
                Token::Address(EthAddress::repeat_byte(0x22)),
            ],
        );
        let tx_hash = mock_send_transaction(&mock, account, gp, data);

        let machine = test_client(mock);
        let handle = machine
            .redeem(RedeemOptions {
                proposal_id: proposal_id(),
                beneficiary_address: EthAddress::repeat_byte(0x22),
            })
            .await
            .unwrap();
        assert_eq!(handle.tx_hash, tx_hash);
    }

    #[tokio::test]
    async fn test_unsupported_operations_fail_without_network() {
        init_test_logging();
        // No mock responses at all: any network call would error with a
        // provider error rather than unsupported_operation.
        let machine = test_client(EthMockProvider::new());

        let err = machine.cancel_proposal(proposal_id()).await.unwrap_err();
        assert_eq!(err, GovernanceError::UnsupportedOperation("cancelProposal"));
        let err = machine
            .owner_vote(VoteOptions {
                proposal_id: proposal_id(),
                vote: 1,
            })
            .await
            .unwrap_err();
        assert_eq!(err, GovernanceError::UnsupportedOperation("ownerVote"));
        let err = machine.cancel_vote(proposal_id()).await.unwrap_err();
        assert_eq!(err, GovernanceError::UnsupportedOperation("cancelVote"));
    }

    #[tokio::test]
    async fn test_propose_validates_choice_range() {
        init_test_logging();
        let machine = test_client(EthMockProvider::new());
        let err = machine
            .propose(ProposeOptions {
                avatar: EthAddress::repeat_byte(0x33),
                num_of_choices: 13,
                executable: EthAddress::repeat_byte(0x44),
                params_hash: H256::repeat_byte(0x55),
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "invalid_number_of_choices");

        let err = machine
            .propose(ProposeOptions {
                avatar: EthAddress::zero(),
                num_of_choices: 2,
                executable: EthAddress::repeat_byte(0x44),
                params_hash: H256::repeat_byte(0x55),
            })
            .await
            .unwrap_err();
        assert_eq!(err, GovernanceError::MissingField("avatar"));
    }

    #[tokio::test]
    async fn test_vote_lifecycle_notifications() {
        init_test_logging();
        let mock = EthMockProvider::new();
        let gp = EthAddress::repeat_byte(0x61);
        let account = EthAddress::repeat_byte(0x11);
        mock_num_choices(&mock, gp, proposal_id(), 2);
        let data = encode_call(
            "vote(bytes32,uint256)",
            &[
                Token::FixedBytes(proposal_id().as_bytes().to_vec()),
                Token::Uint(U256::one()),
            ],
        );
        let tx_hash = mock_send_transaction(&mock, account, gp, data);
        mock.add_response::<[TxHash; 1], TransactionReceipt, TransactionReceipt>(
            "eth_getTransactionReceipt",
            [tx_hash],
            TransactionReceipt {
                transaction_hash: tx_hash,
                status: Some(1.into()),
                block_number: Some(U64::from(90u64)),
                ..Default::default()
            },
        )
        .unwrap();

        let machine = test_client(mock);
        let mut subscription = machine
            .tracker
            .subscribe(vec!["TxTracking.GenesisProtocol.vote".to_string()])
            .await;

        let handle = machine
            .vote(VoteOptions {
                proposal_id: proposal_id(),
                vote: 1,
            })
            .await
            .unwrap();
        let receipt = handle.wait_mined().await.unwrap();
        assert_eq!(receipt.transaction_hash, tx_hash);

        let mut phases = Vec::new();
        for _ in 0..3 {
            let info = subscription.recv().await.unwrap();
            phases.push(info.topic.rsplit('.').next().unwrap().to_string());
        }
        assert_eq!(phases, vec!["kickoff", "sent", "mined"]);
    }

    #[tokio::test]
    async fn test_stake_with_auto_approval_spans_two_transactions() {
        init_test_logging();
        let mock = EthMockProvider::new();
        let gp = EthAddress::repeat_byte(0x61);
        let account = EthAddress::repeat_byte(0x11);
        let token_address = EthAddress::repeat_byte(0x77);
        let amount = U256::from(10u64);

        mock_num_choices(&mock, gp, proposal_id(), 2);
        mock_eth_call(
            &mock,
            gp,
            encode_call("stakingToken()", &[]),
            &[Token::Address(token_address)],
        );

        let approve_hash = mock_send_transaction(
            &mock,
            account,
            token_address,
            token::approve_calldata(gp, amount),
        );
        let stake_hash = mock_send_transaction(
            &mock,
            account,
            gp,
            stake_calldata(proposal_id(), 1, amount),
        );
        for tx_hash in [approve_hash, stake_hash] {
            mock.add_response::<[TxHash; 1], TransactionReceipt, TransactionReceipt>(
                "eth_getTransactionReceipt",
                [tx_hash],
                TransactionReceipt {
                    transaction_hash: tx_hash,
                    status: Some(1.into()),
                    ..Default::default()
                },
            )
            .unwrap();
        }

        let machine = test_client(mock);
        let mut subscription = machine
            .tracker
            .subscribe(vec!["TxTracking.GenesisProtocol.stake.mined".to_string()])
            .await;

        let handle = machine
            .stake(StakeOptions {
                proposal_id: proposal_id(),
                vote: 1,
                amount,
            })
            .await
            .unwrap();
        assert_eq!(handle.tx_hash, stake_hash);
        assert_eq!(handle.payload.tx_count, 2);
        handle.wait_mined().await.unwrap();

        // Exactly two mined notifications under the one payload
        let first = subscription.recv().await.unwrap();
        let second = subscription.recv().await.unwrap();
        assert_eq!(first.tx_hash, Some(approve_hash));
        assert_eq!(second.tx_hash, Some(stake_hash));
        assert_eq!(first.payload.id, second.payload.id);
        assert_eq!(first.payload.tx_count, 2);
    }

    #[tokio::test]
    async fn test_stake_without_auto_approval_is_single_transaction() {
        init_test_logging();
        let mock = EthMockProvider::new();
        let gp = EthAddress::repeat_byte(0x61);
        let account = EthAddress::repeat_byte(0x11);
        let amount = U256::from(10u64);

        mock_num_choices(&mock, gp, proposal_id(), 2);
        let stake_hash = mock_send_transaction(
            &mock,
            account,
            gp,
            stake_calldata(proposal_id(), 1, amount),
        );

        let client = Arc::new(EthClient::new_mocked(mock));
        let tracker = Arc::new(TransactionTracker::new());
        let machine = GenesisProtocolClient::new(
            client,
            tracker,
            gp,
            account,
            GovernanceConfig {
                auto_approve_token_transfers: false,
                receipt_poll_interval_ms: 1,
                ..Default::default()
            },
        );

        let handle = machine
            .stake(StakeOptions {
                proposal_id: proposal_id(),
                vote: 1,
                amount,
            })
            .await
            .unwrap();
        assert_eq!(handle.tx_hash, stake_hash);
        assert_eq!(handle.payload.tx_count, 1);
    }

    #[tokio::test]
    async fn test_set_parameters_round_trips_the_hash() {
        init_test_logging();
        let mock = EthMockProvider::new();
        let gp = EthAddress::repeat_byte(0x61);
        let account = EthAddress::repeat_byte(0x11);
        let params = GovernanceParams::default();

        let tokens: Vec<Token> = params.to_tuple().iter().map(|v| Token::Uint(*v)).collect();
        let data = encode_call("setParameters(uint256[14])", &[Token::FixedArray(tokens)]);
        mock_send_transaction(&mock, account, gp, data);

        let machine = test_client(mock);
        let (_handle, registered_hash) = machine.set_parameters(&params).await.unwrap();
        assert_eq!(registered_hash, machine.get_parameters_hash(&params));
    }

    #[tokio::test]
    async fn test_set_parameters_rejects_bad_threshold_const_b() {
        init_test_logging();
        let machine = test_client(EthMockProvider::new());
        let params = GovernanceParams {
            threshold_const_b: 0,
            ..Default::default()
        };
        let err = machine.set_parameters(&params).await.unwrap_err();
        assert_eq!(err.error_type(), "invalid_parameter");
    }

    #[test]
    fn test_proposal_id_from_receipt() {
        let pid = proposal_id();
        let log = ethers::types::Log {
            topics: vec![
                NewProposalFilter::signature(),
                pid,
                H256::from(EthAddress::repeat_byte(0x33)),
            ],
            data: ethers::abi::encode(&[
                Token::Uint(U256::from(2u64)),
                Token::Address(EthAddress::repeat_byte(0x11)),
                Token::FixedBytes(vec![0x55; 32]),
            ])
            .into(),
            ..Default::default()
        };
        let receipt = TransactionReceipt {
            logs: vec![log],
            ..Default::default()
        };
        assert_eq!(proposal_id_from_receipt(&receipt).unwrap(), pid);

        let empty = TransactionReceipt::default();
        assert_eq!(
            proposal_id_from_receipt(&empty).unwrap_err(),
            GovernanceError::MissingEventInReceipt("NewProposal")
        );
    }
}
