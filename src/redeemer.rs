// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Redeemer bindings and the reward-aggregation feed.
//!
//! Rewards for one proposal can be paid out by two different contracts,
//! usually in one transaction triggered through the Redeemer convenience
//! contract. The feed here correlates the seven redemption events across
//! both sources and produces one normalized summary per redeeming
//! transaction.

use std::sync::Arc;

use crate::abi::{
    decode_redemption, CrRedeemReputationFilter, RedeemDaoBountyFilter, RedeemEtherFilter,
    RedeemExternalTokenFilter, RedeemFilter, RedeemNativeTokenFilter, RedeemReputationFilter,
};
use crate::config::GovernanceConfig;
use crate::correlator::{AggregatedEvent, EventCorrelator, EventSpec, WatchEvent};
use crate::error::{GovernanceError, GovernanceResult};
use crate::eth_client::{encode_call, EthClient};
use crate::metrics::GovernanceMetrics;
use crate::registry::{ContractRegistry, CONTRIBUTION_REWARD, GENESIS_PROTOCOL, REDEEMER};
use crate::tracker::TransactionTracker;
use crate::types::{take_bool, ProposalId};
use crate::voting_machine::TxHandle;
use ethers::abi::{ParamType, Token};
use ethers::contract::EthEvent;
use ethers::providers::JsonRpcClient;
use ethers::types::{Address as EthAddress, TxHash, U256};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Semantic label of each reward source event. The first three come from
/// the voting machine, the rest from the contribution-reward scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardLabel {
    GenesisProtocolTokens,
    GenesisProtocolReputation,
    GenesisProtocolDaoBounty,
    ContributionRewardReputation,
    ContributionRewardEther,
    ContributionRewardNativeToken,
    ContributionRewardExternalToken,
}

impl RewardLabel {
    pub fn is_voting_machine_family(&self) -> bool {
        matches!(
            self,
            RewardLabel::GenesisProtocolTokens
                | RewardLabel::GenesisProtocolReputation
                | RewardLabel::GenesisProtocolDaoBounty
        )
    }

    pub fn is_reward_scheme_family(&self) -> bool {
        !self.is_voting_machine_family()
    }
}

/// The seven fixed specifiers of the reward feed, in resolution order.
/// Note both contracts emit an event named `RedeemReputation`; they are
/// told apart by source contract and topic.
pub fn reward_event_specs(
    genesis_protocol: EthAddress,
    contribution_reward: EthAddress,
) -> Vec<EventSpec<RewardLabel>> {
    vec![
        EventSpec::new(
            genesis_protocol,
            "Redeem",
            RedeemFilter::signature(),
            RewardLabel::GenesisProtocolTokens,
        ),
        EventSpec::new(
            genesis_protocol,
            "RedeemReputation",
            RedeemReputationFilter::signature(),
            RewardLabel::GenesisProtocolReputation,
        ),
        EventSpec::new(
            genesis_protocol,
            "RedeemDaoBounty",
            RedeemDaoBountyFilter::signature(),
            RewardLabel::GenesisProtocolDaoBounty,
        ),
        EventSpec::new(
            contribution_reward,
            "RedeemReputation",
            CrRedeemReputationFilter::signature(),
            RewardLabel::ContributionRewardReputation,
        ),
        EventSpec::new(
            contribution_reward,
            "RedeemEther",
            RedeemEtherFilter::signature(),
            RewardLabel::ContributionRewardEther,
        ),
        EventSpec::new(
            contribution_reward,
            "RedeemNativeToken",
            RedeemNativeTokenFilter::signature(),
            RewardLabel::ContributionRewardNativeToken,
        ),
        EventSpec::new(
            contribution_reward,
            "RedeemExternalToken",
            RedeemExternalTokenFilter::signature(),
            RewardLabel::ContributionRewardExternalToken,
        ),
    ]
}

/// One redeeming transaction, normalized. Absent categories were simply
/// not part of that transaction. Derived on delivery, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardSummary {
    pub proposal_id: ProposalId,
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub genesis_protocol_tokens: Option<U256>,
    pub genesis_protocol_reputation: Option<U256>,
    pub genesis_protocol_dao_bounty: Option<U256>,
    pub contribution_reward_reputation: Option<U256>,
    pub contribution_reward_ether: Option<U256>,
    pub contribution_reward_native_token: Option<U256>,
    pub contribution_reward_external_token: Option<U256>,
    /// Beneficiary resolved from whichever voting-machine-family event
    /// is present, first match in specifier order
    pub genesis_protocol_beneficiary: Option<EthAddress>,
    /// Beneficiary resolved from whichever reward-scheme-family event is
    /// present, same rule
    pub contribution_reward_beneficiary: Option<EthAddress>,
}

/// Fold one aggregate into a reward summary. The aggregate is never
/// empty, so the proposal id always resolves.
pub fn summarize_aggregate(
    aggregate: &AggregatedEvent<RewardLabel>,
) -> GovernanceResult<RewardSummary> {
    let mut summary = RewardSummary {
        proposal_id: ProposalId::zero(),
        transaction_hash: aggregate.tx_hash,
        block_number: aggregate.block_number,
        genesis_protocol_tokens: None,
        genesis_protocol_reputation: None,
        genesis_protocol_dao_bounty: None,
        contribution_reward_reputation: None,
        contribution_reward_ether: None,
        contribution_reward_native_token: None,
        contribution_reward_external_token: None,
        genesis_protocol_beneficiary: None,
        contribution_reward_beneficiary: None,
    };

    let mut proposal_id = None;
    for (label, log) in &aggregate.entries {
        let topic0 = log.log.topics.first().copied().ok_or_else(|| {
            GovernanceError::AbiDecodeError("aggregated log without topics".to_string())
        })?;
        let (pid, beneficiary, amount) = decode_redemption(topic0, log)?;
        proposal_id.get_or_insert(pid);

        match label {
            RewardLabel::GenesisProtocolTokens => summary.genesis_protocol_tokens = Some(amount),
            RewardLabel::GenesisProtocolReputation => {
                summary.genesis_protocol_reputation = Some(amount)
            }
            RewardLabel::GenesisProtocolDaoBounty => {
                summary.genesis_protocol_dao_bounty = Some(amount)
            }
            RewardLabel::ContributionRewardReputation => {
                summary.contribution_reward_reputation = Some(amount)
            }
            RewardLabel::ContributionRewardEther => {
                summary.contribution_reward_ether = Some(amount)
            }
            RewardLabel::ContributionRewardNativeToken => {
                summary.contribution_reward_native_token = Some(amount)
            }
            RewardLabel::ContributionRewardExternalToken => {
                summary.contribution_reward_external_token = Some(amount)
            }
        }

        // First match per family wins; entry order is specifier order
        if label.is_voting_machine_family() && summary.genesis_protocol_beneficiary.is_none() {
            summary.genesis_protocol_beneficiary = Some(beneficiary);
        }
        if label.is_reward_scheme_family() && summary.contribution_reward_beneficiary.is_none() {
            summary.contribution_reward_beneficiary = Some(beneficiary);
        }
    }

    summary.proposal_id = proposal_id.ok_or_else(|| {
        GovernanceError::AbiDecodeError("empty aggregate cannot be summarized".to_string())
    })?;
    Ok(summary)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RewardEventsOptions {
    /// Report on every redeeming transaction, not only those routed
    /// through the Redeemer contract
    pub all_sources: bool,
    /// Override of the Redeemer address used for source filtering;
    /// defaults to the client's deployed address
    pub redeemer_address: Option<EthAddress>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemerRedeemOptions {
    pub proposal_id: ProposalId,
    pub avatar_address: EthAddress,
    pub beneficiary_address: EthAddress,
}

/// Amounts that would be redeemed if `redeem` ran right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redeemables {
    pub proposal_id: ProposalId,
    pub staker_token_amount: U256,
    pub staker_reputation_amount: U256,
    pub voter_token_amount: U256,
    pub voter_reputation_amount: U256,
    pub proposer_reputation_amount: U256,
    pub dao_staking_bounty_reward: U256,
    pub dao_staking_bounty_potential_reward: U256,
    pub proposal_executed: bool,
    pub contribution_reward_reputation: bool,
    pub contribution_reward_native_token: bool,
    pub contribution_reward_ether: bool,
    pub contribution_reward_external_token: bool,
}

/// Events delivered on a reward feed subscription
#[derive(Debug, Clone)]
pub enum RewardEvent {
    Summary(RewardSummary),
    /// The underlying correlator terminated; this feed is done
    Error(String),
}

/// Handle to a live reward feed. Closing it tears down the underlying
/// correlator watch as well.
pub struct RewardSubscription {
    receiver: mpsc::Receiver<RewardEvent>,
    cancel: tokio_util::sync::CancellationToken,
}

impl RewardSubscription {
    pub async fn recv(&mut self) -> Option<RewardEvent> {
        self.receiver.recv().await
    }

    /// Stop delivery; idempotent
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for RewardSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct RedeemerClient<P> {
    client: Arc<EthClient<P>>,
    tracker: Arc<TransactionTracker>,
    config: GovernanceConfig,
    /// Deployed Redeemer address
    pub address: EthAddress,
    account: EthAddress,
    genesis_protocol: EthAddress,
    contribution_reward: EthAddress,
    metrics: Option<Arc<GovernanceMetrics>>,
}

impl<P> RedeemerClient<P>
where
    P: JsonRpcClient + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<EthClient<P>>,
        tracker: Arc<TransactionTracker>,
        address: EthAddress,
        account: EthAddress,
        genesis_protocol: EthAddress,
        contribution_reward: EthAddress,
        config: GovernanceConfig,
    ) -> Self {
        Self {
            client,
            tracker,
            config,
            address,
            account,
            genesis_protocol,
            contribution_reward,
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
        Ok(Self::new(
            client,
            tracker,
            registry.require(REDEEMER)?,
            account,
            registry.require(GENESIS_PROTOCOL)?,
            registry.require(CONTRIBUTION_REWARD)?,
            config,
        ))
    }

    /// Attach metrics for monitoring
    pub fn with_metrics(mut self, metrics: Arc<GovernanceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Redeem every reward due the beneficiary across both source
    /// contracts in a single transaction, executing the proposal first if
    /// an execute is still pending.
    pub async fn redeem(&self, options: RedeemerRedeemOptions) -> GovernanceResult<TxHandle> {
        self.validate(&options)?;
        let payload = self
            .tracker
            .kickoff(
                "Redeemer.redeem",
                serde_json::to_value(&options).unwrap_or_default(),
                1,
            )
            .await;
        let data = encode_call(
            "redeem(bytes32,address,address)",
            &[
                Token::FixedBytes(options.proposal_id.as_bytes().to_vec()),
                Token::Address(options.avatar_address),
                Token::Address(options.beneficiary_address),
            ],
        );
        crate::voting_machine::submit_tracked(
            &self.client,
            &self.tracker,
            &self.metrics,
            &payload,
            self.account,
            self.address,
            data,
            self.config.receipt_poll_interval(),
        )
        .await
    }

    /// Dry-run of `redeem`: what would be paid out right now
    pub async fn redeemables(
        &self,
        options: RedeemerRedeemOptions,
    ) -> GovernanceResult<Redeemables> {
        self.validate(&options)?;
        let tokens = self
            .client
            .call_decoded(
                self.address,
                "redeem(bytes32,address,address)",
                &[
                    Token::FixedBytes(options.proposal_id.as_bytes().to_vec()),
                    Token::Address(options.avatar_address),
                    Token::Address(options.beneficiary_address),
                ],
                &[
                    ParamType::FixedArray(Box::new(ParamType::Uint(256)), 5),
                    ParamType::FixedArray(Box::new(ParamType::Uint(256)), 2),
                    ParamType::Bool,
                    ParamType::FixedArray(Box::new(ParamType::Bool), 4),
                ],
            )
            .await?;
        let mut it = tokens.into_iter();
        let gp_amounts = take_uint_array::<5>(it.next(), "genesisProtocolRedeemables")?;
        let bounty = take_uint_array::<2>(it.next(), "daoStakingBounty")?;
        let proposal_executed = take_bool(it.next(), "proposalExecuted")?;
        let cr_flags = take_bool_array::<4>(it.next(), "contributionRewardRedeemables")?;

        Ok(Redeemables {
            proposal_id: options.proposal_id,
            staker_token_amount: gp_amounts[0],
            staker_reputation_amount: gp_amounts[1],
            voter_token_amount: gp_amounts[2],
            voter_reputation_amount: gp_amounts[3],
            proposer_reputation_amount: gp_amounts[4],
            dao_staking_bounty_reward: bounty[0],
            dao_staking_bounty_potential_reward: bounty[1],
            proposal_executed,
            contribution_reward_reputation: cr_flags[0],
            contribution_reward_native_token: cr_flags[1],
            contribution_reward_ether: cr_flags[2],
            contribution_reward_external_token: cr_flags[3],
        })
    }

    /// The correlator over the seven reward specifiers
    pub fn reward_correlator(&self) -> EventCorrelator<P, RewardLabel> {
        let specs = reward_event_specs(self.genesis_protocol, self.contribution_reward);
        let correlator =
            EventCorrelator::new(self.client.clone(), specs, self.config.clone())
                .expect("reward specifier set is never empty");
        match &self.metrics {
            Some(m) => correlator.with_metrics(m.clone()),
            None => correlator,
        }
    }

    /// One-shot fetch of reward summaries over a historical range
    pub async fn fetch_reward_events(
        &self,
        options: RewardEventsOptions,
        from_block: u64,
        to_block: Option<u64>,
    ) -> GovernanceResult<Vec<RewardSummary>> {
        let aggregates = self.reward_correlator().fetch(from_block, to_block).await?;
        let mut summaries = Vec::new();
        for aggregate in &aggregates {
            if self.matches_source(options, aggregate).await? {
                summaries.push(summarize_aggregate(aggregate)?);
            }
        }
        Ok(summaries)
    }

    /// Live reward feed: everything from `from_block`, then new
    /// summaries as blocks are mined.
    pub fn watch_reward_events(
        &self,
        options: RewardEventsOptions,
        from_block: u64,
    ) -> RewardSubscription {
        let mut inner = self.reward_correlator().get_then_watch(from_block);
        let cancel = inner.cancellation_token();
        let (summary_tx, summary_rx) = mpsc::channel(self.config.channel_size);

        let client = self.client.clone();
        let redeemer = options.redeemer_address.unwrap_or(self.address);
        let all_sources = options.all_sources;
        tokio::spawn(async move {
            while let Some(event) = inner.recv().await {
                let forwarded = match event {
                    WatchEvent::Aggregate(aggregate) => {
                        match source_matches(&client, all_sources, redeemer, &aggregate).await {
                            Ok(false) => continue,
                            Ok(true) => match summarize_aggregate(&aggregate) {
                                Ok(summary) => RewardEvent::Summary(summary),
                                Err(e) => {
                                    warn!("[RewardFeed] dropping undecodable aggregate: {}", e);
                                    continue;
                                }
                            },
                            Err(e) => RewardEvent::Error(format!(
                                "source lookup for {:?} failed: {}",
                                aggregate.tx_hash, e
                            )),
                        }
                    }
                    WatchEvent::Error(message) => RewardEvent::Error(message),
                };
                let is_error = matches!(forwarded, RewardEvent::Error(_));
                if summary_tx.send(forwarded).await.is_err() || is_error {
                    break;
                }
            }
        });

        RewardSubscription {
            receiver: summary_rx,
            cancel,
        }
    }

    async fn matches_source(
        &self,
        options: RewardEventsOptions,
        aggregate: &AggregatedEvent<RewardLabel>,
    ) -> GovernanceResult<bool> {
        let redeemer = options.redeemer_address.unwrap_or(self.address);
        source_matches(&self.client, options.all_sources, redeemer, aggregate).await
    }

    fn validate(&self, options: &RedeemerRedeemOptions) -> GovernanceResult<()> {
        if options.avatar_address.is_zero() {
            return Err(GovernanceError::MissingField("avatarAddress"));
        }
        if options.beneficiary_address.is_zero() {
            return Err(GovernanceError::MissingField("beneficiaryAddress"));
        }
        if options.proposal_id.is_zero() {
            return Err(GovernanceError::MissingField("proposalId"));
        }
        Ok(())
    }
}

async fn source_matches<P: JsonRpcClient + 'static>(
    client: &EthClient<P>,
    all_sources: bool,
    redeemer: EthAddress,
    aggregate: &AggregatedEvent<RewardLabel>,
) -> GovernanceResult<bool> {
    if all_sources {
        return Ok(true);
    }
    let to = client.get_transaction_to(aggregate.tx_hash).await?;
    debug!(
        "[RewardFeed] tx {:?} targeted {:?} (redeemer {:?})",
        aggregate.tx_hash, to, redeemer
    );
    Ok(to == Some(redeemer))
}

fn take_uint_array<const N: usize>(
    t: Option<Token>,
    field: &str,
) -> GovernanceResult<[U256; N]> {
    match t {
        Some(Token::FixedArray(tokens)) if tokens.len() == N => {
            let mut out = [U256::zero(); N];
            for (i, token) in tokens.into_iter().enumerate() {
                out[i] = crate::types::take_uint(Some(token), field)?;
            }
            Ok(out)
        }
        other => Err(GovernanceError::AbiDecodeError(format!(
            "expected uint[{}] for {}, got {:?}",
            N, field, other
        ))),
    }
}

fn take_bool_array<const N: usize>(t: Option<Token>, field: &str) -> GovernanceResult<[bool; N]> {
    match t {
        Some(Token::FixedArray(tokens)) if tokens.len() == N => {
            let mut out = [false; N];
            for (i, token) in tokens.into_iter().enumerate() {
                out[i] = take_bool(Some(token), field)?;
            }
            Ok(out)
        }
        other => Err(GovernanceError::AbiDecodeError(format!(
            "expected bool[{}] for {}, got {:?}",
            N, field, other
        ))),
    }
}
