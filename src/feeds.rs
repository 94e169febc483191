// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Event-derived proposal feeds: votable proposals and executed
//! proposals, keyed by avatar, as one-shot fetches or live watches.
//! Fetches are restartable: running the same range again yields the
//! same sequence.

use std::sync::Arc;

use crate::abi::{ExecuteProposalFilter, NewProposalFilter};
use crate::correlator::{EventCorrelator, EventSpec, WatchEvent};
use crate::error::{GovernanceError, GovernanceResult};
use crate::types::{EthLog, ExecutedProposal, Proposal, ProposalId};
use crate::voting_machine::GenesisProtocolClient;
use ethers::abi::RawLog;
use ethers::contract::{EthEvent, EthLogDecode};
use ethers::providers::JsonRpcClient;
use ethers::types::{Address as EthAddress, H256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedLabel {
    NewProposal,
    ExecuteProposal,
}

/// Events delivered on a proposal feed subscription
#[derive(Debug, Clone)]
pub enum FeedEvent<T> {
    Item(T),
    /// The underlying watch terminated; this feed is done
    Error(String),
}

/// Handle to a live proposal feed
pub struct FeedSubscription<T> {
    receiver: mpsc::Receiver<FeedEvent<T>>,
    cancel: CancellationToken,
}

impl<T> FeedSubscription<T> {
    pub async fn recv(&mut self) -> Option<FeedEvent<T>> {
        self.receiver.recv().await
    }

    /// Stop delivery; idempotent
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl<T> Drop for FeedSubscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Proposal feeds of one voting machine
pub struct ProposalFeeds<P> {
    machine: Arc<GenesisProtocolClient<P>>,
}

impl<P> ProposalFeeds<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(machine: Arc<GenesisProtocolClient<P>>) -> Self {
        Self { machine }
    }

    /// Proposals of the avatar created in the range that are still
    /// accepting votes
    pub async fn votable_proposals(
        &self,
        avatar: EthAddress,
        from_block: u64,
        to_block: Option<u64>,
    ) -> GovernanceResult<Vec<Proposal>> {
        let logs = self
            .fetch_logs(NewProposalFilter::signature(), from_block, to_block)
            .await?;
        let mut proposals = Vec::new();
        for log in logs {
            let Some(proposal_id) = proposal_id_for_avatar(&log, avatar) else {
                continue;
            };
            let proposal = self.machine.get_proposal(proposal_id).await?;
            if proposal.state.is_votable() {
                proposals.push(proposal);
            }
        }
        Ok(proposals)
    }

    /// Proposals of the avatar that reached a terminal decision in the
    /// range, enriched with decision, total reputation and execution
    /// state. `proposal_filter` narrows the feed to one proposal.
    pub async fn executed_proposals(
        &self,
        avatar: EthAddress,
        from_block: u64,
        to_block: Option<u64>,
        proposal_filter: Option<ProposalId>,
    ) -> GovernanceResult<Vec<ExecutedProposal>> {
        let logs = self
            .fetch_logs(ExecuteProposalFilter::signature(), from_block, to_block)
            .await?;
        let mut executed = Vec::new();
        for log in logs {
            let Some(proposal_id) = proposal_id_for_avatar(&log, avatar) else {
                continue;
            };
            if proposal_filter.is_some_and(|filter| filter != proposal_id) {
                continue;
            }
            executed.push(enrich_executed(&self.machine, proposal_id, &log, from_block).await?);
        }
        Ok(executed)
    }

    /// Live feed of proposals becoming votable, from `from_block`
    pub fn watch_votable_proposals(
        &self,
        avatar: EthAddress,
        from_block: u64,
    ) -> FeedSubscription<Proposal> {
        let machine = self.machine.clone();
        self.spawn_feed(
            FeedLabel::NewProposal,
            NewProposalFilter::signature(),
            from_block,
            move |log| {
                let machine = machine.clone();
                async move {
                    let Some(proposal_id) = proposal_id_for_avatar(&log, avatar) else {
                        return Ok(None);
                    };
                    let proposal = machine.get_proposal(proposal_id).await?;
                    Ok(proposal.state.is_votable().then_some(proposal))
                }
            },
        )
    }

    /// Live feed of executed proposals, from `from_block`
    pub fn watch_executed_proposals(
        &self,
        avatar: EthAddress,
        from_block: u64,
    ) -> FeedSubscription<ExecutedProposal> {
        let machine = self.machine.clone();
        self.spawn_feed(
            FeedLabel::ExecuteProposal,
            ExecuteProposalFilter::signature(),
            from_block,
            move |log| {
                let machine = machine.clone();
                async move {
                    let Some(proposal_id) = proposal_id_for_avatar(&log, avatar) else {
                        return Ok(None);
                    };
                    enrich_executed(&machine, proposal_id, &log, from_block)
                        .await
                        .map(Some)
                }
            },
        )
    }

    async fn fetch_logs(
        &self,
        topic0: H256,
        from_block: u64,
        to_block: Option<u64>,
    ) -> GovernanceResult<Vec<EthLog>> {
        let client = self.machine.eth_client();
        let to_block = match to_block {
            Some(b) => b,
            None => client.get_latest_block_id().await?,
        };
        let mut logs = Vec::new();
        let mut cursor = from_block;
        let range = self.machine.config().max_block_range.max(1);
        while cursor <= to_block {
            let end = std::cmp::min(cursor.saturating_add(range - 1), to_block);
            logs.extend(
                client
                    .get_events_in_range(self.machine.address, Some(topic0), cursor, end)
                    .await?,
            );
            cursor = end + 1;
        }
        Ok(logs)
    }

    fn spawn_feed<T, F, Fut>(
        &self,
        label: FeedLabel,
        topic0: H256,
        from_block: u64,
        map: F,
    ) -> FeedSubscription<T>
    where
        T: Send + 'static,
        F: Fn(EthLog) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = GovernanceResult<Option<T>>> + Send,
    {
        let specs = vec![EventSpec::new(
            self.machine.address,
            match label {
                FeedLabel::NewProposal => "NewProposal",
                FeedLabel::ExecuteProposal => "ExecuteProposal",
            },
            topic0,
            label,
        )];
        let correlator = EventCorrelator::new(
            self.machine.eth_client().clone(),
            specs,
            self.machine.config().clone(),
        )
        .expect("single-specifier feed is never empty");
        let mut inner = correlator.get_then_watch(from_block);
        let cancel = inner.cancellation_token();
        let (feed_tx, feed_rx) = mpsc::channel(self.machine.config().channel_size);

        tokio::spawn(async move {
            while let Some(event) = inner.recv().await {
                match event {
                    WatchEvent::Aggregate(aggregate) => {
                        for (_, log) in aggregate.entries {
                            match map(log).await {
                                Ok(Some(item)) => {
                                    if feed_tx.send(FeedEvent::Item(item)).await.is_err() {
                                        return;
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    warn!("[ProposalFeed] dropping undecodable entry: {}", e);
                                }
                            }
                        }
                    }
                    WatchEvent::Error(message) => {
                        let _ = feed_tx.send(FeedEvent::Error(message)).await;
                        return;
                    }
                }
            }
        });

        FeedSubscription {
            receiver: feed_rx,
            cancel,
        }
    }
}

/// Pull the proposal id out of a NewProposal/ExecuteProposal log when
/// the log belongs to `avatar`. Topic positions are shared by both
/// events: proposal id first, avatar second.
fn proposal_id_for_avatar(log: &EthLog, avatar: EthAddress) -> Option<ProposalId> {
    let topics = &log.log.topics;
    if topics.get(2) != Some(&H256::from(avatar)) {
        return None;
    }
    topics.get(1).copied()
}

async fn enrich_executed<P>(
    machine: &Arc<GenesisProtocolClient<P>>,
    proposal_id: ProposalId,
    log: &EthLog,
    from_block: u64,
) -> GovernanceResult<ExecutedProposal>
where
    P: JsonRpcClient + 'static,
{
    let raw = RawLog {
        topics: log.log.topics.clone(),
        data: log.log.data.to_vec(),
    };
    let event = <ExecuteProposalFilter as EthEvent>::decode_log(&raw)
        .map_err(|e| GovernanceError::AbiDecodeError(e.to_string()))?;
    let proposal = machine.get_proposal(proposal_id).await?;
    let execution_state = machine
        .get_proposal_execution_state(proposal_id, from_block)
        .await?;
    Ok(ExecutedProposal {
        proposal,
        decision: event.decision.as_u32(),
        total_reputation: event.total_reputation,
        execution_state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GovernanceConfig;
    use crate::eth_client::{encode_call, EthClient};
    use crate::mock_provider::EthMockProvider;
    use crate::test_utils::init_test_logging;
    use crate::tracker::TransactionTracker;
    use crate::types::ProposalState;
    use ethers::abi::Token;
    use ethers::types::{Log, TxHash, U256, U64};
    use serde_json::json;

    fn gp() -> EthAddress {
        EthAddress::repeat_byte(0x61)
    }

    fn avatar() -> EthAddress {
        EthAddress::repeat_byte(0x33)
    }

    fn machine(mock: EthMockProvider) -> Arc<GenesisProtocolClient<EthMockProvider>> {
        Arc::new(GenesisProtocolClient::new(
            Arc::new(EthClient::new_mocked(mock)),
            Arc::new(TransactionTracker::new()),
            gp(),
            EthAddress::repeat_byte(0x11),
            GovernanceConfig::default(),
        ))
    }

    fn new_proposal_log(proposal_id: ProposalId, for_avatar: EthAddress, block: u64) -> Log {
        Log {
            address: gp(),
            topics: vec![
                NewProposalFilter::signature(),
                proposal_id,
                H256::from(for_avatar),
            ],
            data: ethers::abi::encode(&[
                Token::Uint(U256::from(2u64)),
                Token::Address(EthAddress::repeat_byte(0x11)),
                Token::FixedBytes(vec![0x55; 32]),
            ])
            .into(),
            block_number: Some(U64::from(block)),
            transaction_hash: Some(TxHash::repeat_byte(proposal_id.as_bytes()[0])),
            ..Default::default()
        }
    }

    fn execute_proposal_log(proposal_id: ProposalId, for_avatar: EthAddress, block: u64) -> Log {
        Log {
            address: gp(),
            topics: vec![
                ExecuteProposalFilter::signature(),
                proposal_id,
                H256::from(for_avatar),
            ],
            data: ethers::abi::encode(&[
                Token::Uint(U256::from(1u64)),
                Token::Uint(U256::from(1000u64)),
            ])
            .into(),
            block_number: Some(U64::from(block)),
            transaction_hash: Some(TxHash::repeat_byte(proposal_id.as_bytes()[0])),
            ..Default::default()
        }
    }

    fn mock_logs(mock: &EthMockProvider, topic0: H256, from: u64, to: u64, logs: Vec<Log>) {
        let filter = ethers::types::Filter::new()
            .from_block(from)
            .to_block(to)
            .address(gp())
            .topic0(topic0);
        mock.add_response_value("eth_getLogs", json!([filter]), json!(logs))
            .unwrap();
    }

    fn mock_proposal(
        mock: &EthMockProvider,
        proposal_id: ProposalId,
        state: ProposalState,
    ) {
        let tokens = vec![
            Token::Address(avatar()),
            Token::Uint(U256::from(2u64)),
            Token::Address(EthAddress::repeat_byte(2)),
            Token::Uint(U256::zero()),
            Token::Uint(U256::from(1_000_000u64)),
            Token::Uint(U256::zero()),
            Token::Uint(U256::from(state as u8)),
            Token::Uint(U256::from(1u64)),
            Token::Address(EthAddress::repeat_byte(3)),
            Token::Uint(U256::from(259_200u64)),
            Token::FixedBytes(vec![7u8; 32]),
            Token::Uint(U256::zero()),
        ];
        crate::test_utils::mock_eth_call(
            mock,
            gp(),
            encode_call(
                "proposals(bytes32)",
                &[Token::FixedBytes(proposal_id.as_bytes().to_vec())],
            ),
            &tokens,
        );
    }

    #[tokio::test]
    async fn test_votable_proposals_filters_state_and_avatar() {
        init_test_logging();
        let mock = EthMockProvider::new();
        let votable = ProposalId::repeat_byte(0x01);
        let executed = ProposalId::repeat_byte(0x02);
        let foreign = ProposalId::repeat_byte(0x03);

        mock_logs(
            &mock,
            NewProposalFilter::signature(),
            0,
            100,
            vec![
                new_proposal_log(votable, avatar(), 10),
                new_proposal_log(executed, avatar(), 11),
                new_proposal_log(foreign, EthAddress::repeat_byte(0x99), 12),
            ],
        );
        mock_proposal(&mock, votable, ProposalState::PreBoosted);
        mock_proposal(&mock, executed, ProposalState::Executed);

        let feeds = ProposalFeeds::new(machine(mock));
        let proposals = feeds
            .votable_proposals(avatar(), 0, Some(100))
            .await
            .unwrap();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].proposal_id, votable);
        assert_eq!(proposals[0].state, ProposalState::PreBoosted);
    }

    #[tokio::test]
    async fn test_executed_proposals_enriches_with_event_payload() {
        init_test_logging();
        let mock = EthMockProvider::new();
        let proposal_id = ProposalId::repeat_byte(0x04);

        mock_logs(
            &mock,
            ExecuteProposalFilter::signature(),
            0,
            100,
            vec![execute_proposal_log(proposal_id, avatar(), 20)],
        );
        mock_proposal(&mock, proposal_id, ProposalState::Executed);

        // Execution-state lookup: head block then GPExecuteProposal logs
        mock.add_response("eth_blockNumber", (), U64::from(100u64))
            .unwrap();
        let gp_execute_log = Log {
            address: gp(),
            topics: vec![
                crate::abi::GpExecuteProposalFilter::signature(),
                proposal_id,
            ],
            data: ethers::abi::encode(&[Token::Uint(U256::from(2u64))]).into(),
            block_number: Some(U64::from(20u64)),
            transaction_hash: Some(TxHash::repeat_byte(0x04)),
            ..Default::default()
        };
        mock_logs(
            &mock,
            crate::abi::GpExecuteProposalFilter::signature(),
            0,
            100,
            vec![gp_execute_log],
        );

        let feeds = ProposalFeeds::new(machine(mock));
        let executed = feeds
            .executed_proposals(avatar(), 0, Some(100), None)
            .await
            .unwrap();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].decision, 1);
        assert_eq!(executed[0].total_reputation, U256::from(1000u64));
        assert_eq!(
            executed[0].execution_state,
            crate::types::ExecutionState::PreBoostedBarCrossed
        );

        // Narrowing to a different proposal id yields nothing
        let none = feeds
            .executed_proposals(avatar(), 0, Some(100), Some(ProposalId::repeat_byte(0x05)))
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
