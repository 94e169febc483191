// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Cross-contract event correlation.
//!
//! Given an ordered set of (contract, event) specifiers, the correlator
//! watches every source independently and groups the decoded log entries
//! that share a transaction hash into one aggregated record. Aggregates
//! are delivered in ascending block order; a transaction that matched no
//! specifier never produces a record.
//!
//! Specifiers carry a caller-supplied typed label, resolved once at
//! construction time. Two specifiers matching in the same transaction are
//! not a conflict: both entries are retained under their distinct labels.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::config::GovernanceConfig;
use crate::error::{CorrelateError, CorrelateResult, GovernanceResult};
use crate::eth_client::EthClient;
use crate::metrics::GovernanceMetrics;
use crate::types::EthLog;
use ethers::providers::JsonRpcClient;
use ethers::types::{Address as EthAddress, TxHash, H256};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One event source to correlate: which contract, which event, and the
/// label under which matched entries appear in an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSpec<L> {
    pub contract: EthAddress,
    pub event_name: &'static str,
    pub topic0: H256,
    pub label: L,
}

impl<L> EventSpec<L> {
    pub fn new(contract: EthAddress, event_name: &'static str, topic0: H256, label: L) -> Self {
        Self {
            contract,
            event_name,
            topic0,
            label,
        }
    }
}

/// All matching event entries of a single transaction, grouped under
/// their specifier labels. Entry order follows specifier order; at most
/// one entry per label (first occurrence wins); never empty.
#[derive(Debug, Clone)]
pub struct AggregatedEvent<L> {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub entries: Vec<(L, EthLog)>,
}

impl<L: Copy + Eq> AggregatedEvent<L> {
    pub fn get(&self, label: L) -> Option<&EthLog> {
        self.entries
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, log)| log)
    }

    pub fn labels(&self) -> impl Iterator<Item = L> + '_ {
        self.entries.iter().map(|(l, _)| *l)
    }
}

/// Group per-specifier log batches into aggregates.
///
/// `per_spec_logs` is aligned with `specs`; iteration is specifier-major
/// so entries within one transaction come out in specifier order, which
/// downstream consumers rely on for first-match resolution.
pub fn aggregate_logs<L: Copy + Eq>(
    specs: &[EventSpec<L>],
    per_spec_logs: Vec<Vec<EthLog>>,
) -> Vec<AggregatedEvent<L>> {
    debug_assert_eq!(specs.len(), per_spec_logs.len());

    let mut groups: Vec<AggregatedEvent<L>> = Vec::new();
    let mut index: HashMap<TxHash, usize> = HashMap::new();

    for (spec, logs) in specs.iter().zip(per_spec_logs) {
        for log in logs {
            // Defensive: drop anything the transport returned that does
            // not actually match the specifier.
            if log.log.topics.first() != Some(&spec.topic0) {
                continue;
            }
            let slot = *index.entry(log.tx_hash).or_insert_with(|| {
                groups.push(AggregatedEvent {
                    tx_hash: log.tx_hash,
                    block_number: log.block_number,
                    entries: Vec::new(),
                });
                groups.len() - 1
            });
            let group = &mut groups[slot];
            // First occurrence per label wins
            if group.get(spec.label).is_none() {
                group.entries.push((spec.label, log));
            }
        }
    }

    // Ascending block order; stable, so same-block groups keep their
    // discovery order.
    groups.sort_by_key(|g| g.block_number);
    groups
}

/// Events delivered on a watch subscription
#[derive(Debug, Clone)]
pub enum WatchEvent<L> {
    Aggregate(AggregatedEvent<L>),
    /// An unrecoverable log-query error; this subscription terminates
    /// after delivering it. Retry policy belongs to the embedder.
    Error(String),
}

/// Correlates events from one or more contracts into per-transaction
/// aggregates. Cheap to clone; every watch subscription runs its own
/// independent polling task.
pub struct EventCorrelator<P, L> {
    client: Arc<EthClient<P>>,
    specs: Arc<Vec<EventSpec<L>>>,
    config: GovernanceConfig,
    metrics: Option<Arc<GovernanceMetrics>>,
}

impl<P, L> Clone for EventCorrelator<P, L> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            specs: self.specs.clone(),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<P, L> EventCorrelator<P, L>
where
    P: JsonRpcClient + 'static,
    L: Copy + Eq + Debug + Send + Sync + 'static,
{
    pub fn new(
        client: Arc<EthClient<P>>,
        specs: Vec<EventSpec<L>>,
        config: GovernanceConfig,
    ) -> CorrelateResult<Self> {
        if specs.is_empty() {
            return Err(CorrelateError::InvalidSpecifier(
                "at least one event specifier is required".to_string(),
            ));
        }
        Ok(Self {
            client,
            specs: Arc::new(specs),
            config,
            metrics: None,
        })
    }

    /// Attach metrics for monitoring
    pub fn with_metrics(mut self, metrics: Arc<GovernanceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn specs(&self) -> &[EventSpec<L>] {
        &self.specs
    }

    /// One-shot fetch of a historical range. `to_block` defaults to the
    /// chain head. Wide ranges are chunked transparently.
    pub async fn fetch(
        &self,
        from_block: u64,
        to_block: Option<u64>,
    ) -> GovernanceResult<Vec<AggregatedEvent<L>>> {
        let to_block = match to_block {
            Some(b) => b,
            None => self.client.get_latest_block_id().await?,
        };
        let range = self.config.max_block_range.max(1);
        let mut aggregates = Vec::new();
        let mut cursor = from_block;
        while cursor <= to_block {
            let end = std::cmp::min(cursor.saturating_add(range - 1), to_block);
            let tasks = self.specs.iter().map(|spec| {
                self.client
                    .get_events_in_range(spec.contract, Some(spec.topic0), cursor, end)
            });
            let per_spec = futures::future::join_all(tasks)
                .await
                .into_iter()
                .collect::<GovernanceResult<Vec<_>>>()?;
            aggregates.extend(aggregate_logs(&self.specs, per_spec));
            cursor = end + 1;
        }
        Ok(aggregates)
    }

    /// Live subscription delivering new aggregates as blocks are mined,
    /// starting after the current chain head.
    pub async fn watch(&self) -> GovernanceResult<CorrelatorSubscription<L>> {
        let latest = self.client.get_latest_block_id().await?;
        Ok(self.spawn_watch(latest + 1))
    }

    /// Combined mode: deliver everything from `from_block` first, then
    /// keep delivering live.
    pub fn get_then_watch(&self, from_block: u64) -> CorrelatorSubscription<L> {
        self.spawn_watch(from_block)
    }

    fn spawn_watch(&self, start_block: u64) -> CorrelatorSubscription<L> {
        let (event_tx, event_rx) = mpsc::channel(self.config.channel_size);
        let cancel = CancellationToken::new();

        let client = self.client.clone();
        let specs = self.specs.clone();
        let config = self.config.clone();
        let metrics = self.metrics.clone();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            run_watch_task(
                client,
                specs,
                config,
                metrics,
                start_block,
                event_tx,
                cancel_clone,
            )
            .await;
        });

        CorrelatorSubscription {
            receiver: event_rx,
            cancel,
        }
    }
}

async fn run_watch_task<P, L>(
    client: Arc<EthClient<P>>,
    specs: Arc<Vec<EventSpec<L>>>,
    config: GovernanceConfig,
    metrics: Option<Arc<GovernanceMetrics>>,
    start_block: u64,
    event_tx: mpsc::Sender<WatchEvent<L>>,
    cancel: CancellationToken,
) where
    P: JsonRpcClient + 'static,
    L: Copy + Eq + Debug + Send + Sync + 'static,
{
    info!(
        "[Correlator] starting watch of {} specifiers from block {}",
        specs.len(),
        start_block
    );

    let range = config.max_block_range.max(1);
    let mut cursor = start_block;
    let mut more_blocks = false;
    let mut interval = time::interval(config.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        // When catching up (more_blocks=true), don't wait for the next tick
        if !more_blocks {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Correlator] watch cancelled at block {}", cursor);
                    break;
                }
                _ = interval.tick() => {}
            }
        } else if cancel.is_cancelled() {
            info!("[Correlator] watch cancelled at block {}", cursor);
            break;
        }

        let latest = match client.get_latest_block_id().await {
            Ok(latest) => latest,
            Err(e) => {
                terminate(&event_tx, &metrics, format!("latest block query failed: {}", e)).await;
                return;
            }
        };

        if latest < cursor {
            debug!(
                "[Correlator] latest block {} < cursor {}, waiting",
                latest, cursor
            );
            more_blocks = false;
            continue;
        }

        let end = std::cmp::min(cursor.saturating_add(range - 1), latest);
        more_blocks = end < latest;

        let mut per_spec = Vec::with_capacity(specs.len());
        let mut failed = None;
        for spec in specs.iter() {
            match client
                .get_events_in_range(spec.contract, Some(spec.topic0), cursor, end)
                .await
            {
                Ok(logs) => per_spec.push(logs),
                Err(e) => {
                    failed = Some(format!(
                        "log query for {} on {:?} failed: {}",
                        spec.event_name, spec.contract, e
                    ));
                    break;
                }
            }
        }
        if let Some(error) = failed {
            terminate(&event_tx, &metrics, error).await;
            return;
        }

        for aggregate in aggregate_logs(&specs, per_spec) {
            debug!(
                "[Correlator] aggregate at block {} with {} entries (tx {:?})",
                aggregate.block_number,
                aggregate.entries.len(),
                aggregate.tx_hash
            );
            if event_tx
                .send(WatchEvent::Aggregate(aggregate))
                .await
                .is_err()
            {
                // Receiver dropped; nothing left to deliver to
                return;
            }
            if let Some(ref m) = metrics {
                m.aggregates_delivered.inc();
            }
        }

        if let Some(ref m) = metrics {
            m.last_correlated_block.set(end as i64);
        }
        cursor = end + 1;
    }
}

async fn terminate<L>(
    event_tx: &mpsc::Sender<WatchEvent<L>>,
    metrics: &Option<Arc<GovernanceMetrics>>,
    error: String,
) {
    warn!("[Correlator] terminating watch: {}", error);
    if let Some(m) = metrics {
        m.subscriptions_terminated.inc();
    }
    let _ = event_tx.send(WatchEvent::Error(error)).await;
}

/// Handle to a live watch. `close` stops further delivery and is
/// idempotent; dropping the handle closes it too. Queries already in
/// flight when the handle closes are allowed to complete and are
/// discarded.
pub struct CorrelatorSubscription<L> {
    receiver: mpsc::Receiver<WatchEvent<L>>,
    cancel: CancellationToken,
}

impl<L> CorrelatorSubscription<L> {
    /// Next delivery; `None` once the watch task has terminated and the
    /// channel drained.
    pub async fn recv(&mut self) -> Option<WatchEvent<L>> {
        self.receiver.recv().await
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Token shared with the watch task, for callers that layer their
    /// own teardown on top of this subscription
    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl<L> Drop for CorrelatorSubscription<L> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
