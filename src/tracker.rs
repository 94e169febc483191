// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Transaction lifecycle tracking.
//!
//! Every state-mutating operation is announced on a process-wide bus:
//! once when it kicks off, then once per constituent transaction as each
//! resolves to mined or failed. Compound operations (staking with
//! auto-approval) declare two expected transactions up front so
//! subscribers can tell when the whole operation is complete.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ethers::types::{TransactionReceipt, TxHash};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

pub const TOPIC_ROOT: &str = "TxTracking";

/// Correlation record carried by every notification of one logical
/// operation.
#[derive(Debug, Clone)]
pub struct TrackingPayload {
    /// Generated id, stable across all notifications of this operation
    pub id: u64,
    /// e.g. "GenesisProtocol.stake"
    pub function_name: String,
    /// Echo of the caller's original options
    pub options: Value,
    /// Number of mined/failed notifications to expect before the
    /// operation is complete. 1 normally, 2 for compound operations.
    pub tx_count: u32,
}

impl TrackingPayload {
    fn topic(&self, phase: &str) -> String {
        format!("{}.{}.{}", TOPIC_ROOT, self.function_name, phase)
    }
}

/// What a subscriber receives: the topic it matched plus everything known
/// about the transaction at that point in its life.
#[derive(Debug, Clone)]
pub struct TxEventInfo {
    pub topic: String,
    pub payload: TrackingPayload,
    pub tx_hash: Option<TxHash>,
    pub receipt: Option<TransactionReceipt>,
    pub error: Option<String>,
}

struct Subscriber {
    patterns: Vec<String>,
    sender: mpsc::UnboundedSender<TxEventInfo>,
}

/// Process-wide publish/subscribe bus for transaction lifecycle events.
/// Created once and shared via `Arc`; it has no teardown of its own,
/// only subscriptions come and go.
pub struct TransactionTracker {
    next_payload_id: AtomicU64,
    next_subscriber_id: AtomicU64,
    subscribers: RwLock<HashMap<u64, Subscriber>>,
}

impl TransactionTracker {
    pub fn new() -> Self {
        Self {
            next_payload_id: AtomicU64::new(1),
            next_subscriber_id: AtomicU64::new(1),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Announce a new logical operation and return its correlation
    /// payload. Publishes `TxTracking.<function>.kickoff`.
    pub async fn kickoff(
        &self,
        function_name: &str,
        options: Value,
        tx_count: u32,
    ) -> TrackingPayload {
        let payload = TrackingPayload {
            id: self.next_payload_id.fetch_add(1, Ordering::SeqCst),
            function_name: function_name.to_string(),
            options,
            tx_count,
        };
        self.publish(&payload, "kickoff", None, None, None).await;
        payload
    }

    /// Publish `TxTracking.<function>.sent` once the transaction hash is
    /// known but the transaction is not yet mined.
    pub async fn sent(&self, payload: &TrackingPayload, tx_hash: TxHash) {
        self.publish(payload, "sent", Some(tx_hash), None, None)
            .await;
    }

    /// Publish `TxTracking.<function>.mined` for one constituent
    /// transaction of the operation.
    pub async fn mined(&self, payload: &TrackingPayload, receipt: TransactionReceipt) {
        let tx_hash = receipt.transaction_hash;
        self.publish(payload, "mined", Some(tx_hash), Some(receipt), None)
            .await;
    }

    /// Publish `TxTracking.<function>.failed` for one constituent
    /// transaction. The message echoes the underlying failure verbatim.
    pub async fn failed(&self, payload: &TrackingPayload, tx_hash: Option<TxHash>, error: String) {
        self.publish(payload, "failed", tx_hash, None, Some(error))
            .await;
    }

    async fn publish(
        &self,
        payload: &TrackingPayload,
        phase: &str,
        tx_hash: Option<TxHash>,
        receipt: Option<TransactionReceipt>,
        error: Option<String>,
    ) {
        let topic = payload.topic(phase);
        debug!("[TxTracker] publishing {} (payload {})", topic, payload.id);
        let info = TxEventInfo {
            topic: topic.clone(),
            payload: payload.clone(),
            tx_hash,
            receipt,
            error,
        };

        let mut dead = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for (id, subscriber) in subscribers.iter() {
                if subscriber.patterns.iter().any(|p| topic_matches(p, &topic)) {
                    if subscriber.sender.send(info.clone()).is_err() {
                        dead.push(*id);
                    }
                }
            }
        }
        // Prune subscribers whose receiver is gone
        if !dead.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in dead {
                warn!("[TxTracker] pruning dead subscriber {}", id);
                subscribers.remove(&id);
            }
        }
    }

    /// Register for all topics matching any of `patterns`. A pattern
    /// matches its own topic and everything below it:
    /// `"TxTracking.GenesisProtocol.stake"` receives kickoff, sent,
    /// mined and failed; `"TxTracking.GenesisProtocol.stake.mined"`
    /// receives mined only.
    pub async fn subscribe(
        self: &Arc<Self>,
        patterns: Vec<String>,
    ) -> TrackerSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .write()
            .await
            .insert(id, Subscriber { patterns, sender });
        TrackerSubscription {
            id,
            receiver,
            tracker: Arc::clone(self),
        }
    }

    async fn unsubscribe_id(&self, id: u64) {
        self.subscribers.write().await.remove(&id);
    }

    #[cfg(test)]
    pub(crate) async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

impl Default for TransactionTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn topic_matches(pattern: &str, topic: &str) -> bool {
    topic == pattern
        || (topic.len() > pattern.len()
            && topic.starts_with(pattern)
            && topic.as_bytes()[pattern.len()] == b'.')
}

/// Live registration on the tracker bus. Delivery stops when
/// `unsubscribe` is called; dropping the subscription without
/// unsubscribing leaves it to be pruned on the next publish.
pub struct TrackerSubscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<TxEventInfo>,
    tracker: Arc<TransactionTracker>,
}

impl TrackerSubscription {
    /// Next notification, `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<TxEventInfo> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TxEventInfo> {
        self.receiver.try_recv().ok()
    }

    /// Stop delivery. Idempotent: unsubscribing twice is a no-op.
    pub async fn unsubscribe(&mut self) {
        self.tracker.unsubscribe_id(self.id).await;
        self.receiver.close();
    }
}
