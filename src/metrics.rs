// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, IntCounter, IntCounterVec, IntGauge, Registry,
};

#[derive(Clone)]
pub struct GovernanceMetrics {
    /// Transactions submitted, by contract function
    pub transactions_submitted: IntCounterVec,
    /// Transaction failures, by contract function and error type
    pub transaction_failures: IntCounterVec,
    /// Aggregated event records delivered to subscribers
    pub aggregates_delivered: IntCounter,
    /// Watch subscriptions terminated by a log-query error
    pub subscriptions_terminated: IntCounter,
    /// Highest block the correlator has processed
    pub last_correlated_block: IntGauge,
}

impl GovernanceMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            transactions_submitted: register_int_counter_vec_with_registry!(
                "governance_transactions_submitted",
                "Transactions submitted, by contract function",
                &["function"],
                registry,
            )
            .unwrap(),
            transaction_failures: register_int_counter_vec_with_registry!(
                "governance_transaction_failures",
                "Transaction failures, by contract function and error type",
                &["function", "error_type"],
                registry,
            )
            .unwrap(),
            aggregates_delivered: register_int_counter_with_registry!(
                "governance_aggregates_delivered",
                "Aggregated event records delivered to subscribers",
                registry,
            )
            .unwrap(),
            subscriptions_terminated: register_int_counter_with_registry!(
                "governance_subscriptions_terminated",
                "Watch subscriptions terminated by a log-query error",
                registry,
            )
            .unwrap(),
            last_correlated_block: register_int_gauge_with_registry!(
                "governance_last_correlated_block",
                "Highest block the correlator has processed",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        Self::new(&Registry::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        let metrics = GovernanceMetrics::new_for_testing();
        metrics
            .transactions_submitted
            .with_label_values(&["GenesisProtocol.vote"])
            .inc();
        metrics.aggregates_delivered.inc();
        assert_eq!(metrics.aggregates_delivered.get(), 1);
    }
}
