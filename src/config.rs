// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct GovernanceConfig {
    /// Approve the staking-token transfer automatically before each
    /// `stake` call. When off, the staker must have pre-approved the
    /// voting machine.
    pub auto_approve_token_transfers: bool,
    /// How often watch subscriptions poll for new blocks, milliseconds
    pub poll_interval_ms: u64,
    /// How often a pending transaction is polled for its receipt,
    /// milliseconds
    pub receipt_poll_interval_ms: u64,
    /// Largest block span of a single log query; callers see no
    /// difference, wider ranges are chunked
    pub max_block_range: u64,
    /// Buffer size of subscription delivery channels
    pub channel_size: usize,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            auto_approve_token_transfers: true,
            poll_interval_ms: 1_000,
            receipt_poll_interval_ms: 1_000,
            max_block_range: 1_000,
            channel_size: 100,
        }
    }
}

impl GovernanceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_block_range == 0 {
            anyhow::bail!("max-block-range must be greater than 0");
        }
        if self.channel_size == 0 {
            anyhow::bail!("channel-size must be greater than 0");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll-interval-ms must be greater than 0");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}
