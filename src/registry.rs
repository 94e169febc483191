// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{GovernanceError, GovernanceResult};
use ethers::types::Address as EthAddress;
use std::collections::BTreeMap;

pub const GENESIS_PROTOCOL: &str = "GenesisProtocol";
pub const CONTRIBUTION_REWARD: &str = "ContributionReward";
pub const REDEEMER: &str = "Redeemer";
pub const STAKING_TOKEN: &str = "StakingToken";

/// Deployed-contract-address registry.
///
/// Built once at application start from whatever address source the
/// embedder uses (deployment artifacts, config file) and passed
/// explicitly to the clients that need it; read-only thereafter.
#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    addresses: BTreeMap<String, EthAddress>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contract(mut self, name: &str, address: EthAddress) -> Self {
        self.addresses.insert(name.to_string(), address);
        self
    }

    pub fn insert(&mut self, name: &str, address: EthAddress) {
        self.addresses.insert(name.to_string(), address);
    }

    /// Resolve a deployed address, `None` when the contract is unknown
    pub fn resolve(&self, name: &str) -> Option<EthAddress> {
        self.addresses.get(name).copied()
    }

    /// Resolve a deployed address, erroring with the contract name
    pub fn require(&self, name: &str) -> GovernanceResult<EthAddress> {
        self.resolve(name)
            .ok_or_else(|| GovernanceError::UnknownContract(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.addresses.keys().map(|s| s.as_str())
    }
}
