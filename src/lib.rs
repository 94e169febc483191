// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

#![allow(clippy::too_many_arguments, clippy::new_without_default)]

pub mod abi;
pub mod config;
pub mod correlator;
pub mod error;
pub mod eth_client;
pub mod feeds;
pub mod lifecycle;
pub mod metrics;
pub mod params;
pub mod redeemer;
pub mod registry;
pub mod token;
pub mod tracker;
pub mod types;
pub mod voting_machine;

#[cfg(test)]
pub mod mock_provider;

#[cfg(test)]
pub mod test_utils;

/// Binary vote outcome of this voting machine family
pub const BINARY_VOTE_YES: u32 = types::VOTE_YES;
pub const BINARY_VOTE_NO: u32 = types::VOTE_NO;
