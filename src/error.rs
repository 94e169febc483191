// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::types::ProposalState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovernanceError {
    // A required identifier or option is missing
    MissingField(&'static str),
    // Vote/stake choice is outside [0, numOfChoices]
    InvalidVoteChoice { vote: u32, num_choices: u32 },
    // Stake amount must be > 0
    InvalidStakeAmount,
    // numOfChoices is outside the range this voting machine accepts
    InvalidNumberOfChoices { num_of_choices: u32, min: u32, max: u32 },
    // Redemption attempted while the proposal is not in a terminal state
    WrongStateForRedeem(ProposalState),
    // Operation this voting machine variant does not support
    UnsupportedOperation(&'static str),
    // A governance parameter is out of its allowed bound
    InvalidParameter { field: &'static str, reason: String },
    // Ethereum provider error
    ProviderError(String),
    // Transient Ethereum provider error
    TransientProviderError(String),
    // The submitted transaction was mined but reverted
    TxFailed(String),
    // The referenced transaction does not exist
    TxNotFound,
    // A mined receipt did not carry the expected event log
    MissingEventInReceipt(&'static str),
    // Failure to decode a contract return value or event log
    AbiDecodeError(String),
    // Contract address was not found in the registry
    UnknownContract(String),
    // Uncategorized error
    Generic(String),
}

impl GovernanceError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            GovernanceError::MissingField(_) => "missing_field",
            GovernanceError::InvalidVoteChoice { .. } => "invalid_vote_choice",
            GovernanceError::InvalidStakeAmount => "invalid_stake_amount",
            GovernanceError::InvalidNumberOfChoices { .. } => "invalid_number_of_choices",
            GovernanceError::WrongStateForRedeem(_) => "wrong_state_for_redeem",
            GovernanceError::UnsupportedOperation(_) => "unsupported_operation",
            GovernanceError::InvalidParameter { .. } => "invalid_parameter",
            GovernanceError::ProviderError(_) => "provider_error",
            GovernanceError::TransientProviderError(_) => "transient_provider_error",
            GovernanceError::TxFailed(_) => "tx_failed",
            GovernanceError::TxNotFound => "tx_not_found",
            GovernanceError::MissingEventInReceipt(_) => "missing_event_in_receipt",
            GovernanceError::AbiDecodeError(_) => "abi_decode_error",
            GovernanceError::UnknownContract(_) => "unknown_contract",
            GovernanceError::Generic(_) => "generic",
        }
    }

    /// Validation errors are raised locally, before any network call is made
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            GovernanceError::MissingField(_)
                | GovernanceError::InvalidVoteChoice { .. }
                | GovernanceError::InvalidStakeAmount
                | GovernanceError::InvalidNumberOfChoices { .. }
                | GovernanceError::WrongStateForRedeem(_)
                | GovernanceError::UnsupportedOperation(_)
                | GovernanceError::InvalidParameter { .. }
        )
    }
}

impl std::fmt::Display for GovernanceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GovernanceError::MissingField(field) => write!(f, "{} is not defined", field),
            GovernanceError::InvalidVoteChoice { vote, num_choices } => write!(
                f,
                "vote choice {} is out of the allowed range [0, {}]",
                vote, num_choices
            ),
            GovernanceError::InvalidStakeAmount => write!(f, "amount must be > 0"),
            GovernanceError::InvalidNumberOfChoices {
                num_of_choices,
                min,
                max,
            } => write!(
                f,
                "numOfChoices {} is out of the allowed range [{}, {}]",
                num_of_choices, min, max
            ),
            GovernanceError::WrongStateForRedeem(state) => write!(
                f,
                "cannot redeem unless proposal state is either executed or closed. Current state: {}",
                state
            ),
            GovernanceError::UnsupportedOperation(op) => {
                write!(f, "GenesisProtocol does not support {}", op)
            }
            GovernanceError::InvalidParameter { field, reason } => {
                write!(f, "{} {}", field, reason)
            }
            GovernanceError::ProviderError(msg) => write!(f, "provider error: {}", msg),
            GovernanceError::TransientProviderError(msg) => {
                write!(f, "transient provider error: {}", msg)
            }
            GovernanceError::TxFailed(msg) => write!(f, "transaction failed: {}", msg),
            GovernanceError::TxNotFound => write!(f, "transaction not found"),
            GovernanceError::MissingEventInReceipt(name) => {
                write!(f, "mined receipt carries no {} event", name)
            }
            GovernanceError::AbiDecodeError(msg) => write!(f, "abi decode error: {}", msg),
            GovernanceError::UnknownContract(name) => {
                write!(f, "no deployed address registered for {}", name)
            }
            GovernanceError::Generic(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for GovernanceError {}

impl From<ethers::providers::ProviderError> for GovernanceError {
    fn from(e: ethers::providers::ProviderError) -> Self {
        GovernanceError::ProviderError(format!("{:?}", e))
    }
}

impl From<ethers::abi::Error> for GovernanceError {
    fn from(e: ethers::abi::Error) -> Self {
        GovernanceError::AbiDecodeError(e.to_string())
    }
}

pub type GovernanceResult<T> = Result<T, GovernanceError>;

/// Error type for event-correlation subscriptions
#[derive(Debug, Clone, thiserror::Error)]
pub enum CorrelateError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Invalid event specifier: {0}")]
    InvalidSpecifier(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("{0}")]
    Other(String),
}

pub type CorrelateResult<T> = Result<T, CorrelateError>;
