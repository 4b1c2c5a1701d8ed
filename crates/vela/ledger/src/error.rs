//! Ledger error types.

use alloy_primitives::{Address, U256};
use vela_primitives::{ErrorKind, ReportSignatureError};

use crate::{CustodyError, StreamId, StreamState};

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors from stream, node and settlement operations.
///
/// Every variant leaves the ledger unchanged.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Malformed request (zero amount, zero duration, self-stream, ...).
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("stream {0} already exists")]
    StreamExists(StreamId),

    #[error("stream {0} not found")]
    StreamNotFound(StreamId),

    #[error("node {0} not found")]
    NodeNotFound(Address),

    #[error("stream {id} is {state}")]
    StreamNotActive { id: StreamId, state: StreamState },

    #[error("node {0} is not active")]
    NodeNotActive(Address),

    #[error("node {0} is already registered")]
    AlreadyRegistered(Address),

    #[error("{caller} may not act on behalf of {expected}")]
    Unauthorized { caller: Address, expected: Address },

    #[error("stake {stake} below minimum {min_stake}")]
    InsufficientStake { stake: U256, min_stake: U256 },

    /// Withdrawal exceeds what has vested.
    #[error("requested {requested} exceeds available {available}")]
    InsufficientBalance { requested: U256, available: U256 },

    #[error("payment {amount} below minimum {min_payment}")]
    BelowMinimumPayment { amount: U256, min_payment: U256 },

    #[error("usage report rejected: {0}")]
    InvalidReport(#[from] ReportSignatureError),

    #[error(transparent)]
    Custody(#[from] CustodyError),
}

impl LedgerError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) | Self::BelowMinimumPayment { .. } => ErrorKind::InvalidInput,
            Self::StreamExists(_) => ErrorKind::StreamExists,
            Self::StreamNotFound(_) | Self::NodeNotFound(_) => ErrorKind::NotFound,
            Self::StreamNotActive { .. } | Self::NodeNotActive(_) | Self::AlreadyRegistered(_) => {
                ErrorKind::InvalidState
            }
            Self::Unauthorized { .. } | Self::InvalidReport(_) => ErrorKind::Unauthorized,
            Self::InsufficientStake { .. } => ErrorKind::InsufficientStake,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::Custody(err) => err.kind(),
        }
    }
}
