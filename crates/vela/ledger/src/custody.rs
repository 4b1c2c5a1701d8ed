//! Where escrowed tokens sit.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use auto_impl::auto_impl;
use parking_lot::Mutex;
use vela_primitives::ErrorKind;

/// Errors moving tokens in or out of escrow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CustodyError {
    #[error("{address} holds {balance}, needs {requested}")]
    InsufficientFunds {
        address: Address,
        balance: U256,
        requested: U256,
    },
    #[error("escrow holds {escrowed}, cannot release {requested}")]
    EscrowShortfall { escrowed: U256, requested: U256 },
    #[error("custody unavailable: {0}")]
    Unavailable(String),
}

impl CustodyError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientBalance,
            Self::EscrowShortfall { .. } | Self::Unavailable(_) => ErrorKind::CollaboratorFailure,
        }
    }
}

/// Moves tokens between holder balances and the protocol escrow.
///
/// Each call is atomic: it either moves the full amount or nothing.
#[auto_impl(&, Arc)]
pub trait Custody: Send + Sync {
    /// Move `amount` from `from` into escrow.
    fn lock(&self, from: Address, amount: U256) -> Result<(), CustodyError>;

    /// Move `amount` out of escrow to `to`.
    fn release(&self, to: Address, amount: U256) -> Result<(), CustodyError>;

    /// Free balance of `address`.
    fn balance_of(&self, address: Address) -> Result<U256, CustodyError>;

    /// Total held in escrow.
    fn escrowed(&self) -> U256;
}

#[derive(Debug, Default)]
struct Balances {
    free: HashMap<Address, U256>,
    escrowed: U256,
    failure: Option<String>,
}

/// In-memory custody.
#[derive(Debug, Default)]
pub struct MemoryCustody {
    inner: Mutex<Balances>,
}

impl MemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` of fresh tokens to `address`.
    pub fn deposit(&self, address: Address, amount: U256) {
        let mut inner = self.inner.lock();
        let balance = inner.free.entry(address).or_default();
        *balance = balance.saturating_add(amount);
    }

    /// Fail every movement and balance read with [`CustodyError::Unavailable`]
    /// until cleared.
    pub fn set_failure(&self, reason: Option<&str>) {
        self.inner.lock().failure = reason.map(str::to_string);
    }
}

impl Custody for MemoryCustody {
    fn lock(&self, from: Address, amount: U256) -> Result<(), CustodyError> {
        let mut inner = self.inner.lock();
        if let Some(reason) = &inner.failure {
            return Err(CustodyError::Unavailable(reason.clone()));
        }
        let balance = inner.free.get(&from).copied().unwrap_or_default();
        if balance < amount {
            return Err(CustodyError::InsufficientFunds {
                address: from,
                balance,
                requested: amount,
            });
        }
        inner.free.insert(from, balance - amount);
        inner.escrowed += amount;
        Ok(())
    }

    fn release(&self, to: Address, amount: U256) -> Result<(), CustodyError> {
        let mut inner = self.inner.lock();
        if let Some(reason) = &inner.failure {
            return Err(CustodyError::Unavailable(reason.clone()));
        }
        if inner.escrowed < amount {
            return Err(CustodyError::EscrowShortfall {
                escrowed: inner.escrowed,
                requested: amount,
            });
        }
        inner.escrowed -= amount;
        let balance = inner.free.entry(to).or_default();
        *balance = balance.saturating_add(amount);
        Ok(())
    }

    fn balance_of(&self, address: Address) -> Result<U256, CustodyError> {
        let inner = self.inner.lock();
        if let Some(reason) = &inner.failure {
            return Err(CustodyError::Unavailable(reason.clone()));
        }
        Ok(inner.free.get(&address).copied().unwrap_or_default())
    }

    fn escrowed(&self) -> U256 {
        self.inner.lock().escrowed
    }
}
