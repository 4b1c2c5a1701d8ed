//! Node stake accounts.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vela_primitives::{Clock, SystemClock};

use crate::{Custody, LedgerArgs, LedgerError, LedgerResult};

/// Reputation of a freshly registered node.
pub const MAX_REPUTATION: u8 = 100;

/// Stake and bookkeeping of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAccount {
    pub owner: Address,
    pub metadata: String,
    pub stake: U256,
    /// In `0..=100`.
    pub reputation: u8,
    pub last_active: u64,
    pub is_active: bool,
    pub total_bandwidth_provided: u64,
    pub total_earnings: U256,
}

/// Result of a slash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlashOutcome {
    /// Stake actually taken.
    pub slashed: U256,
    pub stake: U256,
    pub reputation: u8,
}

/// Node accounts, one lock per node.
///
/// Registration holds the map entry while it escrows, so a failed escrow
/// leaves no record behind.
pub struct NodeRegistry {
    nodes: DashMap<Address, Arc<Mutex<NodeAccount>>>,
    custody: Arc<dyn Custody>,
    clock: Arc<dyn Clock>,
    min_stake: U256,
    slash_amount: U256,
    reputation_penalty: u8,
    slashed_total: Mutex<U256>,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("nodes", &self.nodes.len())
            .field("min_stake", &self.min_stake)
            .field("slash_amount", &self.slash_amount)
            .finish_non_exhaustive()
    }
}

impl NodeRegistry {
    pub fn new(custody: Arc<dyn Custody>, args: &LedgerArgs) -> Self {
        Self::with_clock(custody, args, Arc::new(SystemClock))
    }

    pub fn with_clock(custody: Arc<dyn Custody>, args: &LedgerArgs, clock: Arc<dyn Clock>) -> Self {
        Self {
            nodes: DashMap::new(),
            custody,
            clock,
            min_stake: args.min_stake,
            slash_amount: args.slash_amount,
            reputation_penalty: args.reputation_penalty,
            slashed_total: Mutex::new(U256::ZERO),
        }
    }

    fn node(&self, owner: &Address) -> LedgerResult<Arc<Mutex<NodeAccount>>> {
        self.nodes
            .get(owner)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::NodeNotFound(*owner))
    }

    /// Register a node, escrowing its stake.
    ///
    /// A previously unregistered node may register again; its earnings and
    /// bandwidth totals carry over.
    pub fn register_node(&self, owner: Address, metadata: String, stake: U256) -> LedgerResult<NodeAccount> {
        if stake < self.min_stake {
            return Err(LedgerError::InsufficientStake {
                stake,
                min_stake: self.min_stake,
            });
        }
        let now = self.clock.now();

        let account = match self.nodes.entry(owner) {
            Entry::Occupied(entry) => {
                let mut account = entry.get().lock();
                if account.is_active {
                    return Err(LedgerError::AlreadyRegistered(owner));
                }
                self.custody.lock(owner, stake)?;
                account.metadata = metadata;
                account.stake = stake;
                account.reputation = MAX_REPUTATION;
                account.last_active = now;
                account.is_active = true;
                account.clone()
            }
            Entry::Vacant(slot) => {
                self.custody.lock(owner, stake)?;
                let account = NodeAccount {
                    owner,
                    metadata,
                    stake,
                    reputation: MAX_REPUTATION,
                    last_active: now,
                    is_active: true,
                    total_bandwidth_provided: 0,
                    total_earnings: U256::ZERO,
                };
                slot.insert(Arc::new(Mutex::new(account.clone())));
                account
            }
        };

        info!(%owner, %stake, "node registered");
        Ok(account)
    }

    /// Deactivate a node and refund its remaining stake.
    pub fn unregister_node(&self, owner: Address) -> LedgerResult<U256> {
        let node = self.node(&owner)?;
        let mut account = node.lock();
        if !account.is_active {
            return Err(LedgerError::NodeNotActive(owner));
        }

        let refund = account.stake;
        self.custody.release(owner, refund)?;
        account.stake = U256::ZERO;
        account.is_active = false;
        info!(%owner, %refund, "node unregistered");
        Ok(refund)
    }

    /// Take up to `slash_amount` of stake and `reputation_penalty` reputation.
    ///
    /// Both are clamped at zero. Slashed stake stays in escrow. Only an active
    /// registration can be slashed.
    pub fn slash_node(&self, owner: Address, reason: &str) -> LedgerResult<SlashOutcome> {
        let node = self.node(&owner)?;
        let mut account = node.lock();
        if !account.is_active {
            return Err(LedgerError::NodeNotActive(owner));
        }

        let slashed = self.slash_amount.min(account.stake);
        account.stake -= slashed;
        account.reputation = account.reputation.saturating_sub(self.reputation_penalty);
        *self.slashed_total.lock() += slashed;

        warn!(
            %owner,
            %slashed,
            stake = %account.stake,
            reputation = account.reputation,
            reason,
            "node slashed"
        );
        Ok(SlashOutcome {
            slashed,
            stake: account.stake,
            reputation: account.reputation,
        })
    }

    /// Add settled earnings and bandwidth to an active node.
    pub fn credit_earnings(&self, owner: Address, amount: U256, bandwidth: u64) -> LedgerResult<NodeAccount> {
        let node = self.node(&owner)?;
        let mut account = node.lock();
        if !account.is_active {
            return Err(LedgerError::NodeNotActive(owner));
        }

        account.total_earnings = account.total_earnings.saturating_add(amount);
        account.total_bandwidth_provided = account.total_bandwidth_provided.saturating_add(bandwidth);
        account.last_active = self.clock.now();
        debug!(%owner, %amount, bandwidth, "earnings credited");
        Ok(account.clone())
    }

    /// Refresh `last_active` of an active node.
    pub fn heartbeat(&self, owner: Address) -> LedgerResult<()> {
        let node = self.node(&owner)?;
        let mut account = node.lock();
        if !account.is_active {
            return Err(LedgerError::NodeNotActive(owner));
        }
        account.last_active = self.clock.now();
        Ok(())
    }

    pub fn get(&self, owner: &Address) -> Option<NodeAccount> {
        let node = self.nodes.get(owner).map(|entry| Arc::clone(entry.value()))?;
        let account = node.lock().clone();
        Some(account)
    }

    pub fn is_active(&self, owner: &Address) -> bool {
        self.get(owner).is_some_and(|account| account.is_active)
    }

    /// Stake taken by slashing so far.
    pub fn slashed_total(&self) -> U256 {
        *self.slashed_total.lock()
    }

    pub fn min_stake(&self) -> U256 {
        self.min_stake
    }
}
