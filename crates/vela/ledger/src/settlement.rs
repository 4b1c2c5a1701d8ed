//! Idempotent application of payment tickets.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::Mutex;
use tracing::{debug, info};
use vela_primitives::{PaymentId, PaymentTicket};

use crate::{LedgerArgs, LedgerError, LedgerResult, NodeRegistry, basis_points};

/// What [`SettlementCoordinator::process_payment`] did with a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The ticket was applied: `fee` went to the pool, `net` to the node.
    Applied { id: PaymentId, fee: U256, net: U256 },
    /// The ticket had already been applied; nothing changed.
    Duplicate { id: PaymentId },
}

impl PaymentOutcome {
    pub const fn id(&self) -> PaymentId {
        match self {
            Self::Applied { id, .. } | Self::Duplicate { id } => *id,
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Duplicate { .. } => "duplicate",
        }
    }
}

/// Record of an applied ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedPayment {
    pub recipient: Address,
    pub net: U256,
    pub fee: U256,
}

/// Applies payment tickets exactly once, splitting each into protocol fee and
/// node earnings.
#[derive(Debug)]
pub struct SettlementCoordinator {
    processed: DashMap<PaymentId, AppliedPayment>,
    fee_pool: Mutex<U256>,
    registry: Arc<NodeRegistry>,
    fee_bps: u16,
    min_payment: U256,
}

impl SettlementCoordinator {
    pub fn new(registry: Arc<NodeRegistry>, args: &LedgerArgs) -> Self {
        Self {
            processed: DashMap::new(),
            fee_pool: Mutex::new(U256::ZERO),
            registry,
            fee_bps: args.fee_bps,
            min_payment: args.min_payment,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Apply `ticket` unless its id was seen before.
    ///
    /// A ticket that fails validation or crediting is not marked, so it can be
    /// submitted again. Concurrent submissions of one ticket are serialized:
    /// a caller only sees [`PaymentOutcome::Duplicate`] once the ticket has
    /// actually been applied.
    pub fn process_payment(&self, ticket: &PaymentTicket) -> LedgerResult<PaymentOutcome> {
        let result = self.apply(ticket);
        let outcome = match &result {
            Ok(outcome) => outcome.label(),
            Err(err) => err.kind().as_str(),
        };
        metrics::counter!("vela_settlement_payments_total", "outcome" => outcome).increment(1);
        result
    }

    fn apply(&self, ticket: &PaymentTicket) -> LedgerResult<PaymentOutcome> {
        let id = ticket.id();
        // The entry stays locked until the ticket is applied or rejected, so a
        // concurrent duplicate waits and then sees the final result.
        let slot = match self.processed.entry(id) {
            Entry::Occupied(_) => {
                debug!(%id, "payment already processed");
                return Ok(PaymentOutcome::Duplicate { id });
            }
            Entry::Vacant(slot) => slot,
        };

        if ticket.amount < self.min_payment {
            return Err(LedgerError::BelowMinimumPayment {
                amount: ticket.amount,
                min_payment: self.min_payment,
            });
        }
        let recipient = ticket.recipient;
        match self.registry.get(&recipient) {
            None => return Err(LedgerError::NodeNotFound(recipient)),
            Some(account) if !account.is_active => return Err(LedgerError::NodeNotActive(recipient)),
            Some(_) => {}
        }

        let fee = basis_points(ticket.amount, self.fee_bps);
        let net = ticket.amount - fee;

        self.registry.credit_earnings(recipient, net, ticket.bandwidth)?;
        {
            let mut pool = self.fee_pool.lock();
            *pool = pool.saturating_add(fee);
        }
        slot.insert(AppliedPayment {
            recipient,
            net,
            fee,
        });

        info!(%id, %recipient, %fee, %net, bandwidth = ticket.bandwidth, "payment applied");
        Ok(PaymentOutcome::Applied { id, fee, net })
    }

    /// Protocol fees collected so far.
    pub fn fee_pool(&self) -> U256 {
        *self.fee_pool.lock()
    }

    pub fn is_processed(&self, id: &PaymentId) -> bool {
        self.processed.contains_key(id)
    }

    /// What an applied ticket paid out.
    pub fn payment(&self, id: &PaymentId) -> Option<AppliedPayment> {
        self.processed.get(id).map(|entry| *entry)
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryCustody;
    use alloy_primitives::Bytes;
    use std::sync::Barrier;
    use assert_matches::assert_matches;
    use vela_primitives::{ErrorKind, ManualClock};

    const PAYER: Address = Address::repeat_byte(0x01);
    const NODE: Address = Address::repeat_byte(0x0d);

    fn coordinator() -> SettlementCoordinator {
        let custody = Arc::new(MemoryCustody::new());
        custody.deposit(NODE, U256::from(10_000));
        let args = LedgerArgs {
            min_stake: U256::from(1_000),
            min_payment: U256::from(1_000),
            fee_bps: 100,
            ..Default::default()
        };
        let registry = Arc::new(NodeRegistry::with_clock(
            custody,
            &args,
            Arc::new(ManualClock::new(500)),
        ));
        registry.register_node(NODE, String::new(), U256::from(1_000)).unwrap();
        SettlementCoordinator::new(registry, &args)
    }

    fn ticket(amount: u64, timestamp: u64) -> PaymentTicket {
        PaymentTicket {
            sender: PAYER,
            recipient: NODE,
            amount: U256::from(amount),
            bandwidth: 2048,
            timestamp,
            signature: Bytes::new(),
        }
    }

    #[test]
    fn test_payment_applied_once() {
        let coordinator = coordinator();
        let ticket = ticket(10_000, 1_700_000_000);

        let outcome = coordinator.process_payment(&ticket).unwrap();
        assert_eq!(
            outcome,
            PaymentOutcome::Applied {
                id: ticket.id(),
                fee: U256::from(100),
                net: U256::from(9_900),
            }
        );
        assert!(coordinator.is_processed(&ticket.id()));
        assert_eq!(
            coordinator.payment(&ticket.id()),
            Some(AppliedPayment {
                recipient: NODE,
                net: U256::from(9_900),
                fee: U256::from(100),
            })
        );

        let outcome = coordinator.process_payment(&ticket).unwrap();
        assert_eq!(outcome, PaymentOutcome::Duplicate { id: ticket.id() });

        let account = coordinator.registry().get(&NODE).unwrap();
        assert_eq!(account.total_earnings, U256::from(9_900));
        assert_eq!(account.total_bandwidth_provided, 2048);
        assert_eq!(coordinator.fee_pool(), U256::from(100));
        assert_eq!(coordinator.processed_count(), 1);
    }

    #[test]
    fn test_distinct_timestamps_are_distinct_payments() {
        let coordinator = coordinator();
        coordinator.process_payment(&ticket(10_000, 1)).unwrap();
        coordinator.process_payment(&ticket(10_000, 2)).unwrap();
        assert_eq!(coordinator.fee_pool(), U256::from(200));
    }

    #[test]
    fn test_below_minimum_not_marked() {
        let coordinator = coordinator();
        let ticket = ticket(999, 1);
        let err = coordinator.process_payment(&ticket).unwrap_err();
        assert_matches!(err, LedgerError::BelowMinimumPayment { .. });
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(!coordinator.is_processed(&ticket.id()));
    }

    #[test]
    fn test_inactive_recipient_rolls_back() {
        let coordinator = coordinator();
        coordinator.registry().unregister_node(NODE).unwrap();

        let ticket = ticket(10_000, 1);
        let err = coordinator.process_payment(&ticket).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(!coordinator.is_processed(&ticket.id()));
        assert_eq!(coordinator.fee_pool(), U256::ZERO);

        let mut stranger = ticket.clone();
        stranger.recipient = Address::repeat_byte(0xee);
        assert_eq!(
            coordinator.process_payment(&stranger).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_concurrent_duplicates_apply_once() {
        let coordinator = Arc::new(coordinator());
        let ticket = ticket(10_000, 42);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = coordinator.clone();
                let ticket = ticket.clone();
                std::thread::spawn(move || coordinator.process_payment(&ticket).unwrap())
            })
            .collect();
        let applied = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|outcome| matches!(outcome, PaymentOutcome::Applied { .. }))
            .count();

        assert_eq!(applied, 1);
        let account = coordinator.registry().get(&NODE).unwrap();
        assert_eq!(account.total_earnings, U256::from(9_900));
    }

    #[test]
    fn test_duplicate_never_reported_for_failed_credit() {
        for _ in 0..50 {
            let coordinator = Arc::new(coordinator());
            let ticket = ticket(10_000, 7);
            let barrier = Arc::new(Barrier::new(5));

            let submitters: Vec<_> = (0..4)
                .map(|_| {
                    let coordinator = coordinator.clone();
                    let ticket = ticket.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        coordinator.process_payment(&ticket)
                    })
                })
                .collect();
            let unregister = {
                let coordinator = coordinator.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    coordinator.registry().unregister_node(NODE).unwrap();
                })
            };

            unregister.join().unwrap();
            let results: Vec<_> = submitters.into_iter().map(|h| h.join().unwrap()).collect();
            let applied = results
                .iter()
                .filter(|r| matches!(r, Ok(PaymentOutcome::Applied { .. })))
                .count();
            let duplicates = results
                .iter()
                .filter(|r| matches!(r, Ok(PaymentOutcome::Duplicate { .. })))
                .count();
            let earnings = coordinator.registry().get(&NODE).unwrap().total_earnings;

            assert!(applied <= 1);
            if duplicates > 0 {
                assert_eq!(applied, 1);
            }
            assert_eq!(coordinator.is_processed(&ticket.id()), applied == 1);
            let expected = if applied == 1 { U256::from(9_900) } else { U256::ZERO };
            assert_eq!(earnings, expected);
        }
    }
}
