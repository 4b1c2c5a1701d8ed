//! The interface between a node and the settlement ledger.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vela_primitives::{Clock, PaymentId, PaymentTicket, SystemClock, UsageReport};

use crate::{
    Custody, LedgerArgs, LedgerError, LedgerResult, MemoryCustody, NodeAccount, NodeRegistry,
    PaymentOutcome, SettlementCoordinator, Stream, StreamId, StreamLedger,
};

/// Acknowledgement of an accepted usage report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportAck {
    pub payment_id: PaymentId,
    /// Gross amount of the resulting payment.
    pub amount: U256,
    pub bandwidth: u64,
    /// The same report had been settled before.
    pub duplicate: bool,
}

/// Reads and writes against the settlement ledger.
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    /// Free token balance of `address`.
    async fn get_balance(&self, address: Address) -> LedgerResult<U256>;

    /// Submit a signed usage report for settlement.
    async fn submit_usage_report(&self, report: &UsageReport) -> LedgerResult<ReportAck>;

    async fn submit_payment_ticket(&self, ticket: &PaymentTicket) -> LedgerResult<PaymentOutcome>;

    async fn read_stream(&self, id: StreamId) -> LedgerResult<Option<Stream>>;

    async fn read_node_account(&self, owner: Address) -> LedgerResult<Option<NodeAccount>>;
}

/// An in-process ledger.
///
/// Usage reports are verified against the EIP-712 domain of `chain_id`,
/// priced at `price_per_byte` and settled as tickets from `payer`.
pub struct LocalLedger {
    custody: Arc<dyn Custody>,
    streams: StreamLedger,
    coordinator: SettlementCoordinator,
    chain_id: u64,
    payer: Address,
    price_per_byte: U256,
}

impl std::fmt::Debug for LocalLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalLedger")
            .field("escrowed", &self.custody.escrowed())
            .field("streams", &self.streams)
            .field("coordinator", &self.coordinator)
            .field("chain_id", &self.chain_id)
            .field("payer", &self.payer)
            .finish_non_exhaustive()
    }
}

impl LocalLedger {
    /// A ledger over fresh in-memory custody and the system clock.
    pub fn from_args(args: &LedgerArgs, chain_id: u64) -> Self {
        Self::new(args, Arc::new(MemoryCustody::new()), Arc::new(SystemClock), chain_id)
    }

    pub fn new(args: &LedgerArgs, custody: Arc<dyn Custody>, clock: Arc<dyn Clock>, chain_id: u64) -> Self {
        let streams = StreamLedger::with_clock(custody.clone(), args.stream_id_policy, clock.clone());
        let registry = Arc::new(NodeRegistry::with_clock(custody.clone(), args, clock));
        let coordinator = SettlementCoordinator::new(registry, args);
        Self {
            custody,
            streams,
            coordinator,
            chain_id,
            payer: args.payer,
            price_per_byte: args.price_per_byte,
        }
    }

    pub fn custody(&self) -> &Arc<dyn Custody> {
        &self.custody
    }

    pub fn streams(&self) -> &StreamLedger {
        &self.streams
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        self.coordinator.registry()
    }

    pub fn coordinator(&self) -> &SettlementCoordinator {
        &self.coordinator
    }

    pub const fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Price `report` as a ticket from the configured payer.
    pub fn ticket_for(&self, report: &UsageReport) -> PaymentTicket {
        PaymentTicket {
            sender: self.payer,
            recipient: report.node,
            amount: self.price_per_byte.saturating_mul(U256::from(report.bandwidth)),
            bandwidth: report.bandwidth,
            timestamp: report.timestamp,
            signature: report.signature.clone(),
        }
    }
}

#[async_trait]
impl LedgerConnector for LocalLedger {
    async fn get_balance(&self, address: Address) -> LedgerResult<U256> {
        Ok(self.custody.balance_of(address)?)
    }

    async fn submit_usage_report(&self, report: &UsageReport) -> LedgerResult<ReportAck> {
        if report.bandwidth == 0 {
            return Err(LedgerError::InvalidInput("usage report without bandwidth"));
        }
        report.verify(self.chain_id)?;

        let ticket = self.ticket_for(report);
        let outcome = self.coordinator.process_payment(&ticket)?;
        debug!(node = %report.node, bandwidth = report.bandwidth, ?outcome, "usage report settled");

        Ok(ReportAck {
            payment_id: outcome.id(),
            amount: ticket.amount,
            bandwidth: ticket.bandwidth,
            duplicate: matches!(outcome, PaymentOutcome::Duplicate { .. }),
        })
    }

    async fn submit_payment_ticket(&self, ticket: &PaymentTicket) -> LedgerResult<PaymentOutcome> {
        self.coordinator.process_payment(ticket)
    }

    async fn read_stream(&self, id: StreamId) -> LedgerResult<Option<Stream>> {
        Ok(self.streams.get(&id))
    }

    async fn read_node_account(&self, owner: Address) -> LedgerResult<Option<NodeAccount>> {
        Ok(self.registry().get(&owner))
    }
}
