//! Settlement ledger for the Vela node.
//!
//! Four tables, each owning its own synchronization:
//!
//! - [`StreamLedger`] - time-vested payment streams, one lock per stream
//! - [`NodeRegistry`] - node stake, reputation and earnings, one lock per node
//! - [`SettlementCoordinator`] - idempotent application of payment tickets
//! - [`Custody`] - where escrowed tokens actually sit
//!
//! [`LocalLedger`] bundles them behind [`LedgerConnector`], the interface the
//! node's reporting task submits usage through.

mod args;
mod connector;
mod custody;
mod error;
mod math;
mod nodes;
mod settlement;
mod streams;

pub use args::{
    DEFAULT_FEE_BPS, DEFAULT_REPUTATION_PENALTY, LedgerArgs, StreamIdPolicy, default_min_payment,
    default_min_stake, default_price_per_byte, default_slash_amount,
};
pub use connector::{LedgerConnector, LocalLedger, ReportAck};
pub use custody::{Custody, CustodyError, MemoryCustody};
pub use error::{LedgerError, LedgerResult};
pub use math::{basis_points, vested_amount};
pub use nodes::{MAX_REPUTATION, NodeAccount, NodeRegistry, SlashOutcome};
pub use settlement::{AppliedPayment, PaymentOutcome, SettlementCoordinator};
pub use streams::{Stream, StreamId, StreamLedger, StreamState};
