//! Bandwidth metering and usage reporting.
//!
//! [`BandwidthMeter`] polls the tunnel for cumulative per-peer counters and
//! feeds the deltas into the peer table and a [`UsageAccumulator`].
//! [`UsageReporter`] turns the accumulated usage into signed reports for the
//! settlement ledger.

mod accumulator;
mod args;
mod error;
mod meter;
mod reporter;

pub use accumulator::{UsageAccumulator, UsageSnapshot};
pub use args::{
    DEFAULT_METER_INTERVAL_SECS, DEFAULT_METER_TIMEOUT_SECS, DEFAULT_REPORT_INTERVAL_SECS,
    DEFAULT_SUBMIT_TIMEOUT_SECS, MeterArgs, ReportArgs,
};
pub use error::{MeterError, ReportError};
pub use meter::{BandwidthMeter, TickSummary, counter_delta};
pub use reporter::{ReportSigner, UsageReporter};
