//! Shared types for the Vela peer and settlement engine.
//!
//! - [`PeerKey`] - validated tunnel public key (44-char padded base64)
//! - [`ErrorKind`] - error kinds every engine error maps onto
//! - [`Clock`] - time source, swappable for tests
//! - [`UsageReport`] / [`PaymentTicket`] - signed bandwidth claims and the
//!   tickets settled from them
//!
//! Token amounts are 256-bit integers; addresses and ids use the alloy types.

mod clock;
mod error;
mod key;
mod report;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorClass, ErrorKind};
pub use key::{KeyFormatError, PeerKey};
pub use report::{
    DOMAIN_NAME, DOMAIN_VERSION, PaymentId, PaymentTicket, ReportSignatureError, UsageClaim,
    UsageReport, usage_domain,
};

pub use alloy_primitives::{Address, B256, Bytes, Signature, U256};

/// Token amount in base units.
pub type Amount = U256;

/// Unix timestamp in seconds.
pub type Timestamp = u64;
