//! Tunnel peer tracking.
//!
//! [`PeerLedger`] is the authoritative table of peers and their transfer
//! counters. [`PeerService`] keeps the ledger and the tunnel interface in step
//! for connect, disconnect and remove requests. Lifecycle changes are
//! broadcast as [`PeerEvent`]s.

mod error;
mod events;
mod ledger;
mod peer;
mod service;

pub use error::{PeerError, PeerResult};
pub use events::{PeerEvent, PeerEvents};
pub use ledger::{BandwidthTotals, PeerLedger, PeerStats};
pub use peer::{Peer, parse_allowed_ips, parse_peer_key};
pub use service::PeerService;
