//! Tunnel peer control.
//!
//! The engine never speaks the tunnel protocol itself. It reads per-peer
//! transfer counters and adds or removes peer entries through
//! [`TunnelControl`], which has two implementations:
//!
//! - [`WgCommand`] drives the `wg` command-line tool;
//! - [`MemoryTunnel`] keeps everything in memory, for tests and dry runs.

use std::net::SocketAddr;

use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use vela_primitives::PeerKey;

mod args;
mod error;
mod memory;
mod wg;

pub use args::{DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_INTERFACE, DEFAULT_WG_BINARY, TunnelArgs};
pub use error::{TunnelError, TunnelResult};
pub use memory::MemoryTunnel;
pub use wg::{WgCommand, parse_dump};

/// Cumulative transfer counters for one tunnel peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCounters {
    pub key: PeerKey,
    /// Bytes received from the peer since the interface came up.
    pub rx: u64,
    /// Bytes sent to the peer since the interface came up.
    pub tx: u64,
}

/// Interface state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceStatus {
    pub up: bool,
    pub peer_count: usize,
}

/// A peer entry to install on the tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub key: PeerKey,
    pub allowed_ips: Vec<IpNet>,
    pub endpoint: Option<SocketAddr>,
    /// Persistent keepalive interval in seconds.
    pub keepalive: Option<u16>,
}

impl PeerConfig {
    pub fn new(key: PeerKey, allowed_ips: Vec<IpNet>) -> Self {
        Self {
            key,
            allowed_ips,
            endpoint: None,
            keepalive: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: Option<SocketAddr>) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_keepalive(mut self, keepalive: Option<u16>) -> Self {
        self.keepalive = keepalive;
        self
    }
}

/// Control surface of the tunnel interface.
///
/// Implementations are called from the metering task and from request
/// handlers concurrently. Callers bound every call with a timeout.
#[async_trait]
pub trait TunnelControl: Send + Sync {
    /// Cumulative counters of every peer on the interface.
    async fn list_peers(&self) -> TunnelResult<Vec<PeerCounters>>;

    /// Whether the interface is up and how many peers it carries.
    async fn interface_status(&self) -> TunnelResult<InterfaceStatus>;

    /// Install or replace a peer entry.
    async fn add_peer(&self, peer: &PeerConfig) -> TunnelResult<()>;

    /// Remove a peer entry. Removing an unknown peer succeeds.
    async fn remove_peer(&self, key: &PeerKey) -> TunnelResult<()>;

    /// Release the interface. Later calls fail with [`TunnelError::Closed`].
    async fn close(&self) -> TunnelResult<()>;
}
