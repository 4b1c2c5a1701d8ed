use std::net::SocketAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use vela_primitives::PeerKey;

use crate::PeerError;

/// A tunnel peer and its traffic counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub public_key: PeerKey,
    pub allowed_ips: Vec<IpNet>,
    pub endpoint: Option<SocketAddr>,
    /// Unix seconds of the last add or counter update.
    pub last_seen: u64,
    pub bytes_rx: u64,
    pub bytes_tx: u64,
    pub is_active: bool,
}

impl Peer {
    pub fn new(public_key: PeerKey, allowed_ips: Vec<IpNet>, endpoint: Option<SocketAddr>, now: u64) -> Self {
        Self {
            public_key,
            allowed_ips,
            endpoint,
            last_seen: now,
            bytes_rx: 0,
            bytes_tx: 0,
            is_active: true,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_rx.saturating_add(self.bytes_tx)
    }
}

/// Parse a tunnel key as submitted by a client.
pub fn parse_peer_key(key: &str) -> Result<PeerKey, PeerError> {
    key.parse().map_err(|source| PeerError::InvalidKey {
        key: key.to_string(),
        source,
    })
}

/// Parse every allowed ip; the first invalid entry fails the whole list.
pub fn parse_allowed_ips<S: AsRef<str>>(values: &[S]) -> Result<Vec<IpNet>, PeerError> {
    values
        .iter()
        .map(|value| {
            let value = value.as_ref();
            value.parse().map_err(|source| PeerError::InvalidAllowedIp {
                value: value.to_string(),
                source,
            })
        })
        .collect()
}
