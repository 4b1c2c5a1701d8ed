//! Usage recorded since the last acknowledged report.

use std::collections::HashMap;

use parking_lot::Mutex;
use vela_primitives::PeerKey;

/// A point-in-time copy of the accumulator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageSnapshot {
    /// Bytes across all peers.
    pub total: u64,
    /// Bytes per peer.
    pub per_peer: HashMap<PeerKey, u64>,
}

impl UsageSnapshot {
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// Running usage totals, global and per peer.
///
/// Totals only shrink through [`drain`](Self::drain), which subtracts a
/// previously taken snapshot, so usage recorded after the snapshot survives.
#[derive(Debug, Default)]
pub struct UsageAccumulator {
    inner: Mutex<UsageSnapshot>,
}

impl UsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: PeerKey, bytes: u64) {
        if bytes == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        inner.total = inner.total.saturating_add(bytes);
        let peer = inner.per_peer.entry(key).or_default();
        *peer = peer.saturating_add(bytes);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        self.inner.lock().clone()
    }

    /// Subtract `reported` from the running totals.
    pub fn drain(&self, reported: &UsageSnapshot) {
        let mut inner = self.inner.lock();
        inner.total = inner.total.saturating_sub(reported.total);
        for (key, bytes) in &reported.per_peer {
            if let Some(peer) = inner.per_peer.get_mut(key) {
                *peer = peer.saturating_sub(*bytes);
                if *peer == 0 {
                    inner.per_peer.remove(key);
                }
            }
        }
    }

    pub fn total(&self) -> u64 {
        self.inner.lock().total
    }

    pub fn peer(&self, key: &PeerKey) -> u64 {
        self.inner.lock().per_peer.get(key).copied().unwrap_or_default()
    }
}
