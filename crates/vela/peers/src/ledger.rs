//! The peer table.

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use ipnet::IpNet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use vela_primitives::{Clock, PeerKey, SystemClock};

use crate::{Peer, PeerError, PeerEvent, PeerEvents, PeerResult, parse_allowed_ips, parse_peer_key};

/// Peer counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStats {
    pub total: usize,
    pub connected: usize,
    pub disconnected: usize,
}

/// Summed traffic counters of every peer in the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BandwidthTotals {
    pub rx: u64,
    pub tx: u64,
}

impl BandwidthTotals {
    pub fn total(&self) -> u64 {
        self.rx.saturating_add(self.tx)
    }
}

/// Authoritative table of tunnel peers.
///
/// Readers run concurrently; every mutation takes the table write lock.
/// Events are emitted after the lock is released.
pub struct PeerLedger {
    peers: RwLock<HashMap<PeerKey, Peer>>,
    events: PeerEvents,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for PeerLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLedger")
            .field("peers", &self.peers.read().len())
            .finish_non_exhaustive()
    }
}

impl Default for PeerLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerLedger {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            events: PeerEvents::default(),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Lifecycle event emitter of this table.
    pub fn events(&self) -> &PeerEvents {
        &self.events
    }

    /// Validate and insert a peer.
    ///
    /// Nothing is mutated unless the key and every allowed ip are valid.
    pub fn add_peer<S: AsRef<str>>(
        &self,
        public_key: &str,
        allowed_ips: &[S],
        endpoint: Option<SocketAddr>,
    ) -> PeerResult<Peer> {
        let key = parse_peer_key(public_key)?;
        let allowed_ips = parse_allowed_ips(allowed_ips)?;
        Ok(self.insert(key, allowed_ips, endpoint))
    }

    /// Insert an already validated peer.
    ///
    /// An existing entry gets the new allowed ips and endpoint, is marked active,
    /// and keeps its counters.
    pub fn insert(&self, key: PeerKey, allowed_ips: Vec<IpNet>, endpoint: Option<SocketAddr>) -> Peer {
        let now = self.clock.now();
        let peer = {
            let mut peers = self.peers.write();
            let peer = peers
                .entry(key)
                .and_modify(|peer| {
                    peer.allowed_ips = allowed_ips.clone();
                    peer.endpoint = endpoint;
                    peer.last_seen = now;
                    peer.is_active = true;
                })
                .or_insert_with(|| Peer::new(key, allowed_ips.clone(), endpoint, now));
            peer.clone()
        };

        debug!(peer = %key, allowed_ips = ?peer.allowed_ips, "peer added");
        self.events.emit(PeerEvent::Added { key, allowed_ips });
        peer
    }

    /// Remove a peer. Unknown keys succeed with `None`.
    pub fn remove_peer(&self, key: &PeerKey) -> Option<Peer> {
        let removed = self.peers.write().remove(key);
        if removed.is_some() {
            debug!(peer = %key, "peer removed");
            self.events.emit(PeerEvent::Removed { key: *key });
        }
        removed
    }

    pub fn get(&self, key: &PeerKey) -> Option<Peer> {
        self.peers.read().get(key).cloned()
    }

    pub fn contains(&self, key: &PeerKey) -> bool {
        self.peers.read().contains_key(key)
    }

    /// Snapshot of every peer, ordered by key.
    pub fn list(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.read().values().cloned().collect();
        peers.sort_by(|a, b| a.public_key.cmp(&b.public_key));
        peers
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Add transfer deltas, refresh `last_seen` and set the activity flag.
    ///
    /// Returns `false` if the peer is not in the table.
    pub fn update_stats(&self, key: &PeerKey, rx_delta: u64, tx_delta: u64, active: bool) -> bool {
        let now = self.clock.now();
        let changed = {
            let mut peers = self.peers.write();
            let Some(peer) = peers.get_mut(key) else {
                return false;
            };
            peer.bytes_rx = peer.bytes_rx.saturating_add(rx_delta);
            peer.bytes_tx = peer.bytes_tx.saturating_add(tx_delta);
            peer.last_seen = now;
            std::mem::replace(&mut peer.is_active, active) != active
        };

        trace!(peer = %key, rx_delta, tx_delta, active, "peer stats updated");
        if changed {
            self.events.emit(PeerEvent::StatusChanged { key: *key, active });
        }
        true
    }

    /// Set the activity flag without touching counters.
    ///
    /// Returns whether the flag changed.
    pub fn set_active(&self, key: &PeerKey, active: bool) -> PeerResult<bool> {
        let changed = {
            let mut peers = self.peers.write();
            let peer = peers.get_mut(key).ok_or(PeerError::NotFound(*key))?;
            std::mem::replace(&mut peer.is_active, active) != active
        };
        if changed {
            debug!(peer = %key, active, "peer status changed");
            self.events.emit(PeerEvent::StatusChanged { key: *key, active });
        }
        Ok(changed)
    }

    /// Mark active peers not seen since `cutoff` inactive.
    pub fn mark_stale(&self, cutoff: u64) -> Vec<PeerKey> {
        let stale: Vec<PeerKey> = {
            let mut peers = self.peers.write();
            peers
                .values_mut()
                .filter(|peer| peer.is_active && peer.last_seen < cutoff)
                .map(|peer| {
                    peer.is_active = false;
                    peer.public_key
                })
                .collect()
        };
        for key in &stale {
            debug!(peer = %key, "peer went stale");
            self.events.emit(PeerEvent::StatusChanged { key: *key, active: false });
        }
        stale
    }

    /// Put back a peer rebuilt from tunnel state, replacing any entry.
    pub fn restore(&self, peer: Peer) {
        let key = peer.public_key;
        let allowed_ips = peer.allowed_ips.clone();
        self.peers.write().insert(key, peer);
        debug!(peer = %key, "peer restored");
        self.events.emit(PeerEvent::Added { key, allowed_ips });
    }

    pub fn stats(&self) -> PeerStats {
        let peers = self.peers.read();
        let connected = peers.values().filter(|p| p.is_active).count();
        PeerStats {
            total: peers.len(),
            connected,
            disconnected: peers.len() - connected,
        }
    }

    pub fn total_bandwidth(&self) -> BandwidthTotals {
        self.peers
            .read()
            .values()
            .fold(BandwidthTotals::default(), |acc, peer| BandwidthTotals {
                rx: acc.rx.saturating_add(peer.bytes_rx),
                tx: acc.tx.saturating_add(peer.bytes_tx),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use vela_primitives::{ErrorKind, ManualClock};

    const KEY: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";
    const OTHER: &str = "TrMvSoP4jYQlY6RIzBgbssQqY3vxI2Pi+y71lOWWXX0=";

    fn ledger() -> (PeerLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        (PeerLedger::with_clock(clock.clone()), clock)
    }

    fn key(s: &str) -> PeerKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_invalid_key_leaves_table_untouched() {
        let (ledger, _) = ledger();
        let mut rx = ledger.events().subscribe();

        let err = ledger
            .add_peer("not-a-valid-key", &["10.0.0.2/32"], None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidKeyFormat);
        assert!(ledger.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_one_bad_cidr_aborts_add() {
        let (ledger, _) = ledger();
        let err = ledger
            .add_peer(KEY, &["10.0.0.2/32", "garbage"], None)
            .unwrap_err();
        assert_matches!(err, PeerError::InvalidAllowedIp { .. });
        assert!(ledger.get(&key(KEY)).is_none());
    }

    #[test]
    fn test_readd_keeps_counters() {
        let (ledger, clock) = ledger();
        ledger.add_peer(KEY, &["10.0.0.2/32"], None).unwrap();
        assert!(ledger.update_stats(&key(KEY), 100, 40, true));

        clock.advance(10);
        let endpoint = Some("203.0.113.9:51820".parse().unwrap());
        let peer = ledger.add_peer(KEY, &["10.0.0.3/32"], endpoint).unwrap();

        assert_eq!((peer.bytes_rx, peer.bytes_tx), (100, 40));
        assert_eq!(peer.allowed_ips, vec!["10.0.0.3/32".parse::<IpNet>().unwrap()]);
        assert_eq!(peer.endpoint, endpoint);
        assert_eq!(peer.last_seen, 1_010);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (ledger, _) = ledger();
        ledger.add_peer(KEY, &["10.0.0.2/32"], None).unwrap();
        assert!(ledger.remove_peer(&key(KEY)).is_some());
        assert!(ledger.remove_peer(&key(KEY)).is_none());
    }

    #[test]
    fn test_update_stats_unknown_peer() {
        let (ledger, _) = ledger();
        assert!(!ledger.update_stats(&key(KEY), 1, 1, true));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_update_stats_accumulates() {
        let (ledger, clock) = ledger();
        ledger.add_peer(KEY, &["10.0.0.2/32"], None).unwrap();
        clock.advance(30);
        ledger.update_stats(&key(KEY), 10, 20, true);
        ledger.update_stats(&key(KEY), 5, 0, true);

        let peer = ledger.get(&key(KEY)).unwrap();
        assert_eq!((peer.bytes_rx, peer.bytes_tx), (15, 20));
        assert_eq!(peer.last_seen, 1_030);
    }

    #[tokio::test]
    async fn test_events() {
        let (ledger, _) = ledger();
        let mut rx = ledger.events().subscribe();

        ledger.add_peer(KEY, &["10.0.0.2/32"], None).unwrap();
        ledger.set_active(&key(KEY), false).unwrap();
        // unchanged flag emits nothing
        ledger.set_active(&key(KEY), false).unwrap();
        ledger.remove_peer(&key(KEY));

        assert_matches!(rx.recv().await.unwrap(), PeerEvent::Added { .. });
        assert_eq!(
            rx.recv().await.unwrap(),
            PeerEvent::StatusChanged { key: key(KEY), active: false }
        );
        assert_eq!(rx.recv().await.unwrap(), PeerEvent::Removed { key: key(KEY) });
    }

    #[test]
    fn test_set_active_unknown() {
        let (ledger, _) = ledger();
        assert_matches!(ledger.set_active(&key(KEY), true), Err(PeerError::NotFound(_)));
    }

    #[test]
    fn test_stats_and_totals() {
        let (ledger, _) = ledger();
        ledger.add_peer(KEY, &["10.0.0.2/32"], None).unwrap();
        ledger.add_peer(OTHER, &["10.0.0.3/32"], None).unwrap();
        ledger.update_stats(&key(KEY), 100, 1, true);
        ledger.update_stats(&key(OTHER), 50, 2, true);
        ledger.set_active(&key(OTHER), false).unwrap();

        assert_eq!(
            ledger.stats(),
            PeerStats { total: 2, connected: 1, disconnected: 1 }
        );
        let totals = ledger.total_bandwidth();
        assert_eq!((totals.rx, totals.tx, totals.total()), (150, 3, 153));
    }

    #[test]
    fn test_mark_stale() {
        let (ledger, clock) = ledger();
        ledger.add_peer(KEY, &["10.0.0.2/32"], None).unwrap();
        clock.advance(100);
        ledger.add_peer(OTHER, &["10.0.0.3/32"], None).unwrap();

        let stale = ledger.mark_stale(1_050);
        assert_eq!(stale, vec![key(KEY)]);
        assert!(!ledger.get(&key(KEY)).unwrap().is_active);
        assert!(ledger.get(&key(OTHER)).unwrap().is_active);
        assert!(ledger.mark_stale(1_050).is_empty());
    }

    #[test]
    fn test_restore() {
        let (ledger, _) = ledger();
        let mut peer = Peer::new(key(KEY), vec![], None, 5);
        peer.bytes_rx = 999;
        ledger.restore(peer.clone());
        assert_eq!(ledger.get(&key(KEY)), Some(peer));
        assert_eq!(ledger.list().len(), 1);
    }
}
