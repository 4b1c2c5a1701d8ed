//! Keeps the peer table and the tunnel interface in step.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tracing::{info, warn};
use vela_tunnel::{PeerConfig, PeerCounters, TunnelControl, TunnelError};

use crate::{Peer, PeerError, PeerLedger, PeerResult, parse_allowed_ips, parse_peer_key};

/// Connect, disconnect and remove peers.
///
/// Requests are validated before the tunnel is touched, and the table is only
/// changed after the tunnel call succeeded.
#[derive(Clone)]
pub struct PeerService {
    ledger: Arc<PeerLedger>,
    tunnel: Arc<dyn TunnelControl>,
    timeout: Duration,
    keepalive: Option<u16>,
}

impl std::fmt::Debug for PeerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerService")
            .field("ledger", &self.ledger)
            .field("timeout", &self.timeout)
            .field("keepalive", &self.keepalive)
            .finish_non_exhaustive()
    }
}

impl PeerService {
    pub fn new(ledger: Arc<PeerLedger>, tunnel: Arc<dyn TunnelControl>, timeout: Duration) -> Self {
        Self {
            ledger,
            tunnel,
            timeout,
            keepalive: None,
        }
    }

    /// Persistent keepalive applied to connected peers.
    pub fn with_keepalive(mut self, keepalive: Option<u16>) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn ledger(&self) -> &Arc<PeerLedger> {
        &self.ledger
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, TunnelError>>,
    ) -> PeerResult<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| TunnelError::Timeout(self.timeout))?
            .map_err(PeerError::from)
    }

    /// Install a peer on the tunnel and record it.
    pub async fn connect<S: AsRef<str>>(
        &self,
        public_key: &str,
        allowed_ips: &[S],
        endpoint: Option<SocketAddr>,
    ) -> PeerResult<Peer> {
        let key = parse_peer_key(public_key)?;
        let allowed_ips = parse_allowed_ips(allowed_ips)?;

        let config = PeerConfig::new(key, allowed_ips.clone())
            .with_endpoint(endpoint)
            .with_keepalive(self.keepalive);
        self.bounded(self.tunnel.add_peer(&config)).await?;

        let peer = self.ledger.insert(key, allowed_ips, endpoint);
        info!(peer = %key, "peer connected");
        Ok(peer)
    }

    /// Take a peer off the tunnel but keep its record and counters.
    pub async fn disconnect(&self, public_key: &str) -> PeerResult<Peer> {
        let key = parse_peer_key(public_key)?;
        if !self.ledger.contains(&key) {
            return Err(PeerError::NotFound(key));
        }

        self.bounded(self.tunnel.remove_peer(&key)).await?;
        self.ledger.set_active(&key, false)?;
        info!(peer = %key, "peer disconnected");
        self.ledger.get(&key).ok_or(PeerError::NotFound(key))
    }

    /// Take a peer off the tunnel and forget it. Unknown peers succeed.
    pub async fn remove(&self, public_key: &str) -> PeerResult<Option<Peer>> {
        let key = parse_peer_key(public_key)?;
        self.bounded(self.tunnel.remove_peer(&key)).await?;

        let removed = self.ledger.remove_peer(&key);
        if removed.is_some() {
            info!(peer = %key, "peer removed");
        }
        Ok(removed)
    }

    /// Rebuild the table from the peers currently on the tunnel.
    ///
    /// Restored peers start with the tunnel's cumulative counters. Returns
    /// the counters so the meter can use them as its baseline.
    pub async fn restore_from_tunnel(&self) -> PeerResult<Vec<PeerCounters>> {
        let counters = self.bounded(self.tunnel.list_peers()).await?;
        let mut restored = 0usize;
        for c in &counters {
            if self.ledger.contains(&c.key) {
                continue;
            }
            let mut peer = Peer::new(c.key, Vec::new(), None, self.ledger.clock().now());
            peer.bytes_rx = c.rx;
            peer.bytes_tx = c.tx;
            self.ledger.restore(peer);
            restored += 1;
        }
        if restored > 0 {
            info!(restored, "restored peers from tunnel");
        } else if counters.is_empty() {
            warn!("tunnel reports no peers");
        }
        Ok(counters)
    }
}
