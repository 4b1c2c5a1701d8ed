//! In-memory [`TunnelControl`].

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use vela_primitives::PeerKey;

use crate::{InterfaceStatus, PeerConfig, PeerCounters, TunnelControl, TunnelError, TunnelResult};

#[derive(Debug)]
struct Entry {
    config: PeerConfig,
    rx: u64,
    tx: u64,
}

#[derive(Debug)]
struct State {
    up: bool,
    closed: bool,
    failure: Option<String>,
    list_delay: Option<Duration>,
    peers: BTreeMap<PeerKey, Entry>,
}

/// A tunnel that lives in memory.
///
/// Traffic is simulated with [`add_traffic`](Self::add_traffic) and
/// [`set_counters`](Self::set_counters); failures and slow polls can be
/// injected.
#[derive(Debug)]
pub struct MemoryTunnel {
    state: Mutex<State>,
}

impl Default for MemoryTunnel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTunnel {
    /// An interface that is up and has no peers.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                up: true,
                closed: false,
                failure: None,
                list_delay: None,
                peers: BTreeMap::new(),
            }),
        }
    }

    /// Add to a peer's cumulative counters, creating the peer if needed.
    pub fn add_traffic(&self, key: PeerKey, rx: u64, tx: u64) {
        let mut state = self.state.lock();
        let entry = state.peers.entry(key).or_insert_with(|| Entry {
            config: PeerConfig::new(key, Vec::new()),
            rx: 0,
            tx: 0,
        });
        entry.rx = entry.rx.saturating_add(rx);
        entry.tx = entry.tx.saturating_add(tx);
    }

    /// Overwrite a peer's cumulative counters, e.g. to simulate a reset.
    pub fn set_counters(&self, key: PeerKey, rx: u64, tx: u64) {
        let mut state = self.state.lock();
        let entry = state.peers.entry(key).or_insert_with(|| Entry {
            config: PeerConfig::new(key, Vec::new()),
            rx: 0,
            tx: 0,
        });
        entry.rx = rx;
        entry.tx = tx;
    }

    /// Fail every call with [`TunnelError::Unavailable`] until cleared.
    pub fn set_failure(&self, reason: Option<&str>) {
        self.state.lock().failure = reason.map(str::to_string);
    }

    /// Delay `list_peers` answers.
    pub fn set_list_delay(&self, delay: Option<Duration>) {
        self.state.lock().list_delay = delay;
    }

    pub fn set_up(&self, up: bool) {
        self.state.lock().up = up;
    }

    /// The installed configuration of a peer.
    pub fn peer(&self, key: &PeerKey) -> Option<PeerConfig> {
        self.state.lock().peers.get(key).map(|e| e.config.clone())
    }

    pub fn peer_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn check(state: &State) -> TunnelResult<()> {
        if state.closed {
            return Err(TunnelError::Closed);
        }
        if let Some(reason) = &state.failure {
            return Err(TunnelError::Unavailable(reason.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl TunnelControl for MemoryTunnel {
    async fn list_peers(&self) -> TunnelResult<Vec<PeerCounters>> {
        let delay = self.state.lock().list_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock();
        Self::check(&state)?;
        Ok(state
            .peers
            .iter()
            .map(|(key, e)| PeerCounters {
                key: *key,
                rx: e.rx,
                tx: e.tx,
            })
            .collect())
    }

    async fn interface_status(&self) -> TunnelResult<InterfaceStatus> {
        let state = self.state.lock();
        Self::check(&state)?;
        Ok(InterfaceStatus {
            up: state.up,
            peer_count: if state.up { state.peers.len() } else { 0 },
        })
    }

    async fn add_peer(&self, peer: &PeerConfig) -> TunnelResult<()> {
        let mut state = self.state.lock();
        Self::check(&state)?;
        state
            .peers
            .entry(peer.key)
            .and_modify(|e| e.config = peer.clone())
            .or_insert_with(|| Entry {
                config: peer.clone(),
                rx: 0,
                tx: 0,
            });
        Ok(())
    }

    async fn remove_peer(&self, key: &PeerKey) -> TunnelResult<()> {
        let mut state = self.state.lock();
        Self::check(&state)?;
        state.peers.remove(key);
        Ok(())
    }

    async fn close(&self) -> TunnelResult<()> {
        let mut state = self.state.lock();
        state.closed = true;
        state.up = false;
        Ok(())
    }
}
