//! Peer lifecycle events and non-blocking broadcast emitter.

use ipnet::IpNet;
use tokio::sync::broadcast;
use vela_primitives::PeerKey;

/// Peer lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Added { key: PeerKey, allowed_ips: Vec<IpNet> },
    Removed { key: PeerKey },
    StatusChanged { key: PeerKey, active: bool },
}

impl PeerEvent {
    pub fn key(&self) -> &PeerKey {
        match self {
            Self::Added { key, .. } | Self::Removed { key } | Self::StatusChanged { key, .. } => key,
        }
    }
}

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Non-blocking broadcast emitter.
///
/// Dropped receivers are released by the channel; a subscriber that falls
/// behind loses the oldest events. Emitting never fails.
#[derive(Debug, Clone)]
pub struct PeerEvents {
    tx: broadcast::Sender<PeerEvent>,
}

impl Default for PeerEvents {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl PeerEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: PeerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
