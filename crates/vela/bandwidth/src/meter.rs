//! Periodic tunnel polling.

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, trace, warn};
use vela_peers::PeerLedger;
use vela_primitives::{Clock, PeerKey};
use vela_tasks::TaskExecutor;
use vela_tunnel::{PeerCounters, TunnelControl};

use crate::{MeterArgs, MeterError, UsageAccumulator};

/// Bytes transferred between two readings of a cumulative counter.
///
/// A counter that went backwards was reset, so everything it holds now is new.
pub const fn counter_delta(previous: u64, current: u64) -> u64 {
    if current < previous { current } else { current - previous }
}

/// What one tick observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Peers reported by the tunnel.
    pub polled: usize,
    /// Bytes attributed to known peers.
    pub bytes: u64,
    /// Tunnel peers missing from the peer table.
    pub unknown: usize,
    /// Peers marked inactive by the staleness policy.
    pub stale: usize,
}

/// Turns cumulative tunnel counters into per-peer and global usage.
///
/// The meter is the only writer of peer counters.
pub struct BandwidthMeter {
    tunnel: Arc<dyn TunnelControl>,
    peers: Arc<PeerLedger>,
    usage: Arc<UsageAccumulator>,
    baseline: Mutex<HashMap<PeerKey, (u64, u64)>>,
    poll_timeout: Duration,
    stale_after: Option<Duration>,
}

impl std::fmt::Debug for BandwidthMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BandwidthMeter")
            .field("baseline", &self.baseline.lock().len())
            .field("poll_timeout", &self.poll_timeout)
            .field("stale_after", &self.stale_after)
            .finish_non_exhaustive()
    }
}

impl BandwidthMeter {
    pub fn new(
        tunnel: Arc<dyn TunnelControl>,
        peers: Arc<PeerLedger>,
        usage: Arc<UsageAccumulator>,
        args: &MeterArgs,
    ) -> Self {
        Self {
            tunnel,
            peers,
            usage,
            baseline: Mutex::new(HashMap::new()),
            poll_timeout: args.poll_timeout(),
            stale_after: args.stale_after(),
        }
    }

    pub fn usage(&self) -> &Arc<UsageAccumulator> {
        &self.usage
    }

    /// Start from known counter values, so they are not counted as new usage.
    pub fn seed_baseline(&self, counters: &[PeerCounters]) {
        let mut baseline = self.baseline.lock();
        for c in counters {
            baseline.insert(c.key, (c.rx, c.tx));
        }
    }

    /// Poll the tunnel once and apply the deltas.
    pub async fn tick(&self) -> Result<TickSummary, MeterError> {
        let counters = tokio::time::timeout(self.poll_timeout, self.tunnel.list_peers())
            .await
            .map_err(|_| MeterError::Timeout(self.poll_timeout))??;

        let mut summary = TickSummary {
            polled: counters.len(),
            ..Default::default()
        };

        let deltas: Vec<(PeerKey, u64, u64)> = {
            let mut baseline = self.baseline.lock();
            baseline.retain(|key, _| counters.iter().any(|c| c.key == *key));
            counters
                .iter()
                .map(|c| {
                    let (rx, tx) = baseline.insert(c.key, (c.rx, c.tx)).unwrap_or_default();
                    (c.key, counter_delta(rx, c.rx), counter_delta(tx, c.tx))
                })
                .collect()
        };

        for (key, rx, tx) in deltas {
            if !self.peers.update_stats(&key, rx, tx, true) {
                trace!(peer = %key, "ignoring traffic of unregistered peer");
                summary.unknown += 1;
                continue;
            }
            let bytes = rx.saturating_add(tx);
            self.usage.record(key, bytes);
            summary.bytes = summary.bytes.saturating_add(bytes);
        }

        if let Some(stale_after) = self.stale_after {
            let cutoff = self.peers.clock().now().saturating_sub(stale_after.as_secs());
            summary.stale = self.peers.mark_stale(cutoff).len();
        }

        metrics::counter!("vela_meter_ticks_total").increment(1);
        metrics::counter!("vela_meter_bytes_total").increment(summary.bytes);
        debug!(
            polled = summary.polled,
            bytes = summary.bytes,
            unknown = summary.unknown,
            stale = summary.stale,
            "meter tick"
        );
        Ok(summary)
    }

    /// Spawn the metering loop.
    ///
    /// A tick that overruns the interval causes the missed ticks to be skipped.
    pub fn spawn(self: Arc<Self>, interval: Duration, executor: &TaskExecutor) -> JoinHandle<()> {
        executor.spawn_with_graceful_shutdown_signal("bandwidth_meter", |shutdown| async move {
            let mut shutdown = std::pin::pin!(shutdown);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    guard = &mut shutdown => {
                        debug!("bandwidth meter shutting down");
                        drop(guard);
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = self.tick().await {
                            warn!(error = %err, "meter tick failed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use vela_primitives::ManualClock;
    use vela_tunnel::MemoryTunnel;

    const KEY: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";

    struct Fixture {
        meter: BandwidthMeter,
        tunnel: Arc<MemoryTunnel>,
        peers: Arc<PeerLedger>,
        clock: Arc<ManualClock>,
    }

    fn fixture(args: MeterArgs) -> Fixture {
        let tunnel = Arc::new(MemoryTunnel::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let peers = Arc::new(PeerLedger::with_clock(clock.clone()));
        let meter = BandwidthMeter::new(
            tunnel.clone(),
            peers.clone(),
            Arc::new(UsageAccumulator::new()),
            &args,
        );
        Fixture {
            meter,
            tunnel,
            peers,
            clock,
        }
    }

    fn key() -> PeerKey {
        KEY.parse().unwrap()
    }

    #[test]
    fn test_counter_delta() {
        assert_eq!(counter_delta(100, 150), 50);
        assert_eq!(counter_delta(100, 100), 0);
        // reset
        assert_eq!(counter_delta(5_000, 200), 200);
    }

    #[tokio::test]
    async fn test_counter_reset_between_polls() {
        let f = fixture(MeterArgs::default());
        f.peers.add_peer(KEY, &["10.0.0.2/32"], None).unwrap();

        f.tunnel.set_counters(key(), 1_000, 500);
        let summary = f.meter.tick().await.unwrap();
        assert_eq!(summary.bytes, 1_500);

        f.tunnel.set_counters(key(), 1_200, 600);
        f.meter.tick().await.unwrap();

        // interface restarted
        f.tunnel.set_counters(key(), 100, 50);
        f.clock.advance(10);
        let summary = f.meter.tick().await.unwrap();
        assert_eq!(summary.bytes, 150);

        let peer = f.peers.get(&key()).unwrap();
        assert_eq!(peer.bytes_rx, 1_300);
        assert_eq!(peer.bytes_tx, 650);
        assert_eq!(peer.last_seen, 1_010);
        assert!(peer.is_active);
        assert_eq!(f.meter.usage().total(), 1_950);
        assert_eq!(f.meter.usage().peer(&key()), 1_950);
    }

    #[tokio::test]
    async fn test_unknown_peer_only_moves_baseline() {
        let f = fixture(MeterArgs::default());
        f.tunnel.set_counters(key(), 4_000, 4_000);

        let summary = f.meter.tick().await.unwrap();
        assert_eq!(summary.unknown, 1);
        assert_eq!(summary.bytes, 0);
        assert_eq!(f.meter.usage().total(), 0);

        f.peers.add_peer(KEY, &["10.0.0.2/32"], None).unwrap();
        f.tunnel.add_traffic(key(), 10, 20);
        let summary = f.meter.tick().await.unwrap();
        assert_eq!(summary.bytes, 30);
    }

    #[tokio::test]
    async fn test_seeded_baseline_not_counted() {
        let f = fixture(MeterArgs::default());
        f.peers.add_peer(KEY, &["10.0.0.2/32"], None).unwrap();
        f.tunnel.set_counters(key(), 9_000, 1_000);
        f.meter.seed_baseline(&[PeerCounters {
            key: key(),
            rx: 9_000,
            tx: 1_000,
        }]);

        assert_eq!(f.meter.tick().await.unwrap().bytes, 0);
    }

    #[tokio::test]
    async fn test_stale_peers_marked_inactive() {
        let f = fixture(MeterArgs {
            stale_after_secs: 60,
            ..Default::default()
        });
        f.peers.add_peer(KEY, &["10.0.0.2/32"], None).unwrap();

        f.clock.advance(61);
        let summary = f.meter.tick().await.unwrap();
        assert_eq!(summary.stale, 1);
        assert!(!f.peers.get(&key()).unwrap().is_active);
    }

    #[tokio::test]
    async fn test_absent_peer_untouched_without_policy() {
        let f = fixture(MeterArgs::default());
        f.peers.add_peer(KEY, &["10.0.0.2/32"], None).unwrap();
        f.clock.advance(10_000);
        f.meter.tick().await.unwrap();
        let peer = f.peers.get(&key()).unwrap();
        assert!(peer.is_active);
        assert_eq!(peer.last_seen, 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_poll_times_out() {
        let f = fixture(MeterArgs::default());
        f.tunnel.set_list_delay(Some(Duration::from_secs(60)));
        assert_matches!(f.meter.tick().await, Err(MeterError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_tunnel_failure_surfaces() {
        let f = fixture(MeterArgs::default());
        f.tunnel.set_failure(Some("wg missing"));
        let err = f.meter.tick().await.unwrap_err();
        assert_eq!(err.kind(), vela_primitives::ErrorKind::CollaboratorFailure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_meter_stops_on_shutdown() {
        let mut manager = vela_tasks::TaskManager::current();
        let f = fixture(MeterArgs::default());
        f.peers.add_peer(KEY, &["10.0.0.2/32"], None).unwrap();
        f.tunnel.set_counters(key(), 100, 0);

        let meter = Arc::new(f.meter);
        let handle = meter.clone().spawn(Duration::from_secs(10), &manager.executor());
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(meter.usage().total(), 100);

        manager.fire_shutdown_signal();
        handle.await.unwrap();
    }
}
