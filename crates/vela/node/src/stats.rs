//! Periodic logging of node health.

use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, U256};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vela_bandwidth::UsageAccumulator;
use vela_ledger::LedgerConnector;
use vela_peers::PeerLedger;
use vela_tasks::TaskExecutor;

/// What the stats task reports on.
#[derive(Clone)]
pub struct StatsSources {
    pub peers: Arc<PeerLedger>,
    pub usage: Arc<UsageAccumulator>,
    pub connector: Arc<dyn LedgerConnector>,
    /// Wallet whose balance is logged.
    pub address: Address,
    /// Bound on the balance lookup.
    pub timeout: Duration,
}

impl std::fmt::Debug for StatsSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsSources")
            .field("address", &self.address)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Spawns a background task that logs peer counts, usage and the wallet
/// balance at `info` level.
pub fn spawn_stats_task(sources: StatsSources, interval: Duration, executor: &TaskExecutor) -> JoinHandle<()> {
    executor.spawn_with_graceful_shutdown_signal("node_stats", |shutdown| async move {
        let mut shutdown = std::pin::pin!(shutdown);

        loop {
            tokio::select! {
                guard = &mut shutdown => {
                    tracing::debug!("stats task shutting down");
                    drop(guard);
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    log_stats(&sources).await;
                }
            }
        }
    })
}

/// Free balance of `address`, or `None` if the ledger could not say in time.
pub(crate) async fn wallet_balance(
    connector: &dyn LedgerConnector,
    address: Address,
    timeout: Duration,
) -> Option<U256> {
    match tokio::time::timeout(timeout, connector.get_balance(address)).await {
        Ok(Ok(balance)) => Some(balance),
        Ok(Err(err)) => {
            warn!(%address, error = %err, "failed to get wallet balance");
            None
        }
        Err(_) => {
            warn!(%address, ?timeout, "wallet balance lookup timed out");
            None
        }
    }
}

async fn log_stats(sources: &StatsSources) {
    let stats = sources.peers.stats();
    let bandwidth = sources.peers.total_bandwidth();
    let balance = wallet_balance(&*sources.connector, sources.address, sources.timeout)
        .await
        .map_or_else(|| "unknown".to_string(), |b| b.to_string());
    info!(
        peers = stats.total,
        connected = stats.connected,
        disconnected = stats.disconnected,
        rx = bandwidth.rx,
        tx = bandwidth.tx,
        unreported = sources.usage.total(),
        %balance,
        "vela status"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_ledger::{LedgerArgs, LocalLedger, MemoryCustody};
    use vela_primitives::ManualClock;
    use vela_tasks::TaskManager;

    const WALLET: Address = Address::repeat_byte(0x42);

    fn sources(custody: Arc<MemoryCustody>) -> StatsSources {
        let ledger = LocalLedger::new(&LedgerArgs::default(), custody, Arc::new(ManualClock::new(0)), 1);
        StatsSources {
            peers: Arc::new(PeerLedger::new()),
            usage: Arc::new(UsageAccumulator::new()),
            connector: Arc::new(ledger),
            address: WALLET,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_wallet_balance() {
        let custody = Arc::new(MemoryCustody::new());
        custody.deposit(WALLET, U256::from(750));
        let sources = sources(custody.clone());

        let balance = wallet_balance(&*sources.connector, WALLET, sources.timeout).await;
        assert_eq!(balance, Some(U256::from(750)));

        custody.set_failure(Some("rpc unavailable"));
        assert_eq!(wallet_balance(&*sources.connector, WALLET, sources.timeout).await, None);
        log_stats(&sources).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_task_stops_on_shutdown() {
        let manager = TaskManager::current();
        let handle = spawn_stats_task(
            sources(Arc::new(MemoryCustody::new())),
            Duration::from_secs(20),
            &manager.executor(),
        );
        tokio::time::sleep(Duration::from_secs(45)).await;

        assert!(manager.graceful_shutdown_with_timeout(Duration::from_secs(1)).await);
        handle.await.unwrap();
    }
}
