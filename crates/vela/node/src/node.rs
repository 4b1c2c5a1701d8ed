//! Component wiring and lifecycle.

use std::{future::Future, sync::Arc, time::Duration};

use alloy_primitives::{Address, U256};
use alloy_signer_local::PrivateKeySigner;
use eyre::Result;
use serde::{Deserialize, Serialize};
use tokio::{sync::broadcast, time::Instant};
use tracing::{info, warn};
use vela_bandwidth::{BandwidthMeter, ReportSigner, UsageAccumulator, UsageReporter};
use vela_ledger::{LedgerConnector, LocalLedger, NodeAccount};
use vela_peers::{BandwidthTotals, PeerEvent, PeerLedger, PeerService, PeerStats};
use vela_tasks::{PanickedTaskError, TaskManager};
use vela_tunnel::{InterfaceStatus, MemoryTunnel, TunnelArgs, TunnelControl, WgCommand};

use crate::{
    NodeConfig,
    stats::{StatsSources, spawn_stats_task, wallet_balance},
};

/// Build the tunnel backend selected by `args`.
pub fn build_tunnel(args: &TunnelArgs) -> Arc<dyn TunnelControl> {
    if args.in_memory {
        Arc::new(MemoryTunnel::new())
    } else {
        Arc::new(WgCommand::from_args(args))
    }
}

/// Outside collaborators of a node.
#[derive(Clone)]
pub struct NodeCollaborators {
    pub tunnel: Arc<dyn TunnelControl>,
    pub connector: Arc<dyn LedgerConnector>,
    pub signer: Arc<dyn ReportSigner>,
}

impl std::fmt::Debug for NodeCollaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCollaborators")
            .field("signer", &self.signer.address())
            .finish_non_exhaustive()
    }
}

impl NodeCollaborators {
    /// Tunnel from config, an in-process ledger, and the configured wallet.
    pub fn local(config: &NodeConfig) -> Result<Self> {
        let signer: PrivateKeySigner = config.node.signer()?;
        Ok(Self {
            tunnel: build_tunnel(&config.tunnel),
            connector: Arc::new(LocalLedger::from_args(&config.ledger, config.node.chain_id)),
            signer: Arc::new(signer),
        })
    }
}

/// Point-in-time view of the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub address: Address,
    pub interface: InterfaceStatus,
    pub peers: PeerStats,
    pub bandwidth: BandwidthTotals,
    /// Bytes not yet acknowledged by the ledger.
    pub unreported: u64,
    pub account: Option<NodeAccount>,
    /// Free wallet balance; `None` if the ledger did not answer.
    pub balance: Option<U256>,
    /// Seconds since launch.
    pub uptime_secs: u64,
}

/// A running node.
pub struct VelaNode {
    config: NodeConfig,
    address: Address,
    tunnel: Arc<dyn TunnelControl>,
    connector: Arc<dyn LedgerConnector>,
    service: PeerService,
    meter: Arc<BandwidthMeter>,
    reporter: Arc<UsageReporter>,
    tasks: TaskManager,
    started_at: Instant,
}

impl std::fmt::Debug for VelaNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VelaNode")
            .field("address", &self.address)
            .field("interface", &self.config.tunnel.interface)
            .field("tasks", &self.tasks)
            .finish_non_exhaustive()
    }
}

impl VelaNode {
    /// Restore peers from the tunnel and start the metering, reporting and
    /// stats tasks on the current runtime.
    pub async fn launch(config: NodeConfig, collaborators: NodeCollaborators) -> Result<Self> {
        config.validate()?;
        let started_at = Instant::now();
        let NodeCollaborators {
            tunnel,
            connector,
            signer,
        } = collaborators;
        let address = signer.address();

        let peers = Arc::new(PeerLedger::new());
        let service = PeerService::new(peers.clone(), tunnel.clone(), config.tunnel.command_timeout())
            .with_keepalive(config.tunnel.keepalive());

        let usage = Arc::new(UsageAccumulator::new());
        let meter = Arc::new(BandwidthMeter::new(
            tunnel.clone(),
            peers.clone(),
            usage.clone(),
            &config.metering,
        ));
        match service.restore_from_tunnel().await {
            Ok(counters) => meter.seed_baseline(&counters),
            Err(err) => warn!(error = %err, "could not restore peers from tunnel"),
        }

        let reporter = Arc::new(UsageReporter::new(
            usage.clone(),
            connector.clone(),
            signer,
            config.node.chain_id,
            &config.reporting,
        ));

        let tasks = TaskManager::current();
        let executor = tasks.executor();
        meter.clone().spawn(config.metering.interval(), &executor);
        reporter.clone().spawn(config.reporting.interval(), &executor);
        let stats = StatsSources {
            peers,
            usage,
            connector: connector.clone(),
            address,
            timeout: config.reporting.submit_timeout(),
        };
        spawn_stats_task(stats, config.stats.interval(), &executor);

        info!(
            %address,
            interface = %config.tunnel.interface,
            peers = service.ledger().len(),
            "vela node started"
        );
        Ok(Self {
            config,
            address,
            tunnel,
            connector,
            service,
            meter,
            reporter,
            tasks,
            started_at,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Time since [`launch`](Self::launch).
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Connect, disconnect and remove peers.
    pub fn peers(&self) -> &PeerService {
        &self.service
    }

    pub fn meter(&self) -> &Arc<BandwidthMeter> {
        &self.meter
    }

    pub fn reporter(&self) -> &Arc<UsageReporter> {
        &self.reporter
    }

    pub fn connector(&self) -> &Arc<dyn LedgerConnector> {
        &self.connector
    }

    /// Peer lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.service.ledger().events().subscribe()
    }

    pub async fn status(&self) -> NodeStatus {
        let ledger = self.service.ledger();
        let timeout = self.config.tunnel.command_timeout();

        let interface = match tokio::time::timeout(timeout, self.tunnel.interface_status()).await {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => {
                warn!(error = %err, "interface status unavailable");
                InterfaceStatus::default()
            }
            Err(_) => {
                warn!(?timeout, "interface status timed out");
                InterfaceStatus::default()
            }
        };
        let account = match self.connector.read_node_account(self.address).await {
            Ok(account) => account,
            Err(err) => {
                warn!(error = %err, "node account unavailable");
                None
            }
        };
        let balance = wallet_balance(
            &*self.connector,
            self.address,
            self.config.reporting.submit_timeout(),
        )
        .await;

        NodeStatus {
            address: self.address,
            interface,
            peers: ledger.stats(),
            bandwidth: ledger.total_bandwidth(),
            unreported: self.meter.usage().total(),
            account,
            balance,
            uptime_secs: self.uptime().as_secs(),
        }
    }

    /// Run until `signal` resolves or a critical task panics.
    pub async fn run_until<F>(&mut self, signal: F) -> Result<(), PanickedTaskError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            res = &mut self.tasks => res,
            () = signal => Ok(()),
        }
    }

    /// Stop the periodic tasks, wait up to the grace period for in-flight
    /// ticks, then release the tunnel.
    ///
    /// Returns `true` if every task finished within the grace period.
    pub async fn shutdown(self) -> bool {
        let grace_period = self.config.shutdown.grace_period();
        info!(?grace_period, "shutting down vela node");
        let finished = self.tasks.graceful_shutdown_with_timeout(grace_period).await;
        if let Err(err) = self.tunnel.close().await {
            warn!(error = %err, "failed to release tunnel");
        }
        info!(finished, "vela node stopped");
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_ledger::{LedgerArgs, MemoryCustody};
    use vela_primitives::{ManualClock, PeerKey};

    const KEY: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";
    const OTHER: &str = "TrMvSoP4jYQlY6RIzBgbssQqY3vxI2Pi+y71lOWWXX0=";

    fn config() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.tunnel.in_memory = true;
        config.metering.interval_secs = 1;
        config.reporting.interval_secs = 10;
        config.ledger = LedgerArgs {
            min_stake: U256::from(1_000),
            min_payment: U256::from(1),
            price_per_byte: U256::from(1),
            fee_bps: 100,
            ..Default::default()
        };
        config
    }

    struct Harness {
        tunnel: Arc<MemoryTunnel>,
        custody: Arc<MemoryCustody>,
        ledger: Arc<LocalLedger>,
        collaborators: NodeCollaborators,
    }

    fn harness(config: &NodeConfig) -> Harness {
        let signer = PrivateKeySigner::random();
        let custody = Arc::new(MemoryCustody::new());
        custody.deposit(signer.address(), U256::from(1_500));
        let ledger = Arc::new(LocalLedger::new(
            &config.ledger,
            custody.clone(),
            Arc::new(ManualClock::new(1_700_000_000)),
            config.node.chain_id,
        ));
        ledger
            .registry()
            .register_node(signer.address(), "test".into(), U256::from(1_000))
            .unwrap();
        let tunnel = Arc::new(MemoryTunnel::new());
        let collaborators = NodeCollaborators {
            tunnel: tunnel.clone(),
            connector: ledger.clone(),
            signer: Arc::new(signer),
        };
        Harness {
            tunnel,
            custody,
            ledger,
            collaborators,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_usage_flows_to_node_account() {
        let config = config();
        let h = harness(&config);
        let node = VelaNode::launch(config, h.collaborators).await.unwrap();
        let mut events = node.subscribe();

        node.peers()
            .connect(KEY, &["10.8.0.2/32"], None)
            .await
            .unwrap();
        assert!(matches!(events.recv().await.unwrap(), PeerEvent::Added { .. }));

        let key: PeerKey = KEY.parse().unwrap();
        h.tunnel.add_traffic(key, 6_000, 4_000);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(node.meter().usage().total(), 10_000);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let status = node.status().await;
        assert_eq!(status.unreported, 0);
        assert_eq!(status.peers.connected, 1);
        assert_eq!(status.bandwidth.total(), 10_000);
        assert!(status.interface.up);

        let account = status.account.unwrap();
        assert_eq!(account.total_bandwidth_provided, 10_000);
        assert_eq!(account.total_earnings, U256::from(9_900));
        assert_eq!(h.ledger.coordinator().fee_pool(), U256::from(100));

        assert!(node.shutdown().await);
        assert!(h.tunnel.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_restores_peers_without_reclaiming() {
        let config = config();
        let h = harness(&config);
        let key: PeerKey = KEY.parse().unwrap();
        h.tunnel.set_counters(key, 50_000, 50_000);

        let node = VelaNode::launch(config, h.collaborators).await.unwrap();
        let restored = node.peers().ledger().get(&key).unwrap();
        assert_eq!(restored.bytes_rx, 50_000);

        h.tunnel.add_traffic(key, 10, 0);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(node.meter().usage().total(), 10);

        assert!(node.shutdown().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_node_keeps_usage() {
        let config = config();
        let h = harness(&config);
        let mut collaborators = h.collaborators;
        // a signer the ledger never registered
        collaborators.signer = Arc::new(PrivateKeySigner::random());

        let node = VelaNode::launch(config, collaborators).await.unwrap();
        node.peers()
            .connect(OTHER, &["10.8.0.3/32"], None)
            .await
            .unwrap();
        let key: PeerKey = OTHER.parse().unwrap();
        h.tunnel.add_traffic(key, 700, 0);

        tokio::time::sleep(Duration::from_secs(12)).await;
        let status = node.status().await;
        assert_eq!(status.unreported, 700);
        assert!(status.account.is_none());
        assert!(node.shutdown().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_uptime_and_balance() {
        let config = config();
        let h = harness(&config);
        let node = VelaNode::launch(config, h.collaborators).await.unwrap();

        tokio::time::sleep(Duration::from_secs(42)).await;
        let status = node.status().await;
        assert_eq!(status.uptime_secs, 42);
        // 1_500 deposited, 1_000 of it staked
        assert_eq!(status.balance, Some(U256::from(500)));

        h.custody.set_failure(Some("rpc unavailable"));
        let status = node.status().await;
        assert_eq!(status.balance, None);
        assert!(status.account.is_some());

        h.custody.set_failure(None);
        assert!(node.shutdown().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_signal() {
        let config = config();
        let h = harness(&config);
        h.tunnel.set_counters(PeerKey::from_bytes([9; 32]), 1, 1);
        let mut node = VelaNode::launch(config, h.collaborators).await.unwrap();

        node.run_until(tokio::time::sleep(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(node.shutdown().await);
    }

    #[tokio::test]
    async fn test_build_tunnel_in_memory() {
        let args = TunnelArgs {
            in_memory: true,
            ..Default::default()
        };
        let tunnel = build_tunnel(&args);
        assert!(tunnel.list_peers().await.unwrap().is_empty());
    }
}
