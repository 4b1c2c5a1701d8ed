//! Signed usage reports.
//!
//! The reporter drains the [`UsageAccumulator`] only after the ledger has
//! acknowledged a report. Anything that goes wrong before that leaves the
//! usage in place for the next attempt, so delivery is at-least-once.
//!
//! A report whose fate is unknown (the submission timed out, or the ledger
//! connection failed) stays pending and is resent byte for byte, with the same
//! timestamp and signature, until the ledger answers. The ledger's payment id
//! is derived from those fields, so a report that did land is recognised as a
//! duplicate instead of being paid again. Usage recorded meanwhile waits for
//! the next report. Report timestamps strictly increase, so two reports never
//! share an id.

use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, B256, Signature};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use auto_impl::auto_impl;
use tokio::{sync::Mutex, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};
use vela_ledger::{LedgerConnector, ReportAck};
use vela_primitives::{Clock, SystemClock, UsageReport};
use vela_tasks::TaskExecutor;

use crate::{ReportArgs, ReportError, UsageAccumulator, UsageSnapshot};

/// Signs usage report hashes on behalf of the node.
#[auto_impl(&, Arc)]
pub trait ReportSigner: Send + Sync {
    /// The address reports are claimed for.
    fn address(&self) -> Address;

    fn sign_hash(&self, hash: &B256) -> Result<Signature, ReportError>;
}

impl ReportSigner for PrivateKeySigner {
    fn address(&self) -> Address {
        PrivateKeySigner::address(self)
    }

    fn sign_hash(&self, hash: &B256) -> Result<Signature, ReportError> {
        self.sign_hash_sync(hash)
            .map_err(|e| ReportError::Signing(e.to_string()))
    }
}

/// A signed report and the usage it covers.
#[derive(Debug, Clone)]
struct PendingReport {
    snapshot: UsageSnapshot,
    report: UsageReport,
}

#[derive(Debug, Default)]
struct ReporterState {
    /// Submitted but neither acknowledged nor rejected.
    pending: Option<PendingReport>,
    /// Timestamp of the last signed report.
    last_timestamp: u64,
}

/// Packages accumulated usage into signed reports.
pub struct UsageReporter {
    usage: Arc<UsageAccumulator>,
    connector: Arc<dyn LedgerConnector>,
    signer: Arc<dyn ReportSigner>,
    clock: Arc<dyn Clock>,
    chain_id: u64,
    submit_timeout: Duration,
    state: Mutex<ReporterState>,
}

impl std::fmt::Debug for UsageReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageReporter")
            .field("node", &self.signer.address())
            .field("chain_id", &self.chain_id)
            .field("submit_timeout", &self.submit_timeout)
            .finish_non_exhaustive()
    }
}

impl UsageReporter {
    pub fn new(
        usage: Arc<UsageAccumulator>,
        connector: Arc<dyn LedgerConnector>,
        signer: Arc<dyn ReportSigner>,
        chain_id: u64,
        args: &ReportArgs,
    ) -> Self {
        Self {
            usage,
            connector,
            signer,
            clock: Arc::new(SystemClock),
            chain_id,
            submit_timeout: args.submit_timeout(),
            state: Mutex::new(ReporterState::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Report accumulated usage once, or resend the pending report.
    ///
    /// Returns `None` when there was nothing to report.
    pub async fn report(&self) -> Result<Option<ReportAck>, ReportError> {
        let mut state = self.state.lock().await;
        let pending = match state.pending.take() {
            Some(pending) => {
                debug!(
                    bandwidth = pending.report.bandwidth,
                    timestamp = pending.report.timestamp,
                    "resending unacknowledged usage report"
                );
                pending
            }
            None => {
                let snapshot = self.usage.snapshot();
                if snapshot.is_empty() {
                    return Ok(None);
                }
                let timestamp = self.clock.now().max(state.last_timestamp.saturating_add(1));
                let report = self.sign(snapshot.total, timestamp)?;
                state.last_timestamp = timestamp;
                PendingReport { snapshot, report }
            }
        };

        let result = self.submit(&pending.report).await;
        let outcome = match &result {
            Ok(_) => "acknowledged",
            Err(err) => err.kind().as_str(),
        };
        metrics::counter!("vela_reporter_reports_total", "outcome" => outcome).increment(1);

        match result {
            Ok(ack) => {
                self.usage.drain(&pending.snapshot);
                info!(
                    bandwidth = ack.bandwidth,
                    amount = %ack.amount,
                    payment = %ack.payment_id,
                    duplicate = ack.duplicate,
                    "usage report acknowledged"
                );
                Ok(Some(ack))
            }
            Err(err) => {
                if err.is_unconfirmed() {
                    state.pending = Some(pending);
                }
                Err(err)
            }
        }
    }

    /// The report awaiting acknowledgement, if any.
    pub async fn pending(&self) -> Option<UsageReport> {
        self.state.lock().await.pending.as_ref().map(|p| p.report.clone())
    }

    fn sign(&self, bandwidth: u64, timestamp: u64) -> Result<UsageReport, ReportError> {
        let report = UsageReport::unsigned(self.signer.address(), bandwidth, timestamp);
        let signature = self.signer.sign_hash(&report.signing_hash(self.chain_id))?;
        Ok(report.with_signature(signature))
    }

    async fn submit(&self, report: &UsageReport) -> Result<ReportAck, ReportError> {
        debug!(bandwidth = report.bandwidth, timestamp = report.timestamp, "submitting usage report");
        let ack = tokio::time::timeout(self.submit_timeout, self.connector.submit_usage_report(report))
            .await
            .map_err(|_| ReportError::Timeout(self.submit_timeout))??;
        Ok(ack)
    }

    /// Spawn the reporting loop.
    ///
    /// The first report goes out one interval after start.
    pub fn spawn(self: Arc<Self>, interval: Duration, executor: &TaskExecutor) -> JoinHandle<()> {
        executor.spawn_with_graceful_shutdown_signal("usage_reporter", |shutdown| async move {
            let mut shutdown = std::pin::pin!(shutdown);
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    guard = &mut shutdown => {
                        debug!("usage reporter shutting down");
                        drop(guard);
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = self.report().await {
                            warn!(error = %err, kind = %err.kind(), "usage report not acknowledged");
                        }
                    }
                }
            }
        })
    }
}
