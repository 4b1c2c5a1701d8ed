//! Node identity, stats and shutdown arguments.

use std::{str::FromStr, time::Duration};

use alloy_signer_local::PrivateKeySigner;
use clap::Args;
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default chain id for usage report signatures.
pub const DEFAULT_CHAIN_ID: u64 = 1;

pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 20;

pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 10;

/// Node identity.
#[derive(Debug, Args, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[command(next_help_heading = "Node")]
#[serde(default)]
pub struct NodeArgs {
    /// Chain id of the EIP-712 domain usage reports are signed for
    #[arg(long = "node.chain-id", default_value_t = DEFAULT_CHAIN_ID)]
    pub chain_id: u64,

    /// Hex private key of the node wallet (random if unset)
    #[arg(long = "node.private-key", value_name = "PRIVATE_KEY")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

impl Default for NodeArgs {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            private_key: None,
        }
    }
}

impl NodeArgs {
    /// The wallet signing usage reports.
    pub fn signer(&self) -> Result<PrivateKeySigner> {
        match &self.private_key {
            Some(key) => PrivateKeySigner::from_str(key).wrap_err("invalid node private key"),
            None => {
                let signer = PrivateKeySigner::random();
                warn!(address = %signer.address(), "no private key configured, using an ephemeral wallet");
                Ok(signer)
            }
        }
    }
}

/// Periodic stats logging.
#[derive(Debug, Args, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[command(next_help_heading = "Stats")]
#[serde(default)]
pub struct StatsArgs {
    /// Seconds between status log lines
    #[arg(long = "stats.interval", default_value_t = DEFAULT_STATS_INTERVAL_SECS)]
    pub interval_secs: u64,
}

impl Default for StatsArgs {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_STATS_INTERVAL_SECS,
        }
    }
}

impl StatsArgs {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Shutdown behavior.
#[derive(Debug, Args, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[command(next_help_heading = "Shutdown")]
#[serde(default)]
pub struct ShutdownArgs {
    /// Seconds to wait for in-flight ticks before releasing the tunnel
    #[arg(long = "shutdown.grace-period", default_value_t = DEFAULT_GRACE_PERIOD_SECS)]
    pub grace_period_secs: u64,
}

impl Default for ShutdownArgs {
    fn default() -> Self {
        Self {
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
        }
    }
}

impl ShutdownArgs {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}
