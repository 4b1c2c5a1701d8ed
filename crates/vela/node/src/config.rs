//! Figment-based configuration loading.
//!
//! Configuration priority (highest wins):
//! 1. CLI arguments (applied after loading)
//! 2. Config file (TOML)
//! 3. Environment variables (`VELA_` prefix, `__` between section and key)
//! 4. Defaults

use std::path::Path;

use eyre::{Result, WrapErr, eyre};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use vela_bandwidth::{MeterArgs, ReportArgs};
use vela_ledger::LedgerArgs;
use vela_tunnel::TunnelArgs;

use crate::{NodeArgs, ShutdownArgs, StatsArgs};

/// Complete node configuration.
///
/// Ledger amounts are written as decimal strings, e.g.
/// `min_stake = "1000000000000000000000"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeArgs,
    pub tunnel: TunnelArgs,
    pub metering: MeterArgs,
    pub reporting: ReportArgs,
    pub ledger: LedgerArgs,
    pub stats: StatsArgs,
    pub shutdown: ShutdownArgs,
}

impl NodeConfig {
    /// Load configuration from defaults, environment and config file.
    ///
    /// A missing file is not an error. CLI overrides are applied by the caller.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Env::prefixed("VELA_").split("__"));

        if let Some(path) = config_path
            && path.exists()
        {
            figment = figment.merge(Toml::file(path));
        }

        figment.extract().wrap_err("failed to load configuration")
    }

    /// Reject values the node cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.tunnel.validate().map_err(|e| eyre!(e))?;
        self.metering.validate().map_err(|e| eyre!(e))?;
        self.reporting.validate().map_err(|e| eyre!(e))?;
        self.ledger.validate().map_err(|e| eyre!(e))?;
        if self.stats.interval_secs == 0 {
            return Err(eyre!("stats.interval must be positive"));
        }
        Ok(())
    }
}
