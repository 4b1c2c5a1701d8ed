//! CLI arguments for metering and reporting.

use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};

pub const DEFAULT_METER_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_METER_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_REPORT_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_SUBMIT_TIMEOUT_SECS: u64 = 30;

/// Bandwidth metering arguments.
#[derive(Debug, Args, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[command(next_help_heading = "Metering")]
#[serde(default)]
pub struct MeterArgs {
    /// Seconds between tunnel polls
    #[arg(long = "metering.interval", default_value_t = DEFAULT_METER_INTERVAL_SECS)]
    pub interval_secs: u64,

    /// Seconds a single poll may take before the tick is skipped
    #[arg(long = "metering.timeout", default_value_t = DEFAULT_METER_TIMEOUT_SECS)]
    pub poll_timeout_secs: u64,

    /// Mark peers inactive after this many seconds unseen (0 disables)
    #[arg(long = "metering.stale-after", default_value_t = 0)]
    pub stale_after_secs: u64,
}

impl Default for MeterArgs {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_METER_INTERVAL_SECS,
            poll_timeout_secs: DEFAULT_METER_TIMEOUT_SECS,
            stale_after_secs: 0,
        }
    }
}

impl MeterArgs {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn stale_after(&self) -> Option<Duration> {
        (self.stale_after_secs > 0).then(|| Duration::from_secs(self.stale_after_secs))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.interval_secs == 0 {
            return Err("metering.interval must be positive".to_string());
        }
        if self.poll_timeout_secs == 0 {
            return Err("metering.timeout must be positive".to_string());
        }
        Ok(())
    }
}

/// Usage reporting arguments.
#[derive(Debug, Args, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[command(next_help_heading = "Reporting")]
#[serde(default)]
pub struct ReportArgs {
    /// Seconds between usage reports
    #[arg(long = "reporting.interval", default_value_t = DEFAULT_REPORT_INTERVAL_SECS)]
    pub interval_secs: u64,

    /// Seconds to wait for the ledger to acknowledge a report
    #[arg(long = "reporting.timeout", default_value_t = DEFAULT_SUBMIT_TIMEOUT_SECS)]
    pub submit_timeout_secs: u64,
}

impl Default for ReportArgs {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_REPORT_INTERVAL_SECS,
            submit_timeout_secs: DEFAULT_SUBMIT_TIMEOUT_SECS,
        }
    }
}

impl ReportArgs {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.interval_secs == 0 {
            return Err("reporting.interval must be positive".to_string());
        }
        if self.submit_timeout_secs == 0 {
            return Err("reporting.timeout must be positive".to_string());
        }
        Ok(())
    }
}
