//! CLI arguments for the tunnel interface.

use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};

/// Default tunnel interface name.
pub const DEFAULT_INTERFACE: &str = "wg0";

/// Default `wg` binary.
pub const DEFAULT_WG_BINARY: &str = "wg";

/// Default timeout for a single `wg` invocation.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 5;

/// Tunnel interface arguments.
#[derive(Debug, Args, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[command(next_help_heading = "Tunnel")]
#[serde(default)]
pub struct TunnelArgs {
    /// Tunnel interface name
    #[arg(long = "tunnel.interface", default_value = DEFAULT_INTERFACE)]
    pub interface: String,

    /// Path to the `wg` tool
    #[arg(long = "tunnel.wg-binary", default_value = DEFAULT_WG_BINARY)]
    pub wg_binary: String,

    /// Timeout for a single tunnel command in seconds
    #[arg(long = "tunnel.command-timeout", default_value_t = DEFAULT_COMMAND_TIMEOUT_SECS)]
    pub command_timeout_secs: u64,

    /// Persistent keepalive for new peers in seconds (0 disables)
    #[arg(long = "tunnel.keepalive", default_value_t = 0)]
    pub keepalive_secs: u16,

    /// Keep peers in memory instead of driving the `wg` tool
    #[arg(long = "tunnel.in-memory", default_value_t = false)]
    pub in_memory: bool,
}

impl Default for TunnelArgs {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            wg_binary: DEFAULT_WG_BINARY.to_string(),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            keepalive_secs: 0,
            in_memory: false,
        }
    }
}

impl TunnelArgs {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Keepalive to apply to new peers, if enabled.
    pub fn keepalive(&self) -> Option<u16> {
        (self.keepalive_secs > 0).then_some(self.keepalive_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.interface.is_empty() {
            return Err("tunnel.interface must not be empty".to_string());
        }
        if self.command_timeout_secs == 0 {
            return Err("tunnel.command-timeout must be positive".to_string());
        }
        Ok(())
    }
}
