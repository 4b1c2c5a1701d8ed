//! The Vela node.
//!
//! Loads a [`NodeConfig`], installs logging, and wires the peer table, tunnel
//! control, bandwidth meter, usage reporter and settlement ledger into a
//! running [`VelaNode`].

mod args;
mod config;
mod logging;
mod node;
mod stats;

pub use args::{
    DEFAULT_CHAIN_ID, DEFAULT_GRACE_PERIOD_SECS, DEFAULT_STATS_INTERVAL_SECS, LogArgs, NodeArgs,
    ShutdownArgs, StatsArgs,
};
pub use config::NodeConfig;
pub use logging::{LogFilter, init_logging, log_filter};
pub use node::{NodeCollaborators, NodeStatus, VelaNode, build_tunnel};
pub use stats::{StatsSources, spawn_stats_task};
