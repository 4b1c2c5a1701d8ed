//! CLI argument groups owned by the node crate.

mod log;
mod node;

pub use log::LogArgs;
pub use node::{
    DEFAULT_CHAIN_ID, DEFAULT_GRACE_PERIOD_SECS, DEFAULT_STATS_INTERVAL_SECS, NodeArgs,
    ShutdownArgs, StatsArgs,
};
