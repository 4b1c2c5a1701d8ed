//! Logging setup for the Vela node.

use eyre::{Result, eyre};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::LogArgs;

/// A built filter and the `--log.filter` directives it could not use.
#[derive(Debug)]
pub struct LogFilter {
    pub filter: EnvFilter,
    pub rejected: Vec<String>,
}

/// Build the log filter.
///
/// Precedence:
/// 1. `--quiet` shows errors only
/// 2. otherwise `RUST_LOG` if set, or a level from the `-v` count
/// 3. `--log.filter` directives are added on top
pub fn log_filter(args: &LogArgs) -> LogFilter {
    if args.quiet {
        return LogFilter {
            filter: EnvFilter::new("error"),
            rejected: Vec::new(),
        };
    }

    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.base_level()));
    let mut rejected = Vec::new();
    if let Some(custom) = &args.filter {
        for directive in custom.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            match directive.parse() {
                Ok(d) => filter = filter.add_directive(d),
                Err(_) => rejected.push(directive.to_string()),
            }
        }
    }
    LogFilter { filter, rejected }
}

/// Install the global subscriber.
///
/// Unusable `--log.filter` directives are reported through the installed
/// subscriber once it is up.
pub fn init_logging(args: &LogArgs) -> Result<()> {
    let LogFilter { filter, rejected } = log_filter(args);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if args.json {
        builder.json().try_init()
    } else {
        builder.without_time().try_init()
    };
    installed.map_err(|err| eyre!("failed to install log subscriber: {err}"))?;

    for directive in rejected {
        warn!(%directive, "ignoring invalid log filter directive");
    }
    Ok(())
}
