use std::time::Duration;

use vela_primitives::ErrorKind;

/// Result alias for tunnel operations.
pub type TunnelResult<T> = Result<T, TunnelError>;

/// Errors from the tunnel control interface.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {code:?}: {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("tunnel command timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed dump line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("tunnel interface closed")]
    Closed,

    #[error("tunnel unavailable: {0}")]
    Unavailable(String),
}

impl TunnelError {
    /// Every tunnel failure is a collaborator failure.
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::CollaboratorFailure
    }
}
