use std::time::Duration;

use vela_ledger::LedgerError;
use vela_primitives::ErrorKind;
use vela_tunnel::TunnelError;

/// A metering tick that could not poll the tunnel.
#[derive(Debug, thiserror::Error)]
pub enum MeterError {
    #[error("tunnel poll timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
}

impl MeterError {
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::CollaboratorFailure
    }
}

/// A usage report that was not acknowledged.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("ledger did not acknowledge within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ReportError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Signing(_) | Self::Timeout(_) => ErrorKind::CollaboratorFailure,
            Self::Ledger(err) => err.kind(),
        }
    }

    /// Whether the ledger may have applied the report despite the error.
    ///
    /// Such a report must be resent unchanged so the ledger can recognise it.
    pub const fn is_unconfirmed(&self) -> bool {
        match self {
            Self::Signing(_) => false,
            Self::Timeout(_) => true,
            Self::Ledger(err) => matches!(err.kind(), ErrorKind::CollaboratorFailure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfirmed_errors() {
        assert!(ReportError::Timeout(Duration::from_secs(30)).is_unconfirmed());
        assert!(!ReportError::Signing("no key".into()).is_unconfirmed());
        assert!(!ReportError::Ledger(LedgerError::InvalidInput("empty")).is_unconfirmed());
    }
}
