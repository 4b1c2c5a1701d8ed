use vela_primitives::{ErrorKind, KeyFormatError, PeerKey};
use vela_tunnel::TunnelError;

pub type PeerResult<T> = Result<T, PeerError>;

/// Errors from peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("invalid peer key {key:?}: {source}")]
    InvalidKey {
        key: String,
        #[source]
        source: KeyFormatError,
    },

    #[error("invalid allowed ip {value:?}: {source}")]
    InvalidAllowedIp {
        value: String,
        #[source]
        source: ipnet::AddrParseError,
    },

    #[error("peer {0} not found")]
    NotFound(PeerKey),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),
}

impl PeerError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidKey { .. } => ErrorKind::InvalidKeyFormat,
            Self::InvalidAllowedIp { .. } => ErrorKind::InvalidInput,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Tunnel(_) => ErrorKind::CollaboratorFailure,
        }
    }
}
