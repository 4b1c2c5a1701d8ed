use strum::{Display, IntoStaticStr};

/// What went wrong, independent of which component reported it.
///
/// Callers branch on the kind rather than on error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed tunnel key.
    InvalidKeyFormat,
    /// Non-positive amount or duration, bad CIDR, self-referential stream.
    InvalidInput,
    /// A stream with the derived id already exists.
    StreamExists,
    /// Unknown stream, node or peer.
    NotFound,
    /// Operation not allowed in the current state.
    InvalidState,
    /// Caller is not the party allowed to perform the operation.
    Unauthorized,
    /// Stake below the registration minimum.
    InsufficientStake,
    /// Not enough available or free balance.
    InsufficientBalance,
    /// Tunnel, custody or ledger collaborator failed.
    CollaboratorFailure,
}

/// Coarse error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    Conflict,
    Authorization,
    Collaborator,
    Resource,
}

impl ErrorKind {
    /// The class this kind belongs to.
    pub const fn class(self) -> ErrorClass {
        match self {
            Self::InvalidKeyFormat | Self::InvalidInput | Self::NotFound => ErrorClass::Validation,
            Self::StreamExists | Self::InvalidState => ErrorClass::Conflict,
            Self::Unauthorized => ErrorClass::Authorization,
            Self::CollaboratorFailure => ErrorClass::Collaborator,
            Self::InsufficientStake | Self::InsufficientBalance => ErrorClass::Resource,
        }
    }

    /// Metric label for this kind.
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}
