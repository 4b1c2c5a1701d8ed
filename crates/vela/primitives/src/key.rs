//! Tunnel public keys.

use std::{fmt, str::FromStr};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Why a string was rejected as a tunnel key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KeyFormatError {
    /// Wrong encoded length.
    #[error("expected {expected} characters, got {actual}")]
    Length { expected: usize, actual: usize },
    /// Not valid padded base64.
    #[error("not valid padded base64")]
    Encoding,
    /// Decodes to the wrong number of bytes, or not in canonical form.
    #[error("not a canonical 32-byte key")]
    NonCanonical,
}

/// A tunnel peer public key.
///
/// 32 bytes, written as 44 characters of standard base64 with `=` padding.
/// Only the canonical encoding is accepted, so two distinct strings never
/// name the same key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerKey([u8; 32]);

impl PeerKey {
    /// Length of the canonical encoding.
    pub const ENCODED_LEN: usize = 44;

    /// Create a key from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Canonical base64 encoding.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl FromStr for PeerKey {
    type Err = KeyFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != Self::ENCODED_LEN {
            return Err(KeyFormatError::Length {
                expected: Self::ENCODED_LEN,
                actual: s.len(),
            });
        }
        if !s.ends_with('=') {
            return Err(KeyFormatError::Encoding);
        }

        let decoded = STANDARD.decode(s).map_err(|_| KeyFormatError::Encoding)?;
        let bytes: [u8; 32] = decoded
            .try_into()
            .map_err(|_| KeyFormatError::NonCanonical)?;

        let key = Self(bytes);
        if key.to_base64() != s {
            return Err(KeyFormatError::NonCanonical);
        }
        Ok(key)
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerKey({})", self.to_base64())
    }
}

impl Serialize for PeerKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PeerKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const VALID: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";

    #[test]
    fn test_parse_valid_key() {
        let key: PeerKey = VALID.parse().unwrap();
        assert_eq!(key.to_string(), VALID);
        assert_eq!(key.as_bytes().len(), 32);
    }

    #[test]
    fn test_reject_wrong_length() {
        assert_matches!(
            "not-a-valid-key".parse::<PeerKey>(),
            Err(KeyFormatError::Length { expected: 44, actual: 15 })
        );
    }

    #[test]
    fn test_reject_bad_alphabet() {
        let bad = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8D*=";
        assert_matches!(bad.parse::<PeerKey>(), Err(KeyFormatError::Encoding));
    }

    #[test]
    fn test_reject_unpadded() {
        let unpadded = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dgg";
        assert_matches!(unpadded.parse::<PeerKey>(), Err(KeyFormatError::Encoding));
    }

    #[test]
    fn test_reject_non_canonical_trailing_bits() {
        // Same bytes as VALID but the unused low bits of the last symbol are set.
        let non_canonical = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dh=";
        assert!(non_canonical.parse::<PeerKey>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let key: PeerKey = VALID.parse().unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{VALID}\""));
        let back: PeerKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(serde_json::from_str::<PeerKey>("\"short\"").is_err());
    }
}
