//! Signed usage reports and payment tickets.
//!
//! A node claims delivered bandwidth with a [`UsageReport`], signed over the
//! EIP-712 hash of a [`UsageClaim`]:
//!
//! ```text
//! UsageClaim(address node,uint64 bandwidth,uint64 timestamp)
//! ```
//!
//! with domain name `"VelaUsage"`, version `"1"` and the configured chain id.
//! The ledger turns an accepted report into a [`PaymentTicket`], whose
//! [`PaymentId`] identifies it for idempotent settlement.

use alloy_primitives::{Address, B256, Bytes, Keccak256, Signature, U256};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};
use serde::{Deserialize, Serialize};

/// EIP-712 domain name for usage claims.
pub const DOMAIN_NAME: &str = "VelaUsage";

/// EIP-712 domain version for usage claims.
pub const DOMAIN_VERSION: &str = "1";

sol! {
    /// Typed payload signed by a node to claim delivered bandwidth.
    #[derive(Debug, PartialEq, Eq)]
    struct UsageClaim {
        address node;
        uint64 bandwidth;
        uint64 timestamp;
    }
}

/// Identity of a payment ticket.
pub type PaymentId = B256;

/// Build the EIP-712 domain for usage claims on `chain_id`.
pub fn usage_domain(chain_id: u64) -> Eip712Domain {
    eip712_domain! {
        name: DOMAIN_NAME,
        version: DOMAIN_VERSION,
        chain_id: chain_id,
    }
}

/// Signature problems on a report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportSignatureError {
    #[error("invalid signature: {0}")]
    Malformed(String),
    #[error("report signed by {actual}, expected {expected}")]
    WrongSigner { expected: Address, actual: Address },
}

/// A signed claim of bandwidth delivered since the last acknowledged report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub node: Address,
    /// Bytes received plus bytes sent.
    pub bandwidth: u64,
    pub timestamp: u64,
    /// ECDSA signature (65 bytes: r[32] + s[32] + v[1]); empty until signed.
    pub signature: Bytes,
}

impl UsageReport {
    /// A report with no signature yet.
    pub fn unsigned(node: Address, bandwidth: u64, timestamp: u64) -> Self {
        Self {
            node,
            bandwidth,
            timestamp,
            signature: Bytes::new(),
        }
    }

    /// Attach a signature.
    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = Bytes::copy_from_slice(&signature.as_bytes());
        self
    }

    /// The typed payload covered by the signature.
    pub fn claim(&self) -> UsageClaim {
        UsageClaim {
            node: self.node,
            bandwidth: self.bandwidth,
            timestamp: self.timestamp,
        }
    }

    /// EIP-712 signing hash on `chain_id`.
    pub fn signing_hash(&self, chain_id: u64) -> B256 {
        self.claim().eip712_signing_hash(&usage_domain(chain_id))
    }

    fn parse_signature(&self) -> Result<Signature, ReportSignatureError> {
        if self.signature.len() != 65 {
            return Err(ReportSignatureError::Malformed(format!(
                "expected 65 bytes, got {}",
                self.signature.len()
            )));
        }
        Signature::try_from(self.signature.as_ref())
            .map_err(|e| ReportSignatureError::Malformed(e.to_string()))
    }

    /// Recover the address that signed this report.
    pub fn recover_signer(&self, chain_id: u64) -> Result<Address, ReportSignatureError> {
        let sig = self.parse_signature()?;
        sig.recover_address_from_prehash(&self.signing_hash(chain_id))
            .map_err(|e| ReportSignatureError::Malformed(format!("recovery failed: {e}")))
    }

    /// Check that the report was signed by the node it names.
    pub fn verify(&self, chain_id: u64) -> Result<(), ReportSignatureError> {
        let actual = self.recover_signer(chain_id)?;
        if actual != self.node {
            return Err(ReportSignatureError::WrongSigner {
                expected: self.node,
                actual,
            });
        }
        Ok(())
    }
}

/// A payment owed to a node for reported bandwidth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTicket {
    pub sender: Address,
    pub recipient: Address,
    pub amount: U256,
    pub bandwidth: u64,
    pub timestamp: u64,
    pub signature: Bytes,
}

impl PaymentTicket {
    /// `keccak256(sender ‖ recipient ‖ amount ‖ timestamp)`, with amount and
    /// timestamp as 32-byte big-endian words.
    ///
    /// Bandwidth and signature are not part of the identity.
    pub fn id(&self) -> PaymentId {
        let mut hasher = Keccak256::new();
        hasher.update(self.sender);
        hasher.update(self.recipient);
        hasher.update(self.amount.to_be_bytes::<32>());
        hasher.update(U256::from(self.timestamp).to_be_bytes::<32>());
        hasher.finalize()
    }
}
