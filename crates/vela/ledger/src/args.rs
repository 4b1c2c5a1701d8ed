//! CLI arguments for the settlement ledger.

use alloy_primitives::{Address, U256};
use clap::Args;
use serde::{Deserialize, Serialize};

/// Default protocol fee, in basis points.
pub const DEFAULT_FEE_BPS: u16 = 100;

/// Default reputation lost per slash.
pub const DEFAULT_REPUTATION_PENALTY: u8 = 50;

const TOKEN: u64 = 1_000_000_000_000_000_000;

/// 1000 tokens.
pub fn default_min_stake() -> U256 {
    U256::from(1_000u64) * U256::from(TOKEN)
}

/// 100 tokens.
pub fn default_slash_amount() -> U256 {
    U256::from(100u64) * U256::from(TOKEN)
}

/// 0.000001 token.
pub fn default_min_payment() -> U256 {
    U256::from(1_000_000_000_000u64)
}

/// One token per 10^9 bytes.
pub fn default_price_per_byte() -> U256 {
    U256::from(1_000_000_000u64)
}

/// How stream ids are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamIdPolicy {
    /// `keccak(sender, recipient, start_time)`; a second stream for the same
    /// pair within the same second is rejected.
    #[default]
    Reject,
    /// Mix a per-pair sequence number into the id.
    Nonce,
}

/// Settlement ledger arguments. Amounts are in token base units.
#[derive(Debug, Args, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[command(next_help_heading = "Ledger")]
#[serde(default)]
pub struct LedgerArgs {
    /// Minimum stake to register a node
    #[arg(long = "ledger.min-stake", default_value_t = default_min_stake())]
    pub min_stake: U256,

    /// Stake removed per slash (clamped to the remaining stake)
    #[arg(long = "ledger.slash-amount", default_value_t = default_slash_amount())]
    pub slash_amount: U256,

    /// Reputation removed per slash
    #[arg(long = "ledger.reputation-penalty", default_value_t = DEFAULT_REPUTATION_PENALTY)]
    pub reputation_penalty: u8,

    /// Protocol fee in basis points
    #[arg(long = "ledger.fee-bps", default_value_t = DEFAULT_FEE_BPS)]
    pub fee_bps: u16,

    /// Smallest payment ticket accepted
    #[arg(long = "ledger.min-payment", default_value_t = default_min_payment())]
    pub min_payment: U256,

    /// Price charged per reported byte
    #[arg(long = "ledger.price-per-byte", default_value_t = default_price_per_byte())]
    pub price_per_byte: U256,

    /// Stream id derivation
    #[arg(long = "ledger.stream-ids", value_enum, default_value_t = StreamIdPolicy::Reject)]
    pub stream_id_policy: StreamIdPolicy,

    /// Account paying for reported usage
    #[arg(long = "ledger.payer", default_value_t = Address::ZERO)]
    pub payer: Address,
}

impl Default for LedgerArgs {
    fn default() -> Self {
        Self {
            min_stake: default_min_stake(),
            slash_amount: default_slash_amount(),
            reputation_penalty: DEFAULT_REPUTATION_PENALTY,
            fee_bps: DEFAULT_FEE_BPS,
            min_payment: default_min_payment(),
            price_per_byte: default_price_per_byte(),
            stream_id_policy: StreamIdPolicy::default(),
            payer: Address::ZERO,
        }
    }
}

impl LedgerArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.fee_bps > 10_000 {
            return Err(format!("ledger.fee-bps must be at most 10000, got {}", self.fee_bps));
        }
        if self.reputation_penalty > 100 {
            return Err("ledger.reputation-penalty must be at most 100".to_string());
        }
        if self.price_per_byte.is_zero() {
            return Err("ledger.price-per-byte must be positive".to_string());
        }
        Ok(())
    }
}
