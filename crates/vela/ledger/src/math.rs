//! Integer arithmetic on token amounts.

use alloy_primitives::U256;

/// `floor(amount * num / den)` for `num <= den`, without overflowing.
fn mul_div_floor(amount: U256, num: u64, den: u64) -> U256 {
    debug_assert!(num <= den && den > 0);
    let num = U256::from(num);
    let den = U256::from(den);
    (amount / den) * num + (amount % den) * num / den
}

/// Amount vested after `elapsed` of `duration` seconds.
///
/// Linear and floored; the full amount once `elapsed >= duration`.
pub fn vested_amount(amount: U256, elapsed: u64, duration: u64) -> U256 {
    if duration == 0 || elapsed >= duration {
        return amount;
    }
    mul_div_floor(amount, elapsed, duration)
}

/// `floor(amount * bps / 10_000)`, with `bps` capped at 10 000.
pub fn basis_points(amount: U256, bps: u16) -> U256 {
    mul_div_floor(amount, u64::from(bps.min(10_000)), 10_000)
}
