//! Fixed-point money helpers.
//!
//! Balances and stored costs carry 4 fractional digits, rates carry 6, and
//! top-up amounts carry 2. Intermediate arithmetic runs at full `Decimal`
//! precision; rounding happens only when a value is stored.

use rust_decimal::{Decimal, RoundingStrategy};

/// Fractional digits of stored balances, ledger amounts and call costs.
pub const MONEY_SCALE: u32 = 4;

/// Fractional digits of rate records.
pub const RATE_SCALE: u32 = 6;

/// Fractional digits accepted for top-up amounts.
pub const TOPUP_SCALE: u32 = 2;

/// Default currency for new wallets.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Round a value to the stored money scale.
#[must_use]
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a value to the rate scale.
#[must_use]
pub fn round_rate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(RATE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Whether `value` fits in `scale` fractional digits without rounding.
#[must_use]
pub fn fits_scale(value: Decimal, scale: u32) -> bool {
    value.normalize().scale() <= scale
}
