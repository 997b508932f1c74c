//! Call cost calculation.
//!
//! Pure arithmetic over frozen usage and resolved rates. Components are kept
//! at full precision in [`CostComponents`] and rounded once, to the money
//! scale, when converted into a stored [`CallCostBreakdown`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::money::round_money;
use crate::pricing::{RateRecord, ResolvedRates};
use crate::usage::{CallRecord, UsageCounters};

/// Platform fee applied when none is configured (7.00%).
pub const DEFAULT_PLATFORM_FEE_PERCENTAGE: Decimal = Decimal::from_parts(700, 0, 0, false, 2);

/// Average language-model prompt tokens per minute of conversation.
pub const ESTIMATE_INPUT_TOKENS_PER_MINUTE: u64 = 150;

/// Average language-model completion tokens per minute of conversation.
pub const ESTIMATE_OUTPUT_TOKENS_PER_MINUTE: u64 = 100;

/// Average synthesized characters per minute of conversation.
pub const ESTIMATE_TTS_CHARACTERS_PER_MINUTE: u64 = 120;

/// Unrounded cost components of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostComponents {
    /// Language-model cost.
    pub llm_cost: Decimal,
    /// Text-to-speech cost.
    pub tts_cost: Decimal,
    /// Speech-to-text cost.
    pub stt_cost: Decimal,
    /// Telephony cost.
    pub telephony_cost: Decimal,
    /// Sum of the four service costs.
    pub base_cost: Decimal,
    /// `base_cost * platform_fee_percentage / 100`.
    pub platform_fee: Decimal,
    /// Fee percentage used.
    pub platform_fee_percentage: Decimal,
    /// `base_cost + platform_fee`.
    pub total_cost: Decimal,
}

impl CostComponents {
    /// Round every component to the money scale.
    ///
    /// Each stored figure is rounded from its exact value, so the stored
    /// total is the rounded exact total rather than a sum of rounded parts.
    #[must_use]
    pub fn rounded(&self) -> CallCostBreakdown {
        CallCostBreakdown {
            llm_cost: round_money(self.llm_cost),
            tts_cost: round_money(self.tts_cost),
            stt_cost: round_money(self.stt_cost),
            telephony_cost: round_money(self.telephony_cost),
            base_cost: round_money(self.base_cost),
            platform_fee: round_money(self.platform_fee),
            platform_fee_percentage: self.platform_fee_percentage,
            total_cost: round_money(self.total_cost),
        }
    }
}

/// Stored cost breakdown of a call, 4 fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallCostBreakdown {
    /// Language-model cost (input plus output).
    pub llm_cost: Decimal,
    /// Text-to-speech cost.
    pub tts_cost: Decimal,
    /// Speech-to-text cost.
    pub stt_cost: Decimal,
    /// Telephony cost.
    pub telephony_cost: Decimal,
    /// Sum of the service costs.
    pub base_cost: Decimal,
    /// Platform fee on top of the base cost.
    pub platform_fee: Decimal,
    /// Fee percentage the platform fee was computed with.
    pub platform_fee_percentage: Decimal,
    /// Amount charged to the wallet.
    pub total_cost: Decimal,
}

/// Price a call.
///
/// STT is billed on the reported transcription seconds, falling back to the
/// call duration when no stage reported any. Telephony is billed on the call
/// duration.
#[must_use]
pub fn compute(
    usage: &UsageCounters,
    duration_seconds: u64,
    rates: &ResolvedRates,
    platform_fee_percentage: Decimal,
) -> CostComponents {
    let priced = |quantity: u64, rate: &RateRecord| {
        rate.unit_type.units(quantity) * rate.cost_per_unit
    };

    let llm_cost = priced(usage.llm_input_tokens, &rates.llm_input)
        + priced(usage.llm_output_tokens, &rates.llm_output);
    let tts_cost = priced(usage.tts_characters, &rates.tts);
    let stt_cost = priced(
        CallRecord::billable_stt_seconds(usage, duration_seconds),
        &rates.stt,
    );
    let telephony_cost = priced(duration_seconds, &rates.telephony);

    let base_cost = llm_cost + tts_cost + stt_cost + telephony_cost;
    let platform_fee = base_cost * platform_fee_percentage / Decimal::ONE_HUNDRED;

    CostComponents {
        llm_cost,
        tts_cost,
        stt_cost,
        telephony_cost,
        base_cost,
        platform_fee,
        platform_fee_percentage,
        total_cost: base_cost + platform_fee,
    }
}

/// Typical usage of a call lasting `duration_seconds`, for cost estimates.
#[must_use]
pub fn estimate_usage(duration_seconds: u64) -> UsageCounters {
    let per_minute = |rate: u64| duration_seconds.saturating_mul(rate) / 60;
    UsageCounters {
        llm_input_tokens: per_minute(ESTIMATE_INPUT_TOKENS_PER_MINUTE),
        llm_output_tokens: per_minute(ESTIMATE_OUTPUT_TOKENS_PER_MINUTE),
        tts_characters: per_minute(ESTIMATE_TTS_CHARACTERS_PER_MINUTE),
        stt_seconds: duration_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::{default_rates, ProviderSelection};
    use chrono::Utc;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn default_resolved() -> ResolvedRates {
        ResolvedRates::resolve(&default_rates(), &ProviderSelection::default(), Utc::now()).unwrap()
    }

    #[test]
    fn two_minute_call_breakdown() {
        let usage = UsageCounters {
            llm_input_tokens: 300,
            llm_output_tokens: 200,
            tts_characters: 240,
            stt_seconds: 120,
        };

        let exact = compute(&usage, 120, &default_resolved(), DEFAULT_PLATFORM_FEE_PERCENTAGE);
        assert_eq!(exact.llm_cost, dec("0.000165"));
        assert_eq!(exact.tts_cost, dec("0.0072"));
        assert_eq!(exact.stt_cost, dec("0.0196"));
        assert_eq!(exact.telephony_cost, dec("0.017"));
        assert_eq!(exact.base_cost, dec("0.043965"));
        assert_eq!(exact.platform_fee, dec("0.00307755"));
        assert_eq!(exact.total_cost, dec("0.04704255"));

        let stored = exact.rounded();
        assert_eq!(stored.llm_cost, dec("0.0002"));
        assert_eq!(stored.tts_cost, dec("0.0072"));
        assert_eq!(stored.stt_cost, dec("0.0196"));
        assert_eq!(stored.telephony_cost, dec("0.0170"));
        assert_eq!(stored.base_cost, dec("0.0440"));
        assert_eq!(stored.platform_fee, dec("0.0031"));
        assert_eq!(stored.platform_fee_percentage, dec("7.00"));
        assert_eq!(stored.total_cost, dec("0.0470"));
    }

    #[test]
    fn missing_stt_report_bills_call_duration() {
        let usage = UsageCounters {
            llm_input_tokens: 300,
            llm_output_tokens: 200,
            tts_characters: 240,
            stt_seconds: 0,
        };
        let exact = compute(&usage, 120, &default_resolved(), DEFAULT_PLATFORM_FEE_PERCENTAGE);
        assert_eq!(exact.stt_cost, dec("0.0196"));
    }

    #[test]
    fn zero_usage_costs_nothing() {
        let exact = compute(&UsageCounters::default(), 0, &default_resolved(), DEFAULT_PLATFORM_FEE_PERCENTAGE);
        assert_eq!(exact.total_cost, Decimal::ZERO);
        assert_eq!(exact.rounded().total_cost, Decimal::ZERO);
    }

    #[test]
    fn fee_percentage_is_applied_to_base() {
        let usage = UsageCounters::default();
        let exact = compute(&usage, 600, &default_resolved(), dec("10"));
        // 10 minutes of telephony (0.085) and STT (0.098)
        assert_eq!(exact.base_cost, dec("0.183"));
        assert_eq!(exact.platform_fee, dec("0.0183"));
        assert_eq!(exact.total_cost, dec("0.2013"));
    }

    #[test]
    fn estimate_uses_per_minute_averages() {
        let usage = estimate_usage(90);
        assert_eq!(usage.llm_input_tokens, 225);
        assert_eq!(usage.llm_output_tokens, 150);
        assert_eq!(usage.tts_characters, 180);
        assert_eq!(usage.stt_seconds, 90);
    }
}
