//! Time-windowed provider pricing for callmeter.
//!
//! Rates are kept as an append-mostly history of [`RateRecord`]s. Resolution
//! picks the record in force at a given instant; records are never deleted so
//! settled calls stay auditable.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{BillingError, Result};
use crate::money::{fits_scale, DEFAULT_CURRENCY, RATE_SCALE};
use crate::RateId;

/// A billable pipeline service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Language-model prompt tokens.
    LlmInput,
    /// Language-model completion tokens.
    LlmOutput,
    /// Text-to-speech characters.
    Tts,
    /// Speech-to-text audio duration.
    Stt,
    /// Carrier minutes.
    Telephony,
}

impl ServiceKind {
    /// All service kinds, in breakdown order.
    pub const ALL: [Self; 5] = [
        Self::LlmInput,
        Self::LlmOutput,
        Self::Tts,
        Self::Stt,
        Self::Telephony,
    ];

    /// The unit a rate for this service must be quoted in.
    #[must_use]
    pub const fn unit_type(&self) -> UnitType {
        match self {
            Self::LlmInput | Self::LlmOutput => UnitType::PerMillionTokens,
            Self::Tts => UnitType::PerMillionCharacters,
            Self::Stt | Self::Telephony => UnitType::PerMinute,
        }
    }

    /// Stable wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LlmInput => "llm_input",
            Self::LlmOutput => "llm_output",
            Self::Tts => "tts",
            Self::Stt => "stt",
            Self::Telephony => "telephony",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| BillingError::InvalidRate(format!("unknown service kind: {s}")))
    }
}

/// Unit a rate is quoted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    /// Price per one million tokens.
    PerMillionTokens,
    /// Price per one million characters.
    PerMillionCharacters,
    /// Price per minute.
    PerMinute,
}

impl UnitType {
    /// Convert a raw quantity (tokens, characters or seconds) to billable units.
    #[must_use]
    pub fn units(&self, quantity: u64) -> Decimal {
        let quantity = Decimal::from(quantity);
        match self {
            Self::PerMillionTokens | Self::PerMillionCharacters => {
                quantity / Decimal::from(1_000_000u32)
            }
            Self::PerMinute => quantity / Decimal::from(60u32),
        }
    }
}

/// A unit price for one (service kind, provider, model) key over a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRecord {
    /// Record identifier.
    pub id: RateId,

    /// Service being priced.
    pub kind: ServiceKind,

    /// Provider name (e.g. "openai", "twilio").
    pub provider: String,

    /// Model name. `None` matches any model of the provider.
    pub model: Option<String>,

    /// Price per unit, 6 fractional digits.
    pub cost_per_unit: Decimal,

    /// Unit the price is quoted in.
    pub unit_type: UnitType,

    /// Currency of the price.
    pub currency: String,

    /// First instant the record applies to (inclusive).
    pub effective_from: DateTime<Utc>,

    /// Instant the record stops applying (exclusive), set when superseded.
    pub effective_until: Option<DateTime<Utc>>,

    /// Inactive records are ignored by resolution.
    pub active: bool,

    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl RateRecord {
    /// Create a new active rate record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRate` for a negative price, a price with more than 6
    /// fractional digits, or an empty provider.
    pub fn new(
        kind: ServiceKind,
        provider: impl Into<String>,
        model: Option<String>,
        cost_per_unit: Decimal,
        effective_from: DateTime<Utc>,
    ) -> Result<Self> {
        let provider = provider.into().trim().to_lowercase();
        if provider.is_empty() {
            return Err(BillingError::InvalidRate("provider is required".into()));
        }
        if cost_per_unit.is_sign_negative() {
            return Err(BillingError::InvalidRate(format!(
                "cost_per_unit cannot be negative: {cost_per_unit}"
            )));
        }
        if !fits_scale(cost_per_unit, RATE_SCALE) {
            return Err(BillingError::InvalidRate(format!(
                "cost_per_unit has more than {RATE_SCALE} fractional digits: {cost_per_unit}"
            )));
        }

        Ok(Self {
            id: RateId::generate(),
            kind,
            provider,
            model: model.map(|m| m.trim().to_string()).filter(|m| !m.is_empty()),
            cost_per_unit,
            unit_type: kind.unit_type(),
            currency: DEFAULT_CURRENCY.to_string(),
            effective_from,
            effective_until: None,
            active: true,
            created_at: Utc::now(),
        })
    }

    /// Whether the record is active and its window contains `at`.
    #[must_use]
    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        self.active
            && self.effective_from <= at
            && self.effective_until.map_or(true, |until| until > at)
    }

    /// Whether `unit_type` is the unit its service kind is quoted in.
    #[must_use]
    pub fn unit_matches_kind(&self) -> bool {
        self.unit_type == self.kind.unit_type()
    }

    /// Whether the record shares a (kind, provider, model) key with another.
    #[must_use]
    pub fn same_key(&self, other: &Self) -> bool {
        self.kind == other.kind && self.provider == other.provider && self.model == other.model
    }

    /// Match specificity for a query: 2 for an exact model, 1 for a wildcard, `None` for no match.
    fn specificity(&self, kind: ServiceKind, provider: &str, model: Option<&str>) -> Option<u8> {
        if self.kind != kind || !self.provider.eq_ignore_ascii_case(provider) {
            return None;
        }
        match (self.model.as_deref(), model) {
            (None, _) | (Some(_), None) => Some(1),
            (Some(have), Some(want)) if have == want => Some(2),
            (Some(_), Some(_)) => None,
        }
    }
}

/// Resolve the rate in force for a key at `at`.
///
/// Among active records whose window contains `at`, an exact model match wins
/// over a wildcard record; within equal specificity the latest
/// `effective_from` wins.
///
/// # Errors
///
/// Returns `PricingNotConfigured` when no record applies.
pub fn resolve<'a>(
    records: impl IntoIterator<Item = &'a RateRecord>,
    kind: ServiceKind,
    provider: &str,
    model: Option<&str>,
    at: DateTime<Utc>,
) -> Result<&'a RateRecord> {
    records
        .into_iter()
        .filter(|record| record.is_effective_at(at))
        .filter_map(|record| {
            record
                .specificity(kind, provider, model)
                .map(|rank| (rank, record))
        })
        .max_by(|(rank_a, a), (rank_b, b)| {
            rank_a
                .cmp(rank_b)
                .then(a.effective_from.cmp(&b.effective_from))
                .then(a.created_at.cmp(&b.created_at))
        })
        .map(|(_, record)| record)
        .ok_or_else(|| BillingError::PricingNotConfigured {
            kind,
            provider: provider.to_string(),
            model: model.map(String::from),
        })
}

/// Provider and model chosen for each pipeline stage of a call.
///
/// Captured once at call start from the agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSelection {
    /// Language-model provider.
    pub llm_provider: String,
    /// Language-model name.
    pub llm_model: String,
    /// Text-to-speech provider.
    pub tts_provider: String,
    /// Text-to-speech model.
    pub tts_model: String,
    /// Speech-to-text provider.
    pub stt_provider: String,
    /// Speech-to-text model.
    pub stt_model: String,
    /// Telephony carrier.
    pub telephony_provider: String,
}

impl Default for ProviderSelection {
    fn default() -> Self {
        Self {
            llm_provider: "openai".into(),
            llm_model: "gpt-4o-mini".into(),
            tts_provider: "elevenlabs".into(),
            tts_model: "standard".into(),
            stt_provider: "deepgram".into(),
            stt_model: "nova-2".into(),
            telephony_provider: "twilio".into(),
        }
    }
}

impl ProviderSelection {
    /// The (provider, model) this selection uses for a service kind.
    #[must_use]
    pub fn for_kind(&self, kind: ServiceKind) -> (&str, Option<&str>) {
        match kind {
            ServiceKind::LlmInput | ServiceKind::LlmOutput => {
                (self.llm_provider.as_str(), Some(self.llm_model.as_str()))
            }
            ServiceKind::Tts => (self.tts_provider.as_str(), Some(self.tts_model.as_str())),
            ServiceKind::Stt => (self.stt_provider.as_str(), Some(self.stt_model.as_str())),
            ServiceKind::Telephony => (self.telephony_provider.as_str(), None),
        }
    }
}

/// The rate records a call is priced with, one per service kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRates {
    /// Language-model input rate.
    pub llm_input: RateRecord,
    /// Language-model output rate.
    pub llm_output: RateRecord,
    /// Text-to-speech rate.
    pub tts: RateRecord,
    /// Speech-to-text rate.
    pub stt: RateRecord,
    /// Telephony rate.
    pub telephony: RateRecord,
    /// Instant the rates were resolved for.
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedRates {
    /// Resolve every service kind of `selection` at `at`.
    ///
    /// # Errors
    ///
    /// Returns `PricingNotConfigured` for the first kind without a rate.
    pub fn resolve(
        records: &[RateRecord],
        selection: &ProviderSelection,
        at: DateTime<Utc>,
    ) -> Result<Self> {
        let pick = |kind: ServiceKind| {
            let (provider, model) = selection.for_kind(kind);
            resolve(records, kind, provider, model, at).cloned()
        };

        Ok(Self {
            llm_input: pick(ServiceKind::LlmInput)?,
            llm_output: pick(ServiceKind::LlmOutput)?,
            tts: pick(ServiceKind::Tts)?,
            stt: pick(ServiceKind::Stt)?,
            telephony: pick(ServiceKind::Telephony)?,
            resolved_at: at,
        })
    }
}

/// The default price list used to seed an empty rate table.
///
/// Records are effective from the Unix epoch so they cover any call.
#[must_use]
pub fn default_rates() -> Vec<RateRecord> {
    let epoch = Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now);
    let table: [(ServiceKind, &str, Option<&str>, i64, u32); 10] = [
        (ServiceKind::LlmInput, "openai", Some("gpt-4o"), 250, 2),
        (ServiceKind::LlmInput, "openai", Some("gpt-4o-mini"), 15, 2),
        (ServiceKind::LlmOutput, "openai", Some("gpt-4o"), 1000, 2),
        (ServiceKind::LlmOutput, "openai", Some("gpt-4o-mini"), 60, 2),
        (ServiceKind::Tts, "elevenlabs", Some("standard"), 3000, 2),
        (ServiceKind::Tts, "openai", Some("standard"), 1500, 2),
        (ServiceKind::Stt, "deepgram", Some("nova-2"), 98, 4),
        (ServiceKind::Stt, "openai", Some("whisper"), 6, 3),
        (ServiceKind::Telephony, "twilio", None, 85, 4),
        (ServiceKind::Telephony, "plivo", None, 70, 4),
    ];

    table
        .into_iter()
        .filter_map(|(kind, provider, model, mantissa, scale)| {
            RateRecord::new(
                kind,
                provider,
                model.map(String::from),
                Decimal::new(mantissa, scale),
                epoch,
            )
            .ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn rate(kind: ServiceKind, provider: &str, model: Option<&str>, cost: &str, from: DateTime<Utc>) -> RateRecord {
        RateRecord::new(kind, provider, model.map(String::from), dec(cost), from).unwrap()
    }

    #[test]
    fn resolves_latest_record_at_or_before_instant() {
        let records = vec![
            rate(ServiceKind::Tts, "elevenlabs", Some("standard"), "30", date(2024, 1, 1)),
            rate(ServiceKind::Tts, "elevenlabs", Some("standard"), "35", date(2024, 6, 1)),
        ];

        let may = resolve(&records, ServiceKind::Tts, "elevenlabs", Some("standard"), date(2024, 5, 1)).unwrap();
        assert_eq!(may.cost_per_unit, dec("30"));

        let july = resolve(&records, ServiceKind::Tts, "elevenlabs", Some("standard"), date(2024, 7, 1)).unwrap();
        assert_eq!(july.cost_per_unit, dec("35"));
    }

    #[test]
    fn window_start_is_inclusive_and_end_exclusive() {
        let mut old = rate(ServiceKind::Stt, "deepgram", Some("nova-2"), "0.0098", date(2024, 1, 1));
        old.effective_until = Some(date(2024, 3, 1));

        assert!(old.is_effective_at(date(2024, 1, 1)));
        assert!(!old.is_effective_at(date(2024, 3, 1)));
        assert!(resolve([&old], ServiceKind::Stt, "deepgram", Some("nova-2"), date(2024, 3, 1)).is_err());
    }

    #[test]
    fn inactive_and_future_records_are_ignored() {
        let mut disabled = rate(ServiceKind::Telephony, "twilio", None, "0.0085", date(2024, 1, 1));
        disabled.active = false;
        let future = rate(ServiceKind::Telephony, "twilio", None, "0.0100", date(2030, 1, 1));

        let err = resolve([&disabled, &future], ServiceKind::Telephony, "twilio", None, date(2025, 1, 1))
            .unwrap_err();
        assert!(matches!(err, BillingError::PricingNotConfigured { kind: ServiceKind::Telephony, .. }));
    }

    #[test]
    fn exact_model_beats_newer_wildcard() {
        let exact = rate(ServiceKind::LlmInput, "openai", Some("gpt-4o-mini"), "0.15", date(2024, 1, 1));
        let wildcard = rate(ServiceKind::LlmInput, "openai", None, "1.00", date(2024, 6, 1));

        let hit = resolve([&exact, &wildcard], ServiceKind::LlmInput, "openai", Some("gpt-4o-mini"), date(2024, 7, 1))
            .unwrap();
        assert_eq!(hit.cost_per_unit, dec("0.15"));

        let other = resolve([&exact, &wildcard], ServiceKind::LlmInput, "openai", Some("gpt-4o"), date(2024, 7, 1))
            .unwrap();
        assert_eq!(other.cost_per_unit, dec("1.00"));
    }

    #[test]
    fn other_models_do_not_match() {
        let records = [rate(ServiceKind::Tts, "openai", Some("standard"), "15", date(2024, 1, 1))];
        assert!(resolve(&records, ServiceKind::Tts, "openai", Some("hd"), date(2024, 2, 1)).is_err());
        assert!(resolve(&records, ServiceKind::Stt, "openai", Some("standard"), date(2024, 2, 1)).is_err());
    }

    #[test]
    fn rejects_malformed_rates() {
        assert!(RateRecord::new(ServiceKind::Tts, "x", None, dec("-1"), date(2024, 1, 1)).is_err());
        assert!(RateRecord::new(ServiceKind::Tts, "x", None, dec("0.0000001"), date(2024, 1, 1)).is_err());
        assert!(RateRecord::new(ServiceKind::Tts, " ", None, dec("1"), date(2024, 1, 1)).is_err());
    }

    #[test]
    fn unit_conversion() {
        assert_eq!(UnitType::PerMillionTokens.units(500_000), dec("0.5"));
        assert_eq!(UnitType::PerMinute.units(90), dec("1.5"));
    }

    #[test]
    fn default_rates_cover_default_selection() {
        let records = default_rates();
        assert_eq!(records.len(), 10);

        let resolved = ResolvedRates::resolve(&records, &ProviderSelection::default(), Utc::now()).unwrap();
        assert_eq!(resolved.llm_input.cost_per_unit, dec("0.15"));
        assert_eq!(resolved.llm_output.cost_per_unit, dec("0.60"));
        assert_eq!(resolved.tts.cost_per_unit, dec("30"));
        assert_eq!(resolved.stt.cost_per_unit, dec("0.0098"));
        assert_eq!(resolved.telephony.cost_per_unit, dec("0.0085"));
    }

    #[test]
    fn unit_type_follows_kind() {
        let record = rate(ServiceKind::Tts, "OpenAI", Some(" standard "), "15", date(2024, 1, 1));
        assert_eq!(record.unit_type, UnitType::PerMillionCharacters);
        assert_eq!(record.provider, "openai");
        assert_eq!(record.model.as_deref(), Some("standard"));
        assert!(record.unit_matches_kind());
    }

    #[test]
    fn service_kind_parses_wire_names() {
        assert_eq!("llm_output".parse::<ServiceKind>().unwrap(), ServiceKind::LlmOutput);
        assert!("video".parse::<ServiceKind>().is_err());
    }
}
