//! Rate table service.
//!
//! Reads go to an in-memory snapshot of every rate record; writes go to the
//! store first and then replace the snapshot. Resolution never touches the
//! store and never blocks on a writer for longer than an `Arc` clone.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Deserialize;

use callmeter_core::pricing::resolve;
use callmeter_core::{
    default_rates, BillingError, ProviderSelection, RateId, RateRecord, ResolvedRates, Result,
    ServiceKind, UnitType,
};
use callmeter_store::Store;

/// A request to add a price to the table.
#[derive(Debug, Clone, Deserialize)]
pub struct RateInput {
    /// Service being priced.
    pub kind: ServiceKind,
    /// Provider name.
    pub provider: String,
    /// Model name; omit to price every model of the provider.
    #[serde(default)]
    pub model: Option<String>,
    /// Price per unit.
    pub cost_per_unit: Decimal,
    /// Unit of the price; must match the service kind when given.
    #[serde(default)]
    pub unit_type: Option<UnitType>,
    /// First instant the price applies; defaults to now.
    #[serde(default)]
    pub effective_from: Option<DateTime<Utc>>,
}

/// Time-windowed provider pricing.
pub struct RateTable {
    store: Arc<dyn Store>,
    snapshot: RwLock<Arc<Vec<RateRecord>>>,
    write_lock: Mutex<()>,
}

impl RateTable {
    /// Load every rate record from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn load(store: Arc<dyn Store>) -> Result<Self> {
        let records = store.list_rates()?;
        tracing::info!(rates = records.len(), "Rate table loaded");
        Ok(Self {
            store,
            snapshot: RwLock::new(Arc::new(records)),
            write_lock: Mutex::new(()),
        })
    }

    fn records(&self) -> Arc<Vec<RateRecord>> {
        self.snapshot.read().clone()
    }

    fn reload(&self) -> Result<()> {
        let records = self.store.list_rates()?;
        *self.snapshot.write() = Arc::new(records);
        Ok(())
    }

    /// The rate in force for a key at `at`.
    ///
    /// # Errors
    ///
    /// Returns `PricingNotConfigured` when no active record covers `at`.
    pub fn resolve(
        &self,
        kind: ServiceKind,
        provider: &str,
        model: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<RateRecord> {
        let records = self.records();
        resolve(records.iter(), kind, provider, model, at).cloned()
    }

    /// Resolve all five service kinds for a provider selection.
    ///
    /// # Errors
    ///
    /// Returns `PricingNotConfigured` for the first kind without a rate.
    pub fn resolve_selection(
        &self,
        selection: &ProviderSelection,
        at: DateTime<Utc>,
    ) -> Result<ResolvedRates> {
        let records = self.records();
        ResolvedRates::resolve(&records, selection, at)
    }

    /// Add a price.
    ///
    /// The open-ended record it follows for the same key gets its
    /// `effective_until` set to the new record's `effective_from`. When a
    /// later record already exists for the key, the new record ends where
    /// that one begins.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRate` for an invalid price or a unit type that does not
    /// fit the service kind.
    pub fn upsert_rate(&self, input: RateInput) -> Result<RateRecord> {
        if let Some(unit) = input.unit_type {
            if unit != input.kind.unit_type() {
                return Err(BillingError::InvalidRate(format!(
                    "{} rates are quoted {:?}, got {unit:?}",
                    input.kind,
                    input.kind.unit_type()
                )));
            }
        }

        let mut record = RateRecord::new(
            input.kind,
            input.provider,
            input.model,
            input.cost_per_unit,
            input.effective_from.unwrap_or_else(Utc::now),
        )?;

        let _guard = self.write_lock.lock();
        let records = self.records();

        let key = record.clone();
        let from = record.effective_from;
        let same_key = |existing: &&RateRecord| existing.active && existing.same_key(&key);

        record.effective_until = records
            .iter()
            .filter(same_key)
            .map(|existing| existing.effective_from)
            .filter(|start| *start > from)
            .min();

        let superseded: Vec<RateRecord> = records
            .iter()
            .filter(same_key)
            .filter(|existing| {
                existing.effective_from < from
                    && existing.effective_until.map_or(true, |until| until > from)
            })
            .map(|existing| RateRecord {
                effective_until: Some(from),
                ..existing.clone()
            })
            .collect();

        let mut batch = superseded;
        batch.push(record.clone());
        self.store.put_rates(&batch)?;
        self.reload()?;

        tracing::info!(
            rate_id = %record.id,
            kind = %record.kind,
            provider = %record.provider,
            model = ?record.model,
            cost_per_unit = %record.cost_per_unit,
            effective_from = %record.effective_from,
            superseded = batch.len() - 1,
            "Rate upserted"
        );

        Ok(record)
    }

    /// Take a record out of resolution. The record itself is kept.
    ///
    /// # Errors
    ///
    /// Returns `RateNotFound` if no record has the id.
    pub fn deactivate_rate(&self, rate_id: &RateId) -> Result<RateRecord> {
        let _guard = self.write_lock.lock();
        let mut record = self
            .store
            .get_rate(rate_id)?
            .ok_or_else(|| BillingError::RateNotFound(rate_id.to_string()))?;

        if record.active {
            record.active = false;
            self.store.put_rates(std::slice::from_ref(&record))?;
            self.reload()?;
            tracing::info!(rate_id = %rate_id, kind = %record.kind, "Rate deactivated");
        }

        Ok(record)
    }

    /// List records, optionally of one kind, oldest first.
    #[must_use]
    pub fn list_rates(&self, kind: Option<ServiceKind>, include_inactive: bool) -> Vec<RateRecord> {
        self.records()
            .iter()
            .filter(|record| kind.map_or(true, |kind| record.kind == kind))
            .filter(|record| include_inactive || record.active)
            .cloned()
            .collect()
    }

    /// Write the default price list when the table is empty.
    ///
    /// Returns the number of records written.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub fn seed_default_rates(&self) -> Result<usize> {
        let _guard = self.write_lock.lock();
        if !self.records().is_empty() {
            return Ok(0);
        }

        let rates = default_rates();
        self.store.put_rates(&rates)?;
        self.reload()?;
        tracing::info!(rates = rates.len(), "Seeded default rates");
        Ok(rates.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callmeter_store::MemoryStore;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn table() -> RateTable {
        RateTable::load(Arc::new(MemoryStore::new())).unwrap()
    }

    fn tts(cost: &str, from: DateTime<Utc>) -> RateInput {
        RateInput {
            kind: ServiceKind::Tts,
            provider: "elevenlabs".into(),
            model: Some("standard".into()),
            cost_per_unit: dec(cost),
            unit_type: None,
            effective_from: Some(from),
        }
    }

    #[test]
    fn resolution_follows_effective_windows() {
        let rates = table();
        rates.upsert_rate(tts("30", date(2024, 1, 1))).unwrap();
        rates.upsert_rate(tts("35", date(2024, 6, 1))).unwrap();

        let may = rates
            .resolve(ServiceKind::Tts, "elevenlabs", Some("standard"), date(2024, 5, 1))
            .unwrap();
        let july = rates
            .resolve(ServiceKind::Tts, "elevenlabs", Some("standard"), date(2024, 7, 1))
            .unwrap();

        assert_eq!(may.cost_per_unit, dec("30"));
        assert_eq!(july.cost_per_unit, dec("35"));
    }

    #[test]
    fn upsert_closes_the_previous_window() {
        let rates = table();
        let first = rates.upsert_rate(tts("30", date(2024, 1, 1))).unwrap();
        rates.upsert_rate(tts("35", date(2024, 6, 1))).unwrap();

        let stored = rates
            .list_rates(Some(ServiceKind::Tts), true)
            .into_iter()
            .find(|r| r.id == first.id)
            .unwrap();
        assert_eq!(stored.effective_until, Some(date(2024, 6, 1)));
    }

    #[test]
    fn backdated_insert_ends_at_the_next_record() {
        let rates = table();
        rates.upsert_rate(tts("35", date(2024, 6, 1))).unwrap();
        let backdated = rates.upsert_rate(tts("30", date(2024, 1, 1))).unwrap();

        assert_eq!(backdated.effective_until, Some(date(2024, 6, 1)));
        let july = rates
            .resolve(ServiceKind::Tts, "elevenlabs", Some("standard"), date(2024, 7, 1))
            .unwrap();
        assert_eq!(july.cost_per_unit, dec("35"));
    }

    #[test]
    fn missing_rate_is_pricing_not_configured() {
        let rates = table();
        let result = rates.resolve(ServiceKind::Stt, "deepgram", Some("nova-2"), Utc::now());
        assert!(matches!(
            result,
            Err(BillingError::PricingNotConfigured { kind: ServiceKind::Stt, .. })
        ));
    }

    #[test]
    fn unit_type_must_fit_kind() {
        let rates = table();
        let mut input = tts("30", date(2024, 1, 1));
        input.unit_type = Some(UnitType::PerMinute);
        assert!(matches!(
            rates.upsert_rate(input),
            Err(BillingError::InvalidRate(_))
        ));

        let mut input = tts("30", date(2024, 1, 1));
        input.unit_type = Some(UnitType::PerMillionCharacters);
        assert!(rates.upsert_rate(input).is_ok());
    }

    #[test]
    fn negative_and_overly_precise_prices_are_rejected() {
        let rates = table();
        assert!(rates.upsert_rate(tts("-1", date(2024, 1, 1))).is_err());
        assert!(rates.upsert_rate(tts("0.0000001", date(2024, 1, 1))).is_err());
    }

    #[test]
    fn deactivated_rates_stop_resolving() {
        let rates = table();
        let record = rates.upsert_rate(tts("30", date(2024, 1, 1))).unwrap();

        let deactivated = rates.deactivate_rate(&record.id).unwrap();
        assert!(!deactivated.active);
        assert!(rates
            .resolve(ServiceKind::Tts, "elevenlabs", Some("standard"), Utc::now())
            .is_err());
        assert!(rates.list_rates(None, false).is_empty());
        assert_eq!(rates.list_rates(None, true).len(), 1);

        assert!(matches!(
            rates.deactivate_rate(&RateId::generate()),
            Err(BillingError::RateNotFound(_))
        ));
    }

    #[test]
    fn seeding_only_fills_an_empty_table() {
        let rates = table();
        let seeded = rates.seed_default_rates().unwrap();
        assert_eq!(seeded, 10);
        assert_eq!(rates.seed_default_rates().unwrap(), 0);

        let resolved = rates
            .resolve_selection(&ProviderSelection::default(), Utc::now())
            .unwrap();
        assert_eq!(resolved.llm_input.cost_per_unit, dec("0.15"));
        assert_eq!(resolved.telephony.cost_per_unit, dec("0.0085"));
    }

    #[test]
    fn table_survives_reload_from_store() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let rates = RateTable::load(store.clone()).unwrap();
        rates.upsert_rate(tts("30", date(2024, 1, 1))).unwrap();

        let reloaded = RateTable::load(store).unwrap();
        assert_eq!(reloaded.list_rates(Some(ServiceKind::Tts), false).len(), 1);
    }
}
