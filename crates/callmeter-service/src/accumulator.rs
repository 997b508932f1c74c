//! Per-call usage accumulation.
//!
//! Pipeline stages report usage concurrently while a call is live. Each call
//! gets a [`CallMeter`] holding one atomic counter per [`UsageKind`]; reports
//! are lock-free adds taken under the shared side of a freeze gate. Freezing
//! takes the exclusive side, so it waits out in-flight reports and every
//! report after it is rejected.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use callmeter_core::{BillingError, CallId, Result, UsageCounters, UsageKind};

/// Usage counters of one live call.
#[derive(Debug)]
pub struct CallMeter {
    counters: [AtomicU64; 4],
    /// `Some` once frozen; holds the snapshot every later freeze returns.
    frozen: RwLock<Option<UsageCounters>>,
    last_activity_ms: AtomicI64,
}

impl CallMeter {
    fn new(opened_at: DateTime<Utc>) -> Self {
        Self {
            counters: Default::default(),
            frozen: RwLock::new(None),
            last_activity_ms: AtomicI64::new(opened_at.timestamp_millis()),
        }
    }

    fn read_counters(&self) -> UsageCounters {
        UsageCounters::from_array(
            UsageKind::ALL.map(|kind| self.counters[kind.index()].load(Ordering::Acquire)),
        )
    }

    fn touch(&self, at: DateTime<Utc>) {
        self.last_activity_ms
            .fetch_max(at.timestamp_millis(), Ordering::Relaxed);
    }

    fn last_activity(&self) -> DateTime<Utc> {
        let millis = self.last_activity_ms.load(Ordering::Relaxed);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Registry of live call meters.
#[derive(Debug, Default)]
pub struct UsageAccumulator {
    meters: DashMap<CallId, Arc<CallMeter>>,
}

impl UsageAccumulator {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start metering a call.
    ///
    /// Returns `false` if the call already has a meter; its counters are kept.
    pub fn open(&self, call_id: CallId, opened_at: DateTime<Utc>) -> bool {
        let mut inserted = false;
        self.meters.entry(call_id).or_insert_with(|| {
            inserted = true;
            Arc::new(CallMeter::new(opened_at))
        });
        inserted
    }

    fn meter(&self, call_id: &CallId) -> Result<Arc<CallMeter>> {
        self.meters
            .get(call_id)
            .map(|meter| meter.value().clone())
            .ok_or_else(|| BillingError::CallNotFound(call_id.to_string()))
    }

    /// Add `quantity` to one counter of a call and return the new total.
    ///
    /// # Errors
    ///
    /// - `CallNotFound` if the call has no meter.
    /// - `CallAlreadyClosed` if the call was frozen.
    pub fn report(&self, call_id: &CallId, kind: UsageKind, quantity: u64) -> Result<u64> {
        let meter = self.meter(call_id)?;
        let gate = meter.frozen.read();
        if gate.is_some() {
            return Err(BillingError::CallAlreadyClosed {
                call_id: call_id.to_string(),
            });
        }

        let counter = &meter.counters[kind.index()];
        let mut current = counter.load(Ordering::Relaxed);
        let total = loop {
            let next = current.saturating_add(quantity);
            match counter.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break next,
                Err(actual) => current = actual,
            }
        };
        drop(gate);

        meter.touch(Utc::now());
        Ok(total)
    }

    /// Consistent point-in-time read of a call's counters.
    ///
    /// For a frozen call this is the frozen snapshot.
    ///
    /// # Errors
    ///
    /// Returns `CallNotFound` if the call has no meter.
    pub fn snapshot(&self, call_id: &CallId) -> Result<UsageCounters> {
        let meter = self.meter(call_id)?;
        // Exclusive side: no report is half-applied while we read.
        let gate = meter.frozen.write();
        Ok((*gate).unwrap_or_else(|| meter.read_counters()))
    }

    /// Stop accepting reports for a call and return its final counters.
    ///
    /// Freezing an already frozen call returns the same snapshot.
    ///
    /// # Errors
    ///
    /// Returns `CallNotFound` if the call has no meter.
    pub fn freeze(&self, call_id: &CallId) -> Result<UsageCounters> {
        let meter = self.meter(call_id)?;
        let mut gate = meter.frozen.write();
        if let Some(snapshot) = *gate {
            return Ok(snapshot);
        }

        let snapshot = meter.read_counters();
        *gate = Some(snapshot);
        tracing::debug!(call_id = %call_id, usage = ?snapshot, "Call usage frozen");
        Ok(snapshot)
    }

    /// Whether the call's meter is frozen. `None` if the call has no meter.
    #[must_use]
    pub fn is_frozen(&self, call_id: &CallId) -> Option<bool> {
        self.meters
            .get(call_id)
            .map(|meter| meter.frozen.read().is_some())
    }

    /// Forget a call's meter.
    pub fn remove(&self, call_id: &CallId) -> Option<UsageCounters> {
        self.meters.remove(call_id).map(|(_, meter)| {
            let gate = meter.frozen.read();
            (*gate).unwrap_or_else(|| meter.read_counters())
        })
    }

    /// When the call was opened or last reported usage.
    #[must_use]
    pub fn last_activity(&self, call_id: &CallId) -> Option<DateTime<Utc>> {
        self.meters
            .get(call_id)
            .map(|meter| meter.last_activity())
    }

    /// Calls that currently have a meter.
    #[must_use]
    pub fn open_calls(&self) -> Vec<CallId> {
        self.meters.iter().map(|entry| *entry.key()).collect()
    }
}
