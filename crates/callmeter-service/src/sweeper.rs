//! Stale call sweep.
//!
//! A call whose pipeline disconnected without ending it would otherwise stay
//! open forever. The sweeper periodically settles open calls that have been
//! idle for too long, billing the usage accumulated so far and the time up to
//! the last report. Calls stuck in `freezing` (a settlement deferred by a busy
//! wallet) are retried on every pass.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::watch;

use callmeter_core::{CallRecord, CallState, Result};

use crate::settlement::SettlementEngine;

/// Calls settled concurrently per pass.
const SWEEP_CONCURRENCY: usize = 8;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Active calls inspected.
    pub examined: usize,
    /// Calls the pass settled or failed.
    pub settled: usize,
    /// Calls whose settlement errored and stay active.
    pub errors: usize,
}

/// Background settlement of abandoned calls.
pub struct StaleCallSweeper {
    engine: Arc<SettlementEngine>,
    stale_after: chrono::Duration,
    interval: Duration,
}

impl StaleCallSweeper {
    /// Create a sweeper.
    #[must_use]
    pub fn new(engine: Arc<SettlementEngine>, stale_after: Duration, interval: Duration) -> Self {
        Self {
            engine,
            stale_after: chrono::Duration::from_std(stale_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX))),
            interval,
        }
    }

    /// The billable duration of an idle call: start to last activity.
    ///
    /// A call without a meter (opened before a restart, no report since) has
    /// no known activity and is billed zero seconds.
    fn idle_duration(&self, call: &CallRecord, now: DateTime<Utc>) -> Option<u64> {
        match call.state {
            CallState::Freezing => Some(call.duration_seconds.unwrap_or_default()),
            CallState::Open => {
                let metered = self.engine.last_activity(&call.id);
                let last = metered.unwrap_or(call.started_at);
                if now - last < self.stale_after {
                    return None;
                }
                if metered.is_none() {
                    tracing::warn!(
                        call_id = %call.id,
                        started_at = %call.started_at,
                        "Stale call has no meter, billing zero duration"
                    );
                }
                Some(
                    u64::try_from((last - call.started_at).num_seconds()).unwrap_or_default(),
                )
            }
            CallState::Settled | CallState::Failed => None,
        }
    }

    /// Settle every stale call once.
    ///
    /// # Errors
    ///
    /// Returns an error if the active calls cannot be listed. Failures of
    /// individual calls are counted in the report.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let active = self.engine.active_calls()?;
        let examined = active.len();

        let due: Vec<_> = active
            .iter()
            .filter_map(|call| self.idle_duration(call, now).map(|d| (call.id, d)))
            .collect();

        let settled = AtomicUsize::new(0);
        let errors = AtomicUsize::new(0);

        stream::iter(due)
            .for_each_concurrent(SWEEP_CONCURRENCY, |(call_id, duration)| {
                let settled = &settled;
                let errors = &errors;
                async move {
                    match self.engine.end_call(&call_id, duration).await {
                        Ok(call) => {
                            tracing::info!(
                                call_id = %call_id,
                                state = %call.state,
                                duration_seconds = duration,
                                "Stale call settled"
                            );
                            settled.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) if e.is_transient() => {
                            tracing::warn!(call_id = %call_id, error = %e, "Stale call settlement deferred");
                            errors.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            // Settlement already recorded the failure on the call.
                            tracing::error!(call_id = %call_id, error = %e, "Stale call settlement failed");
                            settled.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
            .await;

        let report = SweepReport {
            examined,
            settled: settled.into_inner(),
            errors: errors.into_inner(),
        };
        if report.settled > 0 || report.errors > 0 {
            tracing::info!(
                examined = report.examined,
                settled = report.settled,
                errors = report.errors,
                "Sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep every interval until `shutdown` turns true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            stale_after_secs = self.stale_after.num_seconds(),
            "Stale call sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once(Utc::now()).await {
                        tracing::error!(error = %e, "Sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Stale call sweeper stopped");
                        return;
                    }
                }
            }
        }
    }
}
