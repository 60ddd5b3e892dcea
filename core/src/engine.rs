//! The retention engine — one scheduler driving every sweep.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Health subsystem     — scores every active tenant
//!   2. Churn subsystem      — consumes this cycle's scores
//!   3. Playbook subsystem   — starts interventions, advances steps
//!   4. Expansion subsystem  — independent usage scan
//!
//! RULES:
//!   - Subsystems execute in registration order, every cycle.
//!   - No subsystem calls another subsystem's functions directly;
//!     later subsystems see earlier subsystems' events for the cycle.
//!   - Every emitted event is appended to the event log.
//!   - Per-tenant failures stay inside the sweep that hit them.

use crate::{
    churn_subsystem::ChurnSubsystem,
    clock::SweepClock,
    config::EngineConfig,
    error::EngineResult,
    event::{event_type_name, EventLogEntry, RetentionEvent},
    expansion_subsystem::ExpansionSubsystem,
    health_subsystem::HealthSubsystem,
    playbook_subsystem::PlaybookSubsystem,
    store::RetentionStore,
    subsystem::SweepSubsystem,
    types::CycleId,
};
use chrono::{DateTime, Duration, Utc};

pub struct RetentionEngine {
    pub clock: SweepClock,
    store: RetentionStore,
    subsystems: Vec<Box<dyn SweepSubsystem>>,
}

impl RetentionEngine {
    /// Build a fully wired engine with all sweeps registered in the
    /// documented execution order.
    pub fn build(store: RetentionStore, config: EngineConfig, start: DateTime<Utc>) -> Self {
        let subsystems: Vec<Box<dyn SweepSubsystem>> = vec![
            Box::new(HealthSubsystem::new(config.clone())),
            Box::new(ChurnSubsystem::new(config.clone())),
            Box::new(PlaybookSubsystem::new()),
            Box::new(ExpansionSubsystem::new(config)),
        ];
        Self {
            clock: SweepClock::new(start),
            store,
            subsystems,
        }
    }

    /// Run one sweep cycle at the given instant.
    ///
    /// Advances the clock, executes each subsystem in order, persists
    /// every emitted event, and returns the cycle's events.
    pub fn run_cycle(&mut self, now: DateTime<Utc>) -> EngineResult<Vec<RetentionEvent>> {
        let cycle = self.clock.advance_to(now);
        let mut cycle_events: Vec<RetentionEvent> =
            vec![RetentionEvent::CycleStarted { cycle, at: now }];

        for subsystem in &mut self.subsystems {
            let new_events = subsystem.run_sweep(&self.store, &self.clock, &cycle_events)?;

            for event in &new_events {
                let entry = EventLogEntry {
                    id: None,
                    cycle,
                    subsystem: subsystem.name().to_string(),
                    event_type: event_type_name(event).to_string(),
                    payload: serde_json::to_string(event)?,
                    created_at: now,
                };
                self.store.append_event(&entry)?;
            }

            cycle_events.extend(new_events);
        }

        cycle_events.push(RetentionEvent::CycleCompleted { cycle, at: now });
        Ok(cycle_events)
    }

    /// Run `n` cycles spaced `step` apart. Used by the runner and for
    /// fast-forwarding in tests.
    pub fn run_cycles(&mut self, n: u64, step: Duration) -> EngineResult<()> {
        for _ in 0..n {
            let next = self.clock.now + step;
            self.run_cycle(next)?;
        }
        Ok(())
    }

    pub fn store(&self) -> &RetentionStore {
        &self.store
    }

    pub fn current_cycle(&self) -> CycleId {
        self.clock.cycle
    }

    // ── Query pass-throughs for the runner and tests ───────────

    pub fn store_events_for_cycle(&self, cycle: CycleId) -> EngineResult<Vec<EventLogEntry>> {
        self.store.events_for_cycle(cycle)
    }

    pub fn store_health_score_count(&self) -> EngineResult<i64> {
        self.store.health_score_count()
    }

    pub fn store_churn_prediction_count(&self) -> EngineResult<i64> {
        self.store.churn_prediction_count()
    }

    pub fn store_execution_count(&self, status: &str) -> EngineResult<i64> {
        self.store.execution_count(status)
    }

    pub fn store_open_expansion_signal_count(&self) -> EngineResult<i64> {
        self.store.open_expansion_signal_count()
    }

    pub fn store_average_overall_score(&self) -> EngineResult<Option<f64>> {
        self.store.average_overall_score()
    }
}
