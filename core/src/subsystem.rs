//! Sweep subsystem trait and registry contract.
//!
//! RULE: Every sweep implements SweepSubsystem.
//! The engine calls run_sweep() on each registered subsystem
//! in registration order, every cycle.
//! Execution order is fixed and documented in engine.rs.

use crate::{
    clock::SweepClock,
    error::EngineResult,
    event::RetentionEvent,
    store::RetentionStore,
};

/// The contract every sweep subsystem must fulfill.
pub trait SweepSubsystem: Send {
    /// Unique stable name for this subsystem.
    fn name(&self) -> &'static str;

    /// Called once per cycle by the engine.
    ///
    /// - `store`:     shared persistence handle
    /// - `clock`:     the engine clock (current instant + cycle number)
    /// - `events_in`: events emitted by earlier subsystems this cycle
    ///
    /// Returns new events to add to the cycle's event log. A subsystem
    /// error aborts the cycle; per-tenant failures must be absorbed
    /// inside the sweep instead.
    fn run_sweep(
        &mut self,
        store: &RetentionStore,
        clock: &SweepClock,
        events_in: &[RetentionEvent],
    ) -> EngineResult<Vec<RetentionEvent>>;
}
