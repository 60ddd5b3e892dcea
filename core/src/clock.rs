//! Sweep clock — owns the engine's notion of "now" and the cycle counter.
//!
//! Sweeps never call the system clock directly; the runner (or a test)
//! advances the clock explicitly so calendar time can be replayed.

use crate::types::CycleId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SweepClock {
    pub now: DateTime<Utc>,
    pub cycle: CycleId,
}

impl SweepClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: start, cycle: 0 }
    }

    /// Move to a new wall-clock instant and begin the next cycle.
    /// Returns the new cycle number.
    /// Panics if time moves backwards — callers must advance monotonically.
    pub fn advance_to(&mut self, now: DateTime<Utc>) -> CycleId {
        assert!(now >= self.now, "advance_to() called with an earlier instant");
        self.now = now;
        self.cycle += 1;
        self.cycle
    }

    /// Current calendar month as `YYYY-MM`, the churn prediction key.
    pub fn prediction_month(&self) -> String {
        self.now.format("%Y-%m").to_string()
    }

    /// Current calendar month number, 1–12.
    pub fn month_number(&self) -> u32 {
        use chrono::Datelike;
        self.now.month()
    }
}
