//! Per-vertical retention profiles — typed configuration entities.
//!
//! Profiles are created and edited by operators, validated at save time,
//! and read-only to the scoring pipeline. A change takes effect on the
//! next calculation cycle; there is no retroactive recompute.

use crate::error::{EngineError, EngineResult};
use crate::types::VerticalId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub const SUB_SCORES: [&str; 5] =
    ["engagement", "adoption", "satisfaction", "support", "growth"];

pub const MIN_INACTIVITY_DAYS: i64 = 7;
pub const MAX_INACTIVITY_DAYS: i64 = 180;

/// One month entry in the vertical's seasonality calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonalityEntry {
    /// Calendar month, 1–12.
    pub month: u32,
    pub risk_level: String,
    /// Signed percentage applied to the base churn probability.
    pub adjustment_percent: f64,
    pub label: String,
}

/// A churn risk signal descriptor: when the named metric matches the
/// operator/threshold condition, the signal's weight contributes to the
/// base churn probability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChurnRiskSignal {
    pub signal_id: String,
    pub description: String,
    /// Contribution in [0,1].
    pub weight: f64,
    pub metric: String,
    pub operator: SignalOperator,
    pub threshold: f64,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
}

fn default_lookback_days() -> i64 {
    30
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl SignalOperator {
    pub fn matches(self, value: f64, threshold: f64) -> bool {
        match self {
            SignalOperator::Eq => value == threshold,
            SignalOperator::Ne => value != threshold,
            SignalOperator::Gt => value > threshold,
            SignalOperator::Gte => value >= threshold,
            SignalOperator::Lt => value < threshold,
            SignalOperator::Lte => value <= threshold,
        }
    }
}

/// An upsell signal threshold for the expansion detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsellSignal {
    pub signal_type: String,
    pub metric: String,
    pub threshold: f64,
    /// Consecutive periods the threshold must hold before firing.
    #[serde(default = "default_consecutive_periods")]
    pub consecutive_periods: i64,
}

fn default_consecutive_periods() -> i64 {
    1
}

/// Per-vertical retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionProfile {
    pub vertical_id: VerticalId,
    pub label: String,
    /// Sub-score name → integer weight. Must sum to exactly 100.
    pub health_weights: BTreeMap<String, i64>,
    /// Exactly 12 entries, one per calendar month.
    pub seasonality_calendar: Vec<SeasonalityEntry>,
    pub churn_risk_signals: Vec<ChurnRiskSignal>,
    pub critical_features: HashSet<String>,
    /// Inactivity ceiling in days, [7, 180].
    pub max_inactivity_days: i64,
    /// Default playbook id → vertical-specific variant.
    pub playbook_overrides: BTreeMap<String, String>,
    pub upsell_signals: Vec<UpsellSignal>,
    pub active: bool,
}

impl RetentionProfile {
    /// Equal-weight default applied when a tenant has no vertical profile.
    pub fn default_weights() -> BTreeMap<String, i64> {
        SUB_SCORES.iter().map(|s| (s.to_string(), 20)).collect()
    }

    /// Validate the profile. The store refuses to save anything that
    /// fails here — the pipeline only ever reads validated profiles.
    pub fn validate(&self) -> EngineResult<()> {
        let weight_sum: i64 = self.health_weights.values().sum();
        if weight_sum != 100 {
            return Err(EngineError::validation(format!(
                "health weights must sum to 100, got {weight_sum}"
            )));
        }
        for name in self.health_weights.keys() {
            if !SUB_SCORES.contains(&name.as_str()) {
                return Err(EngineError::validation(format!(
                    "unknown sub-score '{name}' in health weights"
                )));
            }
        }
        if !(MIN_INACTIVITY_DAYS..=MAX_INACTIVITY_DAYS).contains(&self.max_inactivity_days) {
            return Err(EngineError::validation(format!(
                "max_inactivity_days must be in [{MIN_INACTIVITY_DAYS},{MAX_INACTIVITY_DAYS}], got {}",
                self.max_inactivity_days
            )));
        }
        if self.seasonality_calendar.len() != 12 {
            return Err(EngineError::validation(format!(
                "seasonality calendar must have 12 entries, got {}",
                self.seasonality_calendar.len()
            )));
        }
        for (i, entry) in self.seasonality_calendar.iter().enumerate() {
            let expected = i as u32 + 1;
            if entry.month != expected {
                return Err(EngineError::validation(format!(
                    "seasonality entry {i} must be month {expected}, got {}",
                    entry.month
                )));
            }
        }
        for signal in &self.churn_risk_signals {
            if !(0.0..=1.0).contains(&signal.weight) {
                return Err(EngineError::validation(format!(
                    "signal '{}' weight must be in [0,1], got {}",
                    signal.signal_id, signal.weight
                )));
            }
        }
        Ok(())
    }

    /// Seasonal adjustment for a calendar month; 0 when no entry matches.
    pub fn seasonal_adjustment(&self, month: u32) -> f64 {
        self.seasonality_calendar
            .iter()
            .find(|e| e.month == month)
            .map(|e| e.adjustment_percent)
            .unwrap_or(0.0)
    }

    /// Resolve a default playbook id through the vertical's overrides.
    pub fn resolve_playbook<'a>(&'a self, default_id: &'a str) -> &'a str {
        self.playbook_overrides
            .get(default_id)
            .map(String::as_str)
            .unwrap_or(default_id)
    }
}
