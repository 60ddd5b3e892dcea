//! Seasonal churn prediction subsystem.
//!
//! This subsystem:
//!   1. Derives a base churn probability from the tenant's current
//!      health score blended with triggered vertical risk signals
//!   2. Applies the vertical calendar's seasonal adjustment for the
//!      current month (multiplicative, then clamped into [0,1])
//!   3. Classifies intervention urgency on fixed, cross-vertical tiers
//!   4. Upserts one prediction per tenant per calendar month
//!
//! Execution: second in every cycle, after health scoring.
//! Depends on: health subsystem (same-cycle scores), usage facts feed.

use crate::{
    clock::SweepClock,
    config::EngineConfig,
    error::{EngineError, EngineResult, ParseEnumError},
    event::RetentionEvent,
    profile::RetentionProfile,
    store::RetentionStore,
    subsystem::SweepSubsystem,
    types::{TenantId, VerticalId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const SWEEP_NAME: &str = "churn";

/// Vertical profiles map this default id through playbook_overrides to
/// pick the intervention started on high-urgency predictions.
pub const DEFAULT_INTERVENTION_PLAYBOOK: &str = "churn_risk";

// ── Public types ─────────────────────────────────────────────────────────────

/// Intervention urgency tiers. Thresholds are fixed constants — not
/// configuration — so urgency stays comparable across verticals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    /// critical ≥0.75, high ≥0.5, medium ≥0.3, low ≥0.15, else none.
    pub fn from_probability(p: f64) -> Self {
        if p >= 0.75 {
            Urgency::Critical
        } else if p >= 0.5 {
            Urgency::High
        } else if p >= 0.3 {
            Urgency::Medium
        } else if p >= 0.15 {
            Urgency::Low
        } else {
            Urgency::None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::None => "none",
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        }
    }

    /// Whether this tier triggers an automated intervention.
    pub fn requires_intervention(&self) -> bool {
        *self >= Urgency::High
    }
}

impl FromStr for Urgency {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Urgency::None),
            "low" => Ok(Urgency::Low),
            "medium" => Ok(Urgency::Medium),
            "high" => Ok(Urgency::High),
            "critical" => Ok(Urgency::Critical),
            _ => Err(ParseEnumError { kind: "urgency", value: s.into() }),
        }
    }
}

/// A triggered risk signal recorded on the prediction for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributingFactor {
    pub signal_id: String,
    pub weight: f64,
    pub metric_value: f64,
}

/// One prediction row. Keyed by (tenant, month); the current month's
/// row is overwritten on re-prediction, elapsed months are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChurnPrediction {
    pub tenant_id: TenantId,
    pub vertical_id: VerticalId,
    pub prediction_month: String,
    pub base_probability: f64,
    pub seasonal_adjustment: f64,
    pub adjusted_probability: f64,
    pub intervention_urgency: Urgency,
    pub model_version: String,
    pub contributing_factors: Vec<ContributingFactor>,
    pub predicted_at: DateTime<Utc>,
}

/// Apply the seasonal adjustment to a base probability.
/// The clamp is mandatory: extreme inputs must never escape [0,1].
pub fn adjust_probability(base: f64, seasonal_adjustment_percent: f64) -> f64 {
    (base * (1.0 + seasonal_adjustment_percent / 100.0)).clamp(0.0, 1.0)
}

// ── Subsystem ────────────────────────────────────────────────────────────────

pub struct ChurnSubsystem {
    config: EngineConfig,
}

impl ChurnSubsystem {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Predict churn for one tenant and upsert this month's row.
    pub fn predict(
        &self,
        store: &RetentionStore,
        tenant_id: &str,
        clock: &SweepClock,
    ) -> EngineResult<ChurnPrediction> {
        let tenant = store
            .get_tenant(tenant_id)?
            .ok_or_else(|| EngineError::not_found("tenant", tenant_id))?;

        let health = store
            .latest_health_score(tenant_id)?
            .ok_or_else(|| EngineError::not_found("health score", tenant_id))?;

        let profile = match &tenant.vertical_id {
            Some(v) => store.get_profile(v)?,
            None => None,
        };
        let vertical_id = tenant
            .vertical_id
            .clone()
            .unwrap_or_else(|| "generic".to_string());

        let contributing_factors = match &profile {
            Some(p) => self.triggered_signals(store, tenant_id, p, clock.now)?,
            None => Vec::new(),
        };
        let signal_sum: f64 = contributing_factors
            .iter()
            .map(|f| f.weight)
            .sum::<f64>()
            .min(1.0);

        let blend = &self.config.churn_blend;
        let health_risk = (100 - health.overall_score) as f64 / 100.0;
        let base_probability =
            (blend.health_share * health_risk + blend.signal_share * signal_sum).clamp(0.0, 1.0);

        let seasonal_adjustment = profile
            .as_ref()
            .map(|p| p.seasonal_adjustment(clock.month_number()))
            .unwrap_or(0.0);

        let adjusted_probability = adjust_probability(base_probability, seasonal_adjustment);

        let prediction = ChurnPrediction {
            tenant_id: tenant_id.to_string(),
            vertical_id,
            prediction_month: clock.prediction_month(),
            base_probability,
            seasonal_adjustment,
            adjusted_probability,
            intervention_urgency: Urgency::from_probability(adjusted_probability),
            model_version: blend.model_version.clone(),
            contributing_factors,
            predicted_at: clock.now,
        };

        store.upsert_churn_prediction(&prediction)?;

        log::debug!(
            "churn: {tenant_id} base={:.3} seasonal={:+.1}% adjusted={:.3} urgency={}",
            prediction.base_probability,
            prediction.seasonal_adjustment,
            prediction.adjusted_probability,
            prediction.intervention_urgency.as_str(),
        );

        Ok(prediction)
    }

    /// Most recent prediction for a tenant, any month.
    pub fn get_latest(
        &self,
        store: &RetentionStore,
        tenant_id: &str,
    ) -> EngineResult<Option<ChurnPrediction>> {
        store.latest_churn_prediction(tenant_id)
    }

    /// Prediction history, newest month first.
    pub fn get_history(
        &self,
        store: &RetentionStore,
        tenant_id: &str,
        limit: i64,
    ) -> EngineResult<Vec<ChurnPrediction>> {
        store.churn_history(tenant_id, limit)
    }

    /// Evaluate the profile's risk signals against the tenant's facts.
    fn triggered_signals(
        &self,
        store: &RetentionStore,
        tenant_id: &str,
        profile: &RetentionProfile,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<ContributingFactor>> {
        let Some(facts) = store.latest_facts(tenant_id)? else {
            // No feed delivery yet: no signals can fire.
            return Ok(Vec::new());
        };

        let mut triggered = Vec::new();
        for signal in &profile.churn_risk_signals {
            let Some(value) = facts.metric(&signal.metric, now) else {
                log::warn!(
                    "churn: signal '{}' references unknown metric '{}'",
                    signal.signal_id,
                    signal.metric,
                );
                continue;
            };
            if signal.operator.matches(value, signal.threshold) {
                triggered.push(ContributingFactor {
                    signal_id: signal.signal_id.clone(),
                    weight: signal.weight,
                    metric_value: value,
                });
            }
        }
        Ok(triggered)
    }
}

impl SweepSubsystem for ChurnSubsystem {
    fn name(&self) -> &'static str {
        SWEEP_NAME
    }

    fn run_sweep(
        &mut self,
        store: &RetentionStore,
        clock: &SweepClock,
        _events_in: &[RetentionEvent],
    ) -> EngineResult<Vec<RetentionEvent>> {
        let mut events = Vec::new();
        let mut processed = 0u64;

        for tenant in store.active_tenants()? {
            let tenant_id = &tenant.tenant_id;

            let prediction = match self.predict(store, tenant_id, clock) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("churn: {tenant_id} prediction failed: {e}");
                    store.record_sweep_error(
                        clock.cycle,
                        SWEEP_NAME,
                        tenant_id,
                        &e.to_string(),
                        clock.now,
                    )?;
                    continue;
                }
            };
            processed += 1;

            events.push(RetentionEvent::ChurnPredicted {
                tenant_id: tenant_id.clone(),
                prediction_month: prediction.prediction_month.clone(),
                adjusted_probability: prediction.adjusted_probability,
                urgency: prediction.intervention_urgency.as_str().to_string(),
            });

            if prediction.intervention_urgency.requires_intervention() {
                let playbook_id = match &tenant.vertical_id {
                    Some(v) => store.get_profile(v)?.map(|p| {
                        p.resolve_playbook(DEFAULT_INTERVENTION_PLAYBOOK).to_string()
                    }),
                    None => Some(DEFAULT_INTERVENTION_PLAYBOOK.to_string()),
                };
                events.push(RetentionEvent::InterventionRequired {
                    tenant_id: tenant_id.clone(),
                    urgency: prediction.intervention_urgency.as_str().to_string(),
                    playbook_id,
                });
            }
        }

        log::info!("churn: sweep complete, {processed} tenants predicted");
        Ok(events)
    }
}
