//! Health scoring subsystem — the first stage of every cycle.
//!
//! This subsystem:
//!   1. Normalizes five raw usage/billing/support facts into 0–100
//!      sub-scores
//!   2. Applies the tenant's vertical health weights (equal-weight
//!      fallback when no profile exists)
//!   3. Categorizes the overall score into fixed bands
//!   4. Derives a trend against the immediately preceding record
//!   5. Appends one immutable HealthScore row per tenant per sweep
//!
//! Execution: first in every cycle — the churn predictor consumes this
//! cycle's scores.
//! Depends on: usage facts feed, NPS responses (satisfaction feedback).

use crate::{
    clock::SweepClock,
    config::EngineConfig,
    error::{EngineError, EngineResult, ParseEnumError},
    event::RetentionEvent,
    facts::TenantFacts,
    nps_subsystem,
    profile::RetentionProfile,
    store::RetentionStore,
    subsystem::SweepSubsystem,
    types::TenantId,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

pub const SWEEP_NAME: &str = "health";

// ── Public types ─────────────────────────────────────────────────────────────

/// Fixed category bands over the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCategory {
    Critical,
    AtRisk,
    Neutral,
    Healthy,
}

impl HealthCategory {
    /// Pure function of the overall score: <40 critical, 40–59 at_risk,
    /// 60–79 neutral, ≥80 healthy.
    pub fn from_score(overall: i64) -> Self {
        match overall {
            i64::MIN..=39 => HealthCategory::Critical,
            40..=59 => HealthCategory::AtRisk,
            60..=79 => HealthCategory::Neutral,
            _ => HealthCategory::Healthy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthCategory::Critical => "critical",
            HealthCategory::AtRisk => "at_risk",
            HealthCategory::Neutral => "neutral",
            HealthCategory::Healthy => "healthy",
        }
    }
}

impl FromStr for HealthCategory {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(HealthCategory::Critical),
            "at_risk" => Ok(HealthCategory::AtRisk),
            "neutral" => Ok(HealthCategory::Neutral),
            "healthy" => Ok(HealthCategory::Healthy),
            _ => Err(ParseEnumError { kind: "health category", value: s.into() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Improving => "improving",
            Trend::Stable => "stable",
            Trend::Declining => "declining",
        }
    }
}

impl FromStr for Trend {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "improving" => Ok(Trend::Improving),
            "stable" => Ok(Trend::Stable),
            "declining" => Ok(Trend::Declining),
            _ => Err(ParseEnumError { kind: "trend", value: s.into() }),
        }
    }
}

/// One immutable score record. History is append-only per tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthScore {
    pub tenant_id: TenantId,
    pub calculated_at: DateTime<Utc>,
    pub engagement: i64,
    pub adoption: i64,
    pub satisfaction: i64,
    pub support: i64,
    pub growth: i64,
    pub overall_score: i64,
    pub category: HealthCategory,
    pub trend: Trend,
    /// Carried from the most recent churn prediction for convenience.
    pub churn_probability: Option<f64>,
}

// ── Subsystem ────────────────────────────────────────────────────────────────

pub struct HealthSubsystem {
    config: EngineConfig,
}

impl HealthSubsystem {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Compute and persist a new health score for one tenant.
    /// Always calculates; the minimum-interval gate lives in the sweep.
    pub fn calculate(
        &self,
        store: &RetentionStore,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<HealthScore> {
        let tenant = store
            .get_tenant(tenant_id)?
            .ok_or_else(|| EngineError::not_found("tenant", tenant_id))?;

        let facts = store
            .latest_facts(tenant_id)?
            .ok_or_else(|| EngineError::not_found("usage facts", tenant_id))?;

        let profile = match &tenant.vertical_id {
            Some(v) => store.get_profile(v)?,
            None => None,
        };

        let weights = match &profile {
            Some(p) => p.health_weights.clone(),
            None => {
                log::debug!(
                    "health: tenant {tenant_id} has no vertical profile, using equal weights"
                );
                RetentionProfile::default_weights()
            }
        };

        let engagement = engagement_score(&facts);
        let adoption = adoption_score(&facts, profile.as_ref());
        let satisfaction = self.satisfaction_score(store, tenant_id, now)?;
        let support = self.support_score(&facts);
        let growth = self.growth_score(&facts);

        let overall_score = weighted_overall(
            &weights,
            &[
                ("engagement", engagement),
                ("adoption", adoption),
                ("satisfaction", satisfaction),
                ("support", support),
                ("growth", growth),
            ],
        );

        let previous = store.latest_health_score(tenant_id)?;
        let trend = match &previous {
            None => Trend::Stable,
            Some(prev) => {
                let delta = overall_score - prev.overall_score;
                let band = self.config.normalization.trend_band;
                if delta > band {
                    Trend::Improving
                } else if delta < -band {
                    Trend::Declining
                } else {
                    Trend::Stable
                }
            }
        };

        let churn_probability = store
            .latest_churn_prediction(tenant_id)?
            .map(|p| p.adjusted_probability);

        let score = HealthScore {
            tenant_id: tenant_id.to_string(),
            calculated_at: now,
            engagement,
            adoption,
            satisfaction,
            support,
            growth,
            overall_score,
            category: HealthCategory::from_score(overall_score),
            trend,
            churn_probability,
        };

        store.insert_health_score(&score)?;

        log::debug!(
            "health: {tenant_id} scored {overall_score} ({}) trend={}",
            score.category.as_str(),
            score.trend.as_str(),
        );

        Ok(score)
    }

    /// Run the scheduled sweep over all active tenants.
    ///
    /// Returns the count of tenants successfully processed plus the
    /// cycle's events. A single tenant's failure is logged, recorded,
    /// and skipped — it never aborts the sweep.
    pub fn run_scheduled_calculation(
        &self,
        store: &RetentionStore,
        clock: &SweepClock,
    ) -> EngineResult<(u64, Vec<RetentionEvent>)> {
        let now = clock.now;
        let min_interval = Duration::hours(self.config.intervals.min_recalc_hours);
        let mut processed = 0u64;
        let mut events = Vec::new();

        for tenant in store.active_tenants()? {
            let tenant_id = &tenant.tenant_id;

            // Interval gate: re-sweeping inside the minimum interval is
            // a no-op for this tenant, not an error.
            if let Some(last) = store.sweep_last_run(tenant_id, SWEEP_NAME)? {
                if now - last < min_interval {
                    log::debug!("health: {tenant_id} calculated recently, skipping");
                    continue;
                }
            }

            let previous_category = store
                .latest_health_score(tenant_id)?
                .map(|s| s.category.as_str().to_string());

            let started = std::time::Instant::now();
            match self.calculate(store, tenant_id, now) {
                Ok(score) => {
                    store.record_sweep_run(tenant_id, SWEEP_NAME, now)?;
                    processed += 1;

                    events.push(RetentionEvent::HealthScoreCalculated {
                        tenant_id: tenant_id.clone(),
                        overall_score: score.overall_score,
                        category: score.category.as_str().to_string(),
                        trend: score.trend.as_str().to_string(),
                    });
                    if score.category == HealthCategory::Critical {
                        events.push(RetentionEvent::HealthScoreCritical {
                            tenant_id: tenant_id.clone(),
                            overall_score: score.overall_score,
                            previous_category,
                        });
                    }
                }
                Err(e) => {
                    log::warn!("health: {tenant_id} calculation failed: {e}");
                    store.record_sweep_error(clock.cycle, SWEEP_NAME, tenant_id, &e.to_string(), now)?;
                    continue;
                }
            }

            let elapsed = started.elapsed().as_millis() as u64;
            if elapsed > self.config.intervals.tenant_budget_ms {
                log::warn!(
                    "health: {tenant_id} exceeded tenant budget ({elapsed}ms)"
                );
                store.record_sweep_error(
                    clock.cycle,
                    SWEEP_NAME,
                    tenant_id,
                    &format!("tenant budget exceeded: {elapsed}ms"),
                    now,
                )?;
            }
        }

        log::info!("health: sweep complete, {processed} tenants scored");
        Ok((processed, events))
    }

    /// Satisfaction sub-score from the tenant's current NPS: a −100..100
    /// NPS maps linearly onto 0..100; no responses reads as the default.
    fn satisfaction_score(
        &self,
        store: &RetentionStore,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<i64> {
        let window = Duration::days(self.config.intervals.nps_window_days);
        let responses = store.nps_responses_between(tenant_id, now - window, now)?;
        Ok(match nps_subsystem::score_responses(&responses) {
            Some(nps) => ((nps + 100) / 2).clamp(0, 100),
            None => self.config.normalization.satisfaction_default as i64,
        })
    }

    fn support_score(&self, facts: &TenantFacts) -> i64 {
        let penalty =
            (facts.support_open as f64 * self.config.normalization.support_ticket_penalty).min(100.0);
        (100.0 - penalty).round() as i64
    }

    fn growth_score(&self, facts: &TenantFacts) -> i64 {
        let prior_seats = (facts.seats_used - facts.seats_added).max(1);
        let growth_percent = facts.seats_added as f64 / prior_seats as f64 * 100.0;
        (self.config.normalization.growth_baseline + growth_percent)
            .round()
            .clamp(0.0, 100.0) as i64
    }
}

impl SweepSubsystem for HealthSubsystem {
    fn name(&self) -> &'static str {
        SWEEP_NAME
    }

    fn run_sweep(
        &mut self,
        store: &RetentionStore,
        clock: &SweepClock,
        _events_in: &[RetentionEvent],
    ) -> EngineResult<Vec<RetentionEvent>> {
        let (_processed, events) = self.run_scheduled_calculation(store, clock)?;
        Ok(events)
    }
}

// ── Sub-score formulas ───────────────────────────────────────────────────────

/// engagement = min(100, active_days / period_days × 100)
fn engagement_score(facts: &TenantFacts) -> i64 {
    if facts.period_days <= 0 {
        return 0;
    }
    let ratio = facts.active_days as f64 / facts.period_days as f64;
    (ratio * 100.0).round().min(100.0) as i64
}

/// adoption = share of the vertical's critical features in use × 100.
/// With no profile (or an empty critical set) nothing required is
/// missing, so the sub-score reads 100.
fn adoption_score(facts: &TenantFacts, profile: Option<&RetentionProfile>) -> i64 {
    let critical = match profile {
        Some(p) if !p.critical_features.is_empty() => &p.critical_features,
        _ => return 100,
    };
    let used = critical
        .iter()
        .filter(|f| facts.features_used.iter().any(|u| u == *f))
        .count();
    (used as f64 / critical.len() as f64 * 100.0).round() as i64
}

/// Weighted overall score, rounded and clamped into [0,100].
/// Missing weight entries contribute zero — the profile validator
/// guarantees the stored weights sum to 100.
pub fn weighted_overall(weights: &BTreeMap<String, i64>, subs: &[(&str, i64)]) -> i64 {
    let total: f64 = subs
        .iter()
        .map(|(name, value)| {
            let weight = weights.get(*name).copied().unwrap_or(0);
            *value as f64 * weight as f64
        })
        .sum();
    (total / 100.0).round().clamp(0.0, 100.0) as i64
}
