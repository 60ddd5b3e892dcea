//! Expansion signal subsystem — upsell opportunity detection.
//!
//! Scans each tenant's usage facts against upsell thresholds (vertical
//! overrides first, built-in catalog otherwise) and records an
//! ExpansionSignal when one fires. An open signal of the same type for
//! the same tenant is never duplicated; closing it (won/lost/deferred)
//! re-arms detection.
//!
//! Execution: fourth in every cycle, independent of the scoring chain.

use crate::{
    clock::SweepClock,
    config::EngineConfig,
    error::{EngineError, EngineResult, ParseEnumError},
    event::RetentionEvent,
    facts::TenantFacts,
    profile::UpsellSignal,
    store::RetentionStore,
    subsystem::SweepSubsystem,
    types::{EntityId, TenantId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const SWEEP_NAME: &str = "expansion";

// ── Public types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    New,
    Contacted,
    Won,
    Lost,
    Deferred,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::New => "new",
            SignalStatus::Contacted => "contacted",
            SignalStatus::Won => "won",
            SignalStatus::Lost => "lost",
            SignalStatus::Deferred => "deferred",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, SignalStatus::New | SignalStatus::Contacted)
    }
}

impl FromStr for SignalStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(SignalStatus::New),
            "contacted" => Ok(SignalStatus::Contacted),
            "won" => Ok(SignalStatus::Won),
            "lost" => Ok(SignalStatus::Lost),
            "deferred" => Ok(SignalStatus::Deferred),
            _ => Err(ParseEnumError { kind: "signal status", value: s.into() }),
        }
    }
}

/// Operator-driven lifecycle: new → contacted → {won, lost, deferred}.
pub fn can_transition(from: SignalStatus, to: SignalStatus) -> bool {
    use SignalStatus::*;
    matches!(
        (from, to),
        (New, Contacted) | (Contacted, Won) | (Contacted, Lost) | (Contacted, Deferred)
    )
}

/// A detected upsell opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionSignal {
    pub signal_id: EntityId,
    pub tenant_id: TenantId,
    pub signal_type: String,
    pub current_plan: String,
    pub recommended_plan: String,
    /// Annualized revenue delta between the two plans' list prices.
    pub potential_arr: f64,
    pub status: SignalStatus,
    pub detected_at: DateTime<Utc>,
}

// ── Built-in signal catalog ──────────────────────────────────────────────────

/// Defaults used when a vertical profile carries no upsell overrides.
fn default_catalog() -> Vec<UpsellSignal> {
    vec![
        UpsellSignal {
            signal_type: "usage_limit".into(),
            metric: "plan_usage_pct".into(),
            threshold: 90.0,
            consecutive_periods: 2,
        },
        UpsellSignal {
            signal_type: "team_growth".into(),
            metric: "seats_added".into(),
            threshold: 3.0,
            consecutive_periods: 1,
        },
        UpsellSignal {
            signal_type: "api_adoption".into(),
            metric: "api_calls".into(),
            threshold: 1_000.0,
            consecutive_periods: 1,
        },
    ]
}

// ── Subsystem ────────────────────────────────────────────────────────────────

pub struct ExpansionSubsystem {
    config: EngineConfig,
}

impl ExpansionSubsystem {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Scan one tenant. Returns the newly created signal, or None when
    /// nothing fired, the tenant is already on the top plan, or an open
    /// signal of the same type exists.
    pub fn scan(
        &self,
        store: &RetentionStore,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<ExpansionSignal>> {
        let tenant = store
            .get_tenant(tenant_id)?
            .ok_or_else(|| EngineError::not_found("tenant", tenant_id))?;

        let plan = self
            .config
            .plan(&tenant.plan_id)
            .ok_or_else(|| EngineError::not_found("plan", tenant.plan_id.clone()))?;

        let Some(upgrade_id) = &plan.upgrade_to else {
            // Top tier: nothing to upsell to.
            return Ok(None);
        };
        let upgrade = self
            .config
            .plan(upgrade_id)
            .ok_or_else(|| EngineError::not_found("plan", upgrade_id.clone()))?;

        if store.latest_facts(tenant_id)?.is_none() {
            log::debug!("expansion: no usage facts for tenant {tenant_id}, skipping");
            return Ok(None);
        }

        let catalog;
        let signals = match &tenant.vertical_id {
            Some(v) => match store.get_profile(v)? {
                Some(p) if !p.upsell_signals.is_empty() => {
                    catalog = p.upsell_signals;
                    &catalog
                }
                _ => {
                    catalog = default_catalog();
                    &catalog
                }
            },
            None => {
                catalog = default_catalog();
                &catalog
            }
        };

        for signal in signals {
            if !self.signal_fires(store, tenant_id, plan.seat_limit, signal, now)? {
                continue;
            }

            // Dedup: an open signal of this type suppresses re-creation.
            if store
                .open_expansion_signal(tenant_id, &signal.signal_type)?
                .is_some()
            {
                log::debug!(
                    "expansion: open '{}' signal exists for tenant {tenant_id}, not duplicating",
                    signal.signal_type,
                );
                continue;
            }

            let created = ExpansionSignal {
                signal_id: uuid::Uuid::new_v4().to_string(),
                tenant_id: tenant_id.to_string(),
                signal_type: signal.signal_type.clone(),
                current_plan: plan.plan_id.clone(),
                recommended_plan: upgrade.plan_id.clone(),
                potential_arr: (upgrade.monthly_price - plan.monthly_price) * 12.0,
                status: SignalStatus::New,
                detected_at: now,
            };
            store.insert_expansion_signal(&created)?;

            log::info!(
                "expansion: '{}' detected for tenant {tenant_id} ({} → {}, ARR {:+.0})",
                created.signal_type,
                created.current_plan,
                created.recommended_plan,
                created.potential_arr,
            );
            return Ok(Some(created));
        }

        Ok(None)
    }

    /// Operator status change, validated against the transition table.
    pub fn update_status(
        &self,
        store: &RetentionStore,
        signal_id: &str,
        status: &str,
    ) -> EngineResult<ExpansionSignal> {
        let target: SignalStatus = status
            .parse()
            .map_err(|e: ParseEnumError| EngineError::validation(e.to_string()))?;

        let mut signal = store
            .get_expansion_signal(signal_id)?
            .ok_or_else(|| EngineError::not_found("expansion signal", signal_id))?;

        if !can_transition(signal.status, target) {
            return Err(EngineError::conflict(format!(
                "cannot move expansion signal {signal_id} from {} to {}",
                signal.status.as_str(),
                target.as_str(),
            )));
        }

        store.update_expansion_signal_status(signal_id, target.as_str())?;
        signal.status = target;
        Ok(signal)
    }

    /// Evaluate one threshold, honoring its consecutive-period
    /// requirement over the most recent fact rows.
    fn signal_fires(
        &self,
        store: &RetentionStore,
        tenant_id: &str,
        seat_limit: i64,
        signal: &UpsellSignal,
        now: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let periods = signal.consecutive_periods.max(1);
        let facts = store.recent_facts(tenant_id, periods)?;
        if (facts.len() as i64) < periods {
            return Ok(false);
        }
        Ok(facts
            .iter()
            .all(|f| self.metric_value(f, seat_limit, &signal.metric, now) >= signal.threshold))
    }

    fn metric_value(
        &self,
        facts: &TenantFacts,
        seat_limit: i64,
        metric: &str,
        now: DateTime<Utc>,
    ) -> f64 {
        match metric {
            // Plan consumption is derived here; the feed doesn't know
            // plan limits.
            "plan_usage_pct" => {
                if seat_limit <= 0 {
                    0.0
                } else {
                    facts.seats_used as f64 / seat_limit as f64 * 100.0
                }
            }
            other => facts.metric(other, now).unwrap_or(0.0),
        }
    }
}

impl SweepSubsystem for ExpansionSubsystem {
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

        for tenant in store.active_tenants()? {
            let tenant_id = &tenant.tenant_id;
            match self.scan(store, tenant_id, clock.now) {
                Ok(Some(signal)) => {
                    events.push(RetentionEvent::ExpansionSignalDetected {
                        signal_id: signal.signal_id.clone(),
                        tenant_id: tenant_id.clone(),
                        signal_type: signal.signal_type.clone(),
                        potential_arr: signal.potential_arr,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("expansion: {tenant_id} scan failed: {e}");
                    store.record_sweep_error(
                        clock.cycle,
                        SWEEP_NAME,
                        tenant_id,
                        &e.to_string(),
                        clock.now,
                    )?;
                }
            }
        }

        Ok(events)
    }
}
