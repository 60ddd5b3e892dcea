use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One subscription plan in the catalog.
/// `upgrade_to` is the next plan up; None for the top tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    pub plan_id: String,
    pub label: String,
    pub monthly_price: f64,
    pub seat_limit: i64,
    pub upgrade_to: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct PlanCatalogFile {
    plans: Vec<PlanConfig>,
}

/// Normalization constants for the five health sub-scores.
/// These are a reconstruction, not verified business fact — keep them
/// in configuration rather than inlined in the calculator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreNormalization {
    /// Support sub-score penalty per open ticket.
    pub support_ticket_penalty: f64,
    /// Growth sub-score baseline before the seat-growth percent is added.
    pub growth_baseline: f64,
    /// Satisfaction sub-score used when a tenant has no NPS responses.
    pub satisfaction_default: f64,
    /// Overall-score movement (points) beyond which the trend flips
    /// from stable to improving/declining.
    pub trend_band: i64,
}

impl Default for ScoreNormalization {
    fn default() -> Self {
        Self {
            support_ticket_penalty: 20.0,
            growth_baseline: 50.0,
            satisfaction_default: 50.0,
            trend_band: 2,
        }
    }
}

/// Blend shares for the base churn probability.
/// base = clamp01(health_share * (100 - overall)/100 + signal_share * Σ weights)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChurnBlend {
    pub health_share: f64,
    pub signal_share: f64,
    pub model_version: String,
}

impl Default for ChurnBlend {
    fn default() -> Self {
        Self {
            health_share: 0.7,
            signal_share: 0.3,
            model_version: "seasonal_v2".into(),
        }
    }
}

/// Scheduling knobs for the sweep engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepIntervals {
    /// Minimum hours between two health calculations for the same tenant.
    /// Re-sweeping earlier is a skip, not an error.
    pub min_recalc_hours: i64,
    /// Days a tenant is exempt from new NPS prompts after mark_sent.
    pub nps_cooldown_days: i64,
    /// NPS scoring window in days.
    pub nps_window_days: i64,
    /// Soft per-tenant time budget for one sweep pass, in milliseconds.
    /// Exceeding it is logged and recorded, never fatal.
    pub tenant_budget_ms: u64,
}

impl Default for SweepIntervals {
    fn default() -> Self {
        Self {
            min_recalc_hours: 20,
            nps_cooldown_days: 90,
            nps_window_days: 90,
            tenant_budget_ms: 2_000,
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub plans: HashMap<String, PlanConfig>,
    pub normalization: ScoreNormalization,
    pub churn_blend: ChurnBlend,
    pub intervals: SweepIntervals,
}

impl EngineConfig {
    /// Load from the data/ directory.
    /// In tests, use EngineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/plans/plan_catalog.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let file: PlanCatalogFile = serde_json::from_str(&content)?;
        let plans = file
            .plans
            .into_iter()
            .map(|p| (p.plan_id.clone(), p))
            .collect();

        let engine_path = format!("{data_dir}/engine.json");
        let (normalization, churn_blend, intervals) =
            match std::fs::read_to_string(&engine_path) {
                Ok(content) => {
                    let file: EngineFile = serde_json::from_str(&content)?;
                    (file.normalization, file.churn_blend, file.intervals)
                }
                // engine.json is optional; the defaults are the model.
                Err(_) => Default::default(),
            };

        Ok(Self { plans, normalization, churn_blend, intervals })
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        let plans = [
            PlanConfig {
                plan_id: "starter".into(),
                label: "Starter".into(),
                monthly_price: 29.0,
                seat_limit: 5,
                upgrade_to: Some("growth".into()),
            },
            PlanConfig {
                plan_id: "growth".into(),
                label: "Growth".into(),
                monthly_price: 99.0,
                seat_limit: 25,
                upgrade_to: Some("scale".into()),
            },
            PlanConfig {
                plan_id: "scale".into(),
                label: "Scale".into(),
                monthly_price: 299.0,
                seat_limit: 100,
                upgrade_to: None,
            },
        ]
        .into_iter()
        .map(|p| (p.plan_id.clone(), p))
        .collect();

        Self {
            plans,
            normalization: ScoreNormalization::default(),
            churn_blend: ChurnBlend::default(),
            intervals: SweepIntervals::default(),
        }
    }

    pub fn plan(&self, plan_id: &str) -> Option<&PlanConfig> {
        self.plans.get(plan_id)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EngineFile {
    #[serde(default)]
    normalization: ScoreNormalization,
    #[serde(default)]
    churn_blend: ChurnBlend,
    #[serde(default)]
    intervals: SweepIntervals,
}
