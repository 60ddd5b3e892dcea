//! NPS aggregation subsystem — satisfaction survey collection.
//!
//! Collects 0–10 responses per tenant, computes the period score
//! (%promoters − %detractors) and a monthly trend, and gates survey
//! prompts behind a per-tenant cooldown. Submitting a response never
//! resets the cooldown — only an explicit mark_sent does.
//!
//! Not a sweep: collection is event-driven through the operator API.
//! The health subsystem reads the score back as the satisfaction
//! sub-score on the next cycle.

use crate::{
    config::EngineConfig,
    error::{EngineError, EngineResult},
    store::RetentionStore,
    types::{EntityId, TenantId},
};
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ── Public types ─────────────────────────────────────────────────────────────

/// Standard NPS buckets over the 0–10 response scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NpsCategory {
    Detractor,
    Passive,
    Promoter,
}

impl NpsCategory {
    /// detractor 0–6, passive 7–8, promoter 9–10.
    pub fn from_score(score: i64) -> Self {
        match score {
            0..=6 => NpsCategory::Detractor,
            7..=8 => NpsCategory::Passive,
            _ => NpsCategory::Promoter,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NpsCategory::Detractor => "detractor",
            NpsCategory::Passive => "passive",
            NpsCategory::Promoter => "promoter",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpsResponse {
    pub response_id: EntityId,
    pub tenant_id: TenantId,
    pub score: i64,
    pub comment: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl NpsResponse {
    pub fn category(&self) -> NpsCategory {
        NpsCategory::from_score(self.score)
    }
}

/// One month in a tenant's NPS trend series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpsTrendPoint {
    /// `YYYY-MM`.
    pub month: String,
    /// None when the month has zero responses — never a spurious 0.
    pub score: Option<i64>,
    pub responses: i64,
}

/// %promoters − %detractors over a response set; None when empty.
pub fn score_responses(responses: &[NpsResponse]) -> Option<i64> {
    if responses.is_empty() {
        return None;
    }
    let total = responses.len() as f64;
    let promoters = responses
        .iter()
        .filter(|r| r.category() == NpsCategory::Promoter)
        .count() as f64;
    let detractors = responses
        .iter()
        .filter(|r| r.category() == NpsCategory::Detractor)
        .count() as f64;
    Some(((promoters / total - detractors / total) * 100.0).round() as i64)
}

// ── Subsystem ────────────────────────────────────────────────────────────────

pub struct NpsSubsystem {
    config: EngineConfig,
}

impl NpsSubsystem {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Whether the tenant may be prompted: true until a prompt is
    /// marked sent, then false for the cooldown interval.
    pub fn can_send(
        &self,
        store: &RetentionStore,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let cooldown = Duration::days(self.config.intervals.nps_cooldown_days);
        Ok(match store.last_prompt_sent(tenant_id)? {
            Some(sent) => now - sent >= cooldown,
            None => true,
        })
    }

    /// Record that a prompt was dispatched. The caller invokes this
    /// explicitly after a successful send; collection never does.
    pub fn mark_sent(
        &self,
        store: &RetentionStore,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        store.mark_prompt_sent(tenant_id, now)
    }

    /// Store a survey response. Scores outside [0,10] are a validation
    /// error — never clamped.
    pub fn collect(
        &self,
        store: &RetentionStore,
        tenant_id: &str,
        score: i64,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> EngineResult<NpsResponse> {
        if !(0..=10).contains(&score) {
            return Err(EngineError::validation(format!(
                "NPS score must be in [0,10], got {score}"
            )));
        }
        if store.get_tenant(tenant_id)?.is_none() {
            return Err(EngineError::not_found("tenant", tenant_id));
        }

        let response = NpsResponse {
            response_id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            score,
            comment,
            submitted_at: now,
        };
        store.insert_nps_response(&response)?;

        log::debug!(
            "nps: tenant {tenant_id} responded {score} ({})",
            response.category().as_str(),
        );
        Ok(response)
    }

    /// NPS score over the scoring window; None with zero responses.
    pub fn get_score(
        &self,
        store: &RetentionStore,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<i64>> {
        let window = Duration::days(self.config.intervals.nps_window_days);
        let responses = store.nps_responses_between(tenant_id, now - window, now)?;
        Ok(score_responses(&responses))
    }

    /// Monthly trend series for the last `months` calendar months,
    /// oldest first, ending with the current month.
    pub fn get_trend(
        &self,
        store: &RetentionStore,
        tenant_id: &str,
        months: u32,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<NpsTrendPoint>> {
        let mut series = Vec::with_capacity(months as usize);
        for offset in (0..months).rev() {
            let (start, end) = month_bounds(now, offset);
            let responses = store.nps_responses_between(tenant_id, start, end)?;
            series.push(NpsTrendPoint {
                month: start.format("%Y-%m").to_string(),
                score: score_responses(&responses),
                responses: responses.len() as i64,
            });
        }
        Ok(series)
    }
}

/// [start, end) of the calendar month `offset` months before `now`.
fn month_bounds(now: DateTime<Utc>, offset: u32) -> (DateTime<Utc>, DateTime<Utc>) {
    let total = now.year() * 12 + now.month0() as i32 - offset as i32;
    let (year, month0) = (total.div_euclid(12), total.rem_euclid(12) as u32);
    let start = Utc
        .with_ymd_and_hms(year, month0 + 1, 1, 0, 0, 0)
        .single()
        .expect("first of month is always a valid instant");
    let next = year * 12 + month0 as i32 + 1;
    let (ny, nm0) = (next.div_euclid(12), next.rem_euclid(12) as u32);
    let end = Utc
        .with_ymd_and_hms(ny, nm0 + 1, 1, 0, 0, 0)
        .single()
        .expect("first of month is always a valid instant");
    (start, end)
}
