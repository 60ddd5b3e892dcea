//! The event bus — everything the engine tells the outside world.
//!
//! RULE: Subsystems communicate ONLY through events.
//! A subsystem may never call another subsystem's functions directly.
//! The notification/delivery sink consumes these events; how they turn
//! into emails or in-app alerts is not the engine's concern.

use crate::types::{CycleId, EntityId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every event emitted during a sweep cycle.
/// Variants are added, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetentionEvent {
    // ── Engine events ──────────────────────────────
    CycleStarted {
        cycle: CycleId,
        at: DateTime<Utc>,
    },
    CycleCompleted {
        cycle: CycleId,
        at: DateTime<Utc>,
    },

    // ── Health scoring ─────────────────────────────
    HealthScoreCalculated {
        tenant_id: TenantId,
        overall_score: i64,
        category: String,
        trend: String,
    },
    HealthScoreCritical {
        tenant_id: TenantId,
        overall_score: i64,
        previous_category: Option<String>,
    },

    // ── Churn prediction ───────────────────────────
    ChurnPredicted {
        tenant_id: TenantId,
        prediction_month: String,
        adjusted_probability: f64,
        urgency: String,
    },
    /// Emitted when urgency crosses the intervention threshold.
    /// The playbook subsystem consumes this within the same cycle.
    InterventionRequired {
        tenant_id: TenantId,
        urgency: String,
        playbook_id: Option<EntityId>,
    },

    // ── Playbook lifecycle ─────────────────────────
    PlaybookStarted {
        execution_id: EntityId,
        playbook_id: EntityId,
        tenant_id: TenantId,
        total_steps: i64,
    },
    PlaybookStepExecuted {
        execution_id: EntityId,
        tenant_id: TenantId,
        step_index: i64,
        action: String,
    },
    PlaybookCompleted {
        execution_id: EntityId,
        tenant_id: TenantId,
    },

    // ── Expansion signals ──────────────────────────
    ExpansionSignalDetected {
        signal_id: EntityId,
        tenant_id: TenantId,
        signal_type: String,
        potential_arr: f64,
    },
}

/// One persisted row in the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub cycle: CycleId,
    pub subsystem: String,
    pub event_type: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// Extract a stable string name from a RetentionEvent variant.
/// Used for the event_type column in event_log.
pub fn event_type_name(event: &RetentionEvent) -> &'static str {
    match event {
        RetentionEvent::CycleStarted { .. } => "cycle_started",
        RetentionEvent::CycleCompleted { .. } => "cycle_completed",
        RetentionEvent::HealthScoreCalculated { .. } => "health_score_calculated",
        RetentionEvent::HealthScoreCritical { .. } => "health_score_critical",
        RetentionEvent::ChurnPredicted { .. } => "churn_predicted",
        RetentionEvent::InterventionRequired { .. } => "intervention_required",
        RetentionEvent::PlaybookStarted { .. } => "playbook_started",
        RetentionEvent::PlaybookStepExecuted { .. } => "playbook_step_executed",
        RetentionEvent::PlaybookCompleted { .. } => "playbook_completed",
        RetentionEvent::ExpansionSignalDetected { .. } => "expansion_signal_detected",
    }
}
