//! Playbook execution subsystem — automated retention interventions.
//!
//! Manages the full execution lifecycle:
//!   running → paused → running (operator pause/resume)
//!   running | paused → cancelled (operator cancel)
//!   running → completed (final step finishes)
//!
//! Every status mutation funnels through one table-driven transition
//! check. At most one non-terminal execution may exist per
//! (playbook, tenant); the store's partial unique index makes the
//! INSERT itself the authoritative check-and-create.
//!
//! Execution: third in every cycle — consumes the churn subsystem's
//! intervention events, then advances steps that have come due.

use crate::{
    clock::SweepClock,
    error::{EngineError, EngineResult, ParseEnumError},
    event::RetentionEvent,
    store::RetentionStore,
    subsystem::SweepSubsystem,
    types::{EntityId, TenantId},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const SWEEP_NAME: &str = "playbook";

// ── State machine ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Cancelled)
    }
}

impl FromStr for ExecutionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "paused" => Ok(ExecutionStatus::Paused),
            "completed" => Ok(ExecutionStatus::Completed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            _ => Err(ParseEnumError { kind: "execution status", value: s.into() }),
        }
    }
}

/// The single transition table. Every code path that mutates an
/// execution's status checks here — the table is never duplicated.
pub fn can_transition(from: ExecutionStatus, to: ExecutionStatus) -> bool {
    use ExecutionStatus::*;
    matches!(
        (from, to),
        (Running, Paused)
            | (Running, Cancelled)
            | (Running, Completed)
            | (Paused, Running)
            | (Paused, Cancelled)
    )
}

/// Operator override actions over a live execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideAction {
    Pause,
    Resume,
    Cancel,
}

impl OverrideAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideAction::Pause => "pause",
            OverrideAction::Resume => "resume",
            OverrideAction::Cancel => "cancel",
        }
    }

    fn target(&self) -> ExecutionStatus {
        match self {
            OverrideAction::Pause => ExecutionStatus::Paused,
            OverrideAction::Resume => ExecutionStatus::Running,
            OverrideAction::Cancel => ExecutionStatus::Cancelled,
        }
    }
}

impl FromStr for OverrideAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(OverrideAction::Pause),
            "resume" => Ok(OverrideAction::Resume),
            "cancel" => Ok(OverrideAction::Cancel),
            _ => Err(ParseEnumError { kind: "override action", value: s.into() }),
        }
    }
}

// ── Public types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookStep {
    pub step_index: i64,
    pub action: String,
    /// Wall-clock days before this step runs.
    pub delay_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookDefinition {
    pub playbook_id: EntityId,
    pub name: String,
    /// "active" | "inactive". Inactive playbooks are never started.
    pub status: String,
    pub steps: Vec<PlaybookStep>,
}

impl PlaybookDefinition {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.status != "active" && self.status != "inactive" {
            return Err(EngineError::validation(format!(
                "playbook status must be active or inactive, got '{}'",
                self.status
            )));
        }
        if self.steps.is_empty() {
            return Err(EngineError::validation("playbook must have at least one step"));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.step_index != i as i64 {
                return Err(EngineError::validation(format!(
                    "step indexes must be contiguous from 0; position {i} has index {}",
                    step.step_index
                )));
            }
            if step.delay_days < 0 {
                return Err(EngineError::validation(format!(
                    "step {i} has negative delay"
                )));
            }
        }
        Ok(())
    }
}

/// One execution of a playbook against one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookExecution {
    pub execution_id: EntityId,
    pub playbook_id: EntityId,
    pub tenant_id: TenantId,
    pub current_step: i64,
    pub total_steps: i64,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// When the next step runs; None once terminal.
    pub next_step_due_at: Option<DateTime<Utc>>,
}

// ── Subsystem ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct PlaybookSubsystem;

impl PlaybookSubsystem {
    pub fn new() -> Self {
        Self
    }

    /// Start a playbook against a tenant.
    ///
    /// Returns None when a non-terminal execution already exists for
    /// this (playbook, tenant) pair — the request is rejected, not
    /// queued. The insert itself enforces the invariant; there is no
    /// separate check to race against.
    pub fn execute(
        &self,
        store: &RetentionStore,
        definition: &PlaybookDefinition,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<PlaybookExecution>> {
        definition.validate()?;
        if !definition.is_active() {
            return Err(EngineError::validation(format!(
                "playbook '{}' is inactive",
                definition.playbook_id
            )));
        }
        if store.get_tenant(tenant_id)?.is_none() {
            return Err(EngineError::not_found("tenant", tenant_id));
        }

        let first_delay = definition.steps[0].delay_days;
        let execution = PlaybookExecution {
            execution_id: uuid::Uuid::new_v4().to_string(),
            playbook_id: definition.playbook_id.clone(),
            tenant_id: tenant_id.to_string(),
            current_step: 0,
            total_steps: definition.steps.len() as i64,
            status: ExecutionStatus::Running,
            started_at: now,
            completed_at: None,
            next_step_due_at: Some(now + Duration::days(first_delay)),
        };

        if !store.try_insert_execution(&execution)? {
            log::info!(
                "playbook: '{}' already active for tenant {tenant_id}, start rejected",
                definition.playbook_id,
            );
            return Ok(None);
        }

        log::info!(
            "playbook: started '{}' for tenant {tenant_id} ({} steps)",
            definition.playbook_id,
            execution.total_steps,
        );
        Ok(Some(execution))
    }

    /// Apply an operator override. Invalid transitions are rejected
    /// with a conflict and leave state unchanged; the reason is always
    /// recorded for audit.
    pub fn override_execution(
        &self,
        store: &RetentionStore,
        execution_id: &str,
        action: OverrideAction,
        reason: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<PlaybookExecution> {
        let mut execution = store
            .get_execution(execution_id)?
            .ok_or_else(|| EngineError::not_found("playbook execution", execution_id))?;

        let target = action.target();
        if !can_transition(execution.status, target) {
            return Err(EngineError::conflict(format!(
                "cannot {} execution {execution_id} in status {}",
                action.as_str(),
                execution.status.as_str(),
            )));
        }

        execution.status = target;
        if target == ExecutionStatus::Cancelled {
            // Cooperative cancellation: terminal immediately, the step
            // scheduler simply never picks it up again.
            execution.next_step_due_at = None;
        }
        store.update_execution(&execution)?;
        store.insert_playbook_audit(execution_id, action.as_str(), reason, now)?;

        log::info!(
            "playbook: execution {execution_id} {} ({reason})",
            action.as_str(),
        );
        Ok(execution)
    }

    /// Advance every running execution whose next step has come due.
    pub fn advance_due_steps(
        &self,
        store: &RetentionStore,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<RetentionEvent>> {
        let mut events = Vec::new();

        for mut execution in store.due_executions(now)? {
            let definition = store
                .get_playbook(&execution.playbook_id)?
                .ok_or_else(|| {
                    EngineError::not_found("playbook", execution.playbook_id.clone())
                })?;

            let step_index = execution.current_step;
            let action = definition
                .steps
                .get(step_index as usize)
                .map(|s| s.action.clone())
                .unwrap_or_default();

            events.push(RetentionEvent::PlaybookStepExecuted {
                execution_id: execution.execution_id.clone(),
                tenant_id: execution.tenant_id.clone(),
                step_index,
                action,
            });

            execution.current_step += 1;
            if execution.current_step >= execution.total_steps {
                // The transition check guards even this internal path.
                debug_assert!(can_transition(execution.status, ExecutionStatus::Completed));
                execution.status = ExecutionStatus::Completed;
                execution.completed_at = Some(now);
                execution.next_step_due_at = None;
                events.push(RetentionEvent::PlaybookCompleted {
                    execution_id: execution.execution_id.clone(),
                    tenant_id: execution.tenant_id.clone(),
                });
                log::info!(
                    "playbook: execution {} completed for tenant {}",
                    execution.execution_id,
                    execution.tenant_id,
                );
            } else {
                let delay = definition
                    .steps
                    .get(execution.current_step as usize)
                    .map(|s| s.delay_days)
                    .unwrap_or(0);
                execution.next_step_due_at = Some(now + Duration::days(delay));
            }

            store.update_execution(&execution)?;
        }

        Ok(events)
    }

    /// Start interventions requested by this cycle's churn predictions.
    fn trigger_interventions(
        &self,
        store: &RetentionStore,
        clock: &SweepClock,
        events_in: &[RetentionEvent],
    ) -> EngineResult<Vec<RetentionEvent>> {
        let mut events = Vec::new();

        for event in events_in {
            let RetentionEvent::InterventionRequired { tenant_id, urgency, playbook_id } = event
            else {
                continue;
            };
            let Some(playbook_id) = playbook_id else {
                continue;
            };

            let Some(definition) = store.get_playbook(playbook_id)? else {
                log::warn!(
                    "playbook: intervention for tenant {tenant_id} wants unknown playbook '{playbook_id}'"
                );
                continue;
            };
            if !definition.is_active() {
                log::debug!(
                    "playbook: '{playbook_id}' is inactive, skipping intervention for {tenant_id}"
                );
                continue;
            }

            match self.execute(store, &definition, tenant_id, clock.now)? {
                Some(execution) => {
                    log::info!(
                        "playbook: urgency={urgency} triggered '{playbook_id}' for tenant {tenant_id}"
                    );
                    events.push(RetentionEvent::PlaybookStarted {
                        execution_id: execution.execution_id.clone(),
                        playbook_id: execution.playbook_id.clone(),
                        tenant_id: tenant_id.clone(),
                        total_steps: execution.total_steps,
                    });
                }
                // Already active: the running intervention stands.
                None => continue,
            }
        }

        Ok(events)
    }
}

impl SweepSubsystem for PlaybookSubsystem {
    fn name(&self) -> &'static str {
        SWEEP_NAME
    }

    fn run_sweep(
        &mut self,
        store: &RetentionStore,
        clock: &SweepClock,
        events_in: &[RetentionEvent],
    ) -> EngineResult<Vec<RetentionEvent>> {
        // Start newly requested interventions first so a zero-delay
        // first step can run in the same cycle.
        let mut events = self.trigger_interventions(store, clock, events_in)?;
        events.extend(self.advance_due_steps(store, clock.now)?);
        Ok(events)
    }
}
