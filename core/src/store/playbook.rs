use super::{parse_enum, parse_ts, parse_ts_opt, ts, RetentionStore};
use crate::error::EngineResult;
use crate::playbook_subsystem::{PlaybookDefinition, PlaybookExecution, PlaybookStep};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

/// One row in the override audit trail.
#[derive(Debug, Clone)]
pub struct PlaybookAuditRow {
    pub execution_id: String,
    pub action: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl RetentionStore {
    // ── Definitions ────────────────────────────────────────────

    /// Save a playbook definition and its steps atomically, replacing
    /// any prior step list.
    pub fn save_playbook(&self, def: &PlaybookDefinition) -> EngineResult<()> {
        def.validate()?;
        self.conn.execute_batch("BEGIN")?;
        let result = (|| -> EngineResult<()> {
            self.conn.execute(
                "INSERT INTO playbook (playbook_id, name, status)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(playbook_id) DO UPDATE SET
                     name = excluded.name,
                     status = excluded.status",
                params![def.playbook_id, def.name, def.status],
            )?;
            self.conn.execute(
                "DELETE FROM playbook_step WHERE playbook_id = ?1",
                params![def.playbook_id],
            )?;
            for step in &def.steps {
                self.conn.execute(
                    "INSERT INTO playbook_step (playbook_id, step_index, action, delay_days)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![def.playbook_id, step.step_index, step.action, step.delay_days],
                )?;
            }
            Ok(())
        })();
        match result {
            Ok(()) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(())
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    pub fn get_playbook(&self, playbook_id: &str) -> EngineResult<Option<PlaybookDefinition>> {
        let header: Option<(String, String, String)> = self
            .conn
            .query_row(
                "SELECT playbook_id, name, status FROM playbook WHERE playbook_id = ?1",
                params![playbook_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((playbook_id, name, status)) = header else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT step_index, action, delay_days
             FROM playbook_step
             WHERE playbook_id = ?1
             ORDER BY step_index ASC",
        )?;
        let steps = stmt
            .query_map(params![playbook_id], |row| {
                Ok(PlaybookStep {
                    step_index: row.get(0)?,
                    action: row.get(1)?,
                    delay_days: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(PlaybookDefinition { playbook_id, name, status, steps }))
    }

    // ── Executions ─────────────────────────────────────────────

    /// The authoritative check-and-create. Returns false when the
    /// partial unique index rejects a second non-terminal execution for
    /// the same (playbook, tenant) — the caller treats that as "already
    /// active", not as an error.
    pub fn try_insert_execution(&self, exec: &PlaybookExecution) -> EngineResult<bool> {
        let result = self.conn.execute(
            "INSERT INTO playbook_execution (
                execution_id, playbook_id, tenant_id, current_step,
                total_steps, status, started_at, completed_at, next_step_due_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                exec.execution_id,
                exec.playbook_id,
                exec.tenant_id,
                exec.current_step,
                exec.total_steps,
                exec.status.as_str(),
                ts(exec.started_at),
                exec.completed_at.map(ts),
                exec.next_step_due_at.map(ts),
            ],
        );
        match result {
            Ok(_) => Ok(true),
            // Only a unique-index hit means "already active"; other
            // constraint failures (foreign keys) still surface.
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_execution(&self, execution_id: &str) -> EngineResult<Option<PlaybookExecution>> {
        self.conn
            .query_row(
                "SELECT execution_id, playbook_id, tenant_id, current_step,
                        total_steps, status, started_at, completed_at, next_step_due_at
                 FROM playbook_execution WHERE execution_id = ?1",
                params![execution_id],
                Self::map_execution_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn active_execution(
        &self,
        playbook_id: &str,
        tenant_id: &str,
    ) -> EngineResult<Option<PlaybookExecution>> {
        self.conn
            .query_row(
                "SELECT execution_id, playbook_id, tenant_id, current_step,
                        total_steps, status, started_at, completed_at, next_step_due_at
                 FROM playbook_execution
                 WHERE playbook_id = ?1 AND tenant_id = ?2
                   AND status IN ('running', 'paused')",
                params![playbook_id, tenant_id],
                Self::map_execution_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Running executions whose next step has come due.
    pub fn due_executions(&self, now: DateTime<Utc>) -> EngineResult<Vec<PlaybookExecution>> {
        let mut stmt = self.conn.prepare(
            "SELECT execution_id, playbook_id, tenant_id, current_step,
                    total_steps, status, started_at, completed_at, next_step_due_at
             FROM playbook_execution
             WHERE status = 'running'
               AND next_step_due_at IS NOT NULL
               AND next_step_due_at <= ?1
             ORDER BY next_step_due_at ASC",
        )?;
        let rows = stmt
            .query_map(params![ts(now)], Self::map_execution_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Persist a status/progress change. Every mutation path funnels
    /// through the subsystem's transition check before calling this.
    pub fn update_execution(&self, exec: &PlaybookExecution) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE playbook_execution SET
                current_step = ?2,
                status = ?3,
                completed_at = ?4,
                next_step_due_at = ?5
             WHERE execution_id = ?1",
            params![
                exec.execution_id,
                exec.current_step,
                exec.status.as_str(),
                exec.completed_at.map(ts),
                exec.next_step_due_at.map(ts),
            ],
        )?;
        Ok(())
    }

    pub fn execution_count(&self, status: &str) -> EngineResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM playbook_execution WHERE status = ?1",
                params![status],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    fn map_execution_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlaybookExecution> {
        Ok(PlaybookExecution {
            execution_id: row.get(0)?,
            playbook_id: row.get(1)?,
            tenant_id: row.get(2)?,
            current_step: row.get(3)?,
            total_steps: row.get(4)?,
            status: parse_enum(5, row.get(5)?)?,
            started_at: parse_ts(6, row.get(6)?)?,
            completed_at: parse_ts_opt(7, row.get(7)?)?,
            next_step_due_at: parse_ts_opt(8, row.get(8)?)?,
        })
    }

    // ── Audit trail ────────────────────────────────────────────

    pub fn insert_playbook_audit(
        &self,
        execution_id: &str,
        action: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO playbook_audit (execution_id, action, reason, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![execution_id, action, reason, ts(at)],
        )?;
        Ok(())
    }

    pub fn audit_for_execution(
        &self,
        execution_id: &str,
    ) -> EngineResult<Vec<PlaybookAuditRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT execution_id, action, reason, created_at
             FROM playbook_audit
             WHERE execution_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![execution_id], |row| {
                Ok(PlaybookAuditRow {
                    execution_id: row.get(0)?,
                    action: row.get(1)?,
                    reason: row.get(2)?,
                    created_at: parse_ts(3, row.get(3)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
