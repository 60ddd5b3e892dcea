use super::{parse_ts, ts, RetentionStore};
use crate::error::EngineResult;
use crate::nps_subsystem::NpsResponse;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl RetentionStore {
    // ── NPS responses ──────────────────────────────────────────

    pub fn insert_nps_response(&self, response: &NpsResponse) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO nps_response (response_id, tenant_id, score, comment, submitted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                response.response_id,
                response.tenant_id,
                response.score,
                response.comment,
                ts(response.submitted_at),
            ],
        )?;
        Ok(())
    }

    /// Responses submitted in [since, until), newest first.
    pub fn nps_responses_between(
        &self,
        tenant_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> EngineResult<Vec<NpsResponse>> {
        let mut stmt = self.conn.prepare(
            "SELECT response_id, tenant_id, score, comment, submitted_at
             FROM nps_response
             WHERE tenant_id = ?1 AND submitted_at >= ?2 AND submitted_at < ?3
             ORDER BY submitted_at DESC",
        )?;
        let rows = stmt
            .query_map(params![tenant_id, ts(since), ts(until)], |row| {
                Ok(NpsResponse {
                    response_id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    score: row.get(2)?,
                    comment: row.get(3)?,
                    submitted_at: parse_ts(4, row.get(4)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Prompt cooldown state ──────────────────────────────────

    pub fn last_prompt_sent(&self, tenant_id: &str) -> EngineResult<Option<DateTime<Utc>>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT last_sent_at FROM nps_prompt_state WHERE tenant_id = ?1",
                params![tenant_id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(s) => Ok(Some(parse_ts(0, s)?)),
            None => Ok(None),
        }
    }

    pub fn mark_prompt_sent(&self, tenant_id: &str, at: DateTime<Utc>) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO nps_prompt_state (tenant_id, last_sent_at)
             VALUES (?1, ?2)
             ON CONFLICT(tenant_id) DO UPDATE SET
                 last_sent_at = excluded.last_sent_at",
            params![tenant_id, ts(at)],
        )?;
        Ok(())
    }
}
