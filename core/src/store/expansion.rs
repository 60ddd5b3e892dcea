use super::{parse_enum, parse_ts, ts, RetentionStore};
use crate::error::EngineResult;
use crate::expansion_subsystem::ExpansionSignal;
use rusqlite::{params, OptionalExtension};

impl RetentionStore {
    // ── Expansion signals ──────────────────────────────────────

    pub fn insert_expansion_signal(&self, signal: &ExpansionSignal) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO expansion_signal (
                signal_id, tenant_id, signal_type, current_plan,
                recommended_plan, potential_arr, status, detected_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                signal.signal_id,
                signal.tenant_id,
                signal.signal_type,
                signal.current_plan,
                signal.recommended_plan,
                signal.potential_arr,
                signal.status.as_str(),
                ts(signal.detected_at),
            ],
        )?;
        Ok(())
    }

    /// An open (new/contacted) signal of this type for this tenant, if
    /// one exists. The detector checks this before creating — open
    /// signals are never duplicated.
    pub fn open_expansion_signal(
        &self,
        tenant_id: &str,
        signal_type: &str,
    ) -> EngineResult<Option<ExpansionSignal>> {
        self.conn
            .query_row(
                "SELECT signal_id, tenant_id, signal_type, current_plan,
                        recommended_plan, potential_arr, status, detected_at
                 FROM expansion_signal
                 WHERE tenant_id = ?1 AND signal_type = ?2
                   AND status IN ('new', 'contacted')
                 LIMIT 1",
                params![tenant_id, signal_type],
                Self::map_signal_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_expansion_signal(&self, signal_id: &str) -> EngineResult<Option<ExpansionSignal>> {
        self.conn
            .query_row(
                "SELECT signal_id, tenant_id, signal_type, current_plan,
                        recommended_plan, potential_arr, status, detected_at
                 FROM expansion_signal WHERE signal_id = ?1",
                params![signal_id],
                Self::map_signal_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn update_expansion_signal_status(
        &self,
        signal_id: &str,
        status: &str,
    ) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE expansion_signal SET status = ?2 WHERE signal_id = ?1",
            params![signal_id, status],
        )?;
        Ok(())
    }

    pub fn expansion_signals_for_tenant(
        &self,
        tenant_id: &str,
    ) -> EngineResult<Vec<ExpansionSignal>> {
        let mut stmt = self.conn.prepare(
            "SELECT signal_id, tenant_id, signal_type, current_plan,
                    recommended_plan, potential_arr, status, detected_at
             FROM expansion_signal
             WHERE tenant_id = ?1
             ORDER BY detected_at DESC",
        )?;
        let rows = stmt
            .query_map(params![tenant_id], Self::map_signal_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn open_expansion_signal_count(&self) -> EngineResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM expansion_signal
                 WHERE status IN ('new', 'contacted')",
                [],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    fn map_signal_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExpansionSignal> {
        Ok(ExpansionSignal {
            signal_id: row.get(0)?,
            tenant_id: row.get(1)?,
            signal_type: row.get(2)?,
            current_plan: row.get(3)?,
            recommended_plan: row.get(4)?,
            potential_arr: row.get(5)?,
            status: parse_enum(6, row.get(6)?)?,
            detected_at: parse_ts(7, row.get(7)?)?,
        })
    }
}
