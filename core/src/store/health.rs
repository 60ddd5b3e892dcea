use super::{parse_enum, parse_ts, ts, RetentionStore};
use crate::error::EngineResult;
use crate::health_subsystem::HealthScore;
use rusqlite::{params, OptionalExtension};

impl RetentionStore {
    // ── Health score history ───────────────────────────────────

    /// Append one score row. History is append-only; rows are never
    /// updated after insertion.
    pub fn insert_health_score(&self, score: &HealthScore) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO health_score (
                tenant_id, calculated_at, engagement, adoption, satisfaction,
                support, growth, overall_score, category, trend, churn_probability
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                score.tenant_id,
                ts(score.calculated_at),
                score.engagement,
                score.adoption,
                score.satisfaction,
                score.support,
                score.growth,
                score.overall_score,
                score.category.as_str(),
                score.trend.as_str(),
                score.churn_probability,
            ],
        )?;
        Ok(())
    }

    pub fn latest_health_score(&self, tenant_id: &str) -> EngineResult<Option<HealthScore>> {
        let mut rows = self.health_history(tenant_id, 1)?;
        Ok(rows.pop())
    }

    /// The most recent `limit` scores, newest first.
    pub fn health_history(&self, tenant_id: &str, limit: i64) -> EngineResult<Vec<HealthScore>> {
        let mut stmt = self.conn.prepare(
            "SELECT tenant_id, calculated_at, engagement, adoption, satisfaction,
                    support, growth, overall_score, category, trend, churn_probability
             FROM health_score
             WHERE tenant_id = ?1
             ORDER BY calculated_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![tenant_id, limit], Self::map_health_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn health_score_count(&self) -> EngineResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM health_score", [], |row| row.get(0))
            .map_err(Into::into)
    }

    pub fn average_overall_score(&self) -> EngineResult<Option<f64>> {
        self.conn
            .query_row(
                "SELECT AVG(overall_score) FROM health_score h
                 WHERE h.id = (SELECT MAX(id) FROM health_score
                               WHERE tenant_id = h.tenant_id)",
                [],
                |row| row.get::<_, Option<f64>>(0),
            )
            .optional()
            .map(Option::flatten)
            .map_err(Into::into)
    }

    fn map_health_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HealthScore> {
        Ok(HealthScore {
            tenant_id: row.get(0)?,
            calculated_at: parse_ts(1, row.get(1)?)?,
            engagement: row.get(2)?,
            adoption: row.get(3)?,
            satisfaction: row.get(4)?,
            support: row.get(5)?,
            growth: row.get(6)?,
            overall_score: row.get(7)?,
            category: parse_enum(8, row.get(8)?)?,
            trend: parse_enum(9, row.get(9)?)?,
            churn_probability: row.get(10)?,
        })
    }
}
