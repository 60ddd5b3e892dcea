use super::{parse_enum, parse_ts, ts, RetentionStore};
use crate::churn_subsystem::ChurnPrediction;
use crate::error::EngineResult;
use rusqlite::{params, OptionalExtension};

impl RetentionStore {
    // ── Churn predictions ──────────────────────────────────────

    /// Upsert: one row per tenant per prediction month. A second
    /// prediction in the same month supersedes the first.
    pub fn upsert_churn_prediction(&self, p: &ChurnPrediction) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO churn_prediction (
                tenant_id, vertical_id, prediction_month, base_probability,
                seasonal_adjustment, adjusted_probability, intervention_urgency,
                model_version, contributing_factors, predicted_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
            ON CONFLICT(tenant_id, prediction_month) DO UPDATE SET
                vertical_id = excluded.vertical_id,
                base_probability = excluded.base_probability,
                seasonal_adjustment = excluded.seasonal_adjustment,
                adjusted_probability = excluded.adjusted_probability,
                intervention_urgency = excluded.intervention_urgency,
                model_version = excluded.model_version,
                contributing_factors = excluded.contributing_factors,
                predicted_at = excluded.predicted_at",
            params![
                p.tenant_id,
                p.vertical_id,
                p.prediction_month,
                p.base_probability,
                p.seasonal_adjustment,
                p.adjusted_probability,
                p.intervention_urgency.as_str(),
                p.model_version,
                serde_json::to_string(&p.contributing_factors)?,
                ts(p.predicted_at),
            ],
        )?;
        Ok(())
    }

    pub fn latest_churn_prediction(
        &self,
        tenant_id: &str,
    ) -> EngineResult<Option<ChurnPrediction>> {
        self.conn
            .query_row(
                "SELECT tenant_id, vertical_id, prediction_month, base_probability,
                        seasonal_adjustment, adjusted_probability, intervention_urgency,
                        model_version, contributing_factors, predicted_at
                 FROM churn_prediction
                 WHERE tenant_id = ?1
                 ORDER BY prediction_month DESC
                 LIMIT 1",
                params![tenant_id],
                Self::map_churn_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Prediction history, newest month first.
    pub fn churn_history(
        &self,
        tenant_id: &str,
        limit: i64,
    ) -> EngineResult<Vec<ChurnPrediction>> {
        let mut stmt = self.conn.prepare(
            "SELECT tenant_id, vertical_id, prediction_month, base_probability,
                    seasonal_adjustment, adjusted_probability, intervention_urgency,
                    model_version, contributing_factors, predicted_at
             FROM churn_prediction
             WHERE tenant_id = ?1
             ORDER BY prediction_month DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![tenant_id, limit], Self::map_churn_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn churn_prediction_count(&self) -> EngineResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM churn_prediction", [], |row| row.get(0))
            .map_err(Into::into)
    }

    pub fn churn_prediction_count_for(
        &self,
        tenant_id: &str,
        prediction_month: &str,
    ) -> EngineResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM churn_prediction
                 WHERE tenant_id = ?1 AND prediction_month = ?2",
                params![tenant_id, prediction_month],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    fn map_churn_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChurnPrediction> {
        let factors_raw: String = row.get(8)?;
        let contributing_factors = serde_json::from_str(&factors_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                8,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?;
        Ok(ChurnPrediction {
            tenant_id: row.get(0)?,
            vertical_id: row.get(1)?,
            prediction_month: row.get(2)?,
            base_probability: row.get(3)?,
            seasonal_adjustment: row.get(4)?,
            adjusted_probability: row.get(5)?,
            intervention_urgency: parse_enum(6, row.get(6)?)?,
            model_version: row.get(7)?,
            contributing_factors,
            predicted_at: parse_ts(9, row.get(9)?)?,
        })
    }
}
