use super::{ts, RetentionStore};
use crate::{error::EngineResult, profile::RetentionProfile};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl RetentionStore {
    /// Save (insert or replace) a profile. Validation runs first; an
    /// invalid profile never reaches the table.
    pub fn save_profile(
        &self,
        profile: &RetentionProfile,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        profile.validate()?;
        self.conn.execute(
            "INSERT INTO retention_profile (
                vertical_id, label, health_weights, seasonality_calendar,
                churn_risk_signals, critical_features, max_inactivity_days,
                playbook_overrides, upsell_signals, active, updated_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
            ON CONFLICT(vertical_id) DO UPDATE SET
                label = excluded.label,
                health_weights = excluded.health_weights,
                seasonality_calendar = excluded.seasonality_calendar,
                churn_risk_signals = excluded.churn_risk_signals,
                critical_features = excluded.critical_features,
                max_inactivity_days = excluded.max_inactivity_days,
                playbook_overrides = excluded.playbook_overrides,
                upsell_signals = excluded.upsell_signals,
                active = excluded.active,
                updated_at = excluded.updated_at",
            params![
                profile.vertical_id,
                profile.label,
                serde_json::to_string(&profile.health_weights)?,
                serde_json::to_string(&profile.seasonality_calendar)?,
                serde_json::to_string(&profile.churn_risk_signals)?,
                serde_json::to_string(&profile.critical_features)?,
                profile.max_inactivity_days,
                serde_json::to_string(&profile.playbook_overrides)?,
                serde_json::to_string(&profile.upsell_signals)?,
                profile.active as i64,
                ts(now),
            ],
        )?;
        Ok(())
    }

    /// Load the active profile for a vertical; None when the vertical has
    /// no profile (callers fall back to equal weights).
    pub fn get_profile(&self, vertical_id: &str) -> EngineResult<Option<RetentionProfile>> {
        let raw = self
            .conn
            .query_row(
                "SELECT vertical_id, label, health_weights, seasonality_calendar,
                        churn_risk_signals, critical_features, max_inactivity_days,
                        playbook_overrides, upsell_signals, active
                 FROM retention_profile
                 WHERE vertical_id = ?1 AND active = 1",
                params![vertical_id],
                Self::map_profile_row,
            )
            .optional()?;
        Ok(raw)
    }

    pub fn all_profiles(&self) -> EngineResult<Vec<RetentionProfile>> {
        let mut stmt = self.conn.prepare(
            "SELECT vertical_id, label, health_weights, seasonality_calendar,
                    churn_risk_signals, critical_features, max_inactivity_days,
                    playbook_overrides, upsell_signals, active
             FROM retention_profile
             ORDER BY vertical_id ASC",
        )?;
        let rows = stmt
            .query_map([], Self::map_profile_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_profile_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RetentionProfile> {
        fn col_json<T: serde::de::DeserializeOwned>(
            col: usize,
            raw: String,
        ) -> rusqlite::Result<T> {
            serde_json::from_str(&raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    col,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        }

        Ok(RetentionProfile {
            vertical_id: row.get(0)?,
            label: row.get(1)?,
            health_weights: col_json(2, row.get(2)?)?,
            seasonality_calendar: col_json(3, row.get(3)?)?,
            churn_risk_signals: col_json(4, row.get(4)?)?,
            critical_features: col_json(5, row.get(5)?)?,
            max_inactivity_days: row.get(6)?,
            playbook_overrides: col_json(7, row.get(7)?)?,
            upsell_signals: col_json(8, row.get(8)?)?,
            active: row.get::<_, i64>(9)? != 0,
        })
    }
}
