use super::{parse_ts, parse_ts_opt, ts, RetentionStore};
use crate::{error::EngineResult, facts::TenantFacts, types::TenantId};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

/// Row from the `tenant` directory table.
#[derive(Debug, Clone)]
pub struct TenantRow {
    pub tenant_id: TenantId,
    pub name: String,
    pub vertical_id: Option<String>,
    pub plan_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl RetentionStore {
    // ── Tenant directory ───────────────────────────────────────

    pub fn insert_tenant(&self, row: &TenantRow) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO tenant (tenant_id, name, vertical_id, plan_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.tenant_id,
                row.name,
                row.vertical_id,
                row.plan_id,
                row.status,
                ts(row.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_tenant(&self, tenant_id: &str) -> EngineResult<Option<TenantRow>> {
        self.conn
            .query_row(
                "SELECT tenant_id, name, vertical_id, plan_id, status, created_at
                 FROM tenant WHERE tenant_id = ?1",
                params![tenant_id],
                Self::map_tenant_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn active_tenants(&self) -> EngineResult<Vec<TenantRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT tenant_id, name, vertical_id, plan_id, status, created_at
             FROM tenant WHERE status = 'active'
             ORDER BY tenant_id ASC",
        )?;
        let rows = stmt
            .query_map([], Self::map_tenant_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn tenant_count(&self, status: &str) -> EngineResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM tenant WHERE status = ?1",
                params![status],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    fn map_tenant_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TenantRow> {
        Ok(TenantRow {
            tenant_id: row.get(0)?,
            name: row.get(1)?,
            vertical_id: row.get(2)?,
            plan_id: row.get(3)?,
            status: row.get(4)?,
            created_at: parse_ts(5, row.get(5)?)?,
        })
    }

    // ── Usage facts feed ───────────────────────────────────────

    /// Write one reporting-period fact row. Outside of tests and the
    /// demo seeder this is the ingestion collaborator's job.
    pub fn insert_usage_fact(&self, facts: &TenantFacts, now: DateTime<Utc>) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO usage_fact (
                tenant_id, period_start, period_days, active_days,
                features_used, seats_used, seats_added, api_calls,
                support_open, support_resolved, payment_failures,
                billing_status, last_activity_at, created_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                facts.tenant_id,
                ts(facts.period_start),
                facts.period_days,
                facts.active_days,
                serde_json::to_string(&facts.features_used)?,
                facts.seats_used,
                facts.seats_added,
                facts.api_calls,
                facts.support_open,
                facts.support_resolved,
                facts.payment_failures,
                facts.billing_status,
                facts.last_activity_at.map(ts),
                ts(now),
            ],
        )?;
        Ok(())
    }

    /// Latest reporting-period facts for a tenant; None when the feed has
    /// never delivered for this tenant.
    pub fn latest_facts(&self, tenant_id: &str) -> EngineResult<Option<TenantFacts>> {
        let mut rows = self.recent_facts(tenant_id, 1)?;
        Ok(rows.pop())
    }

    /// The most recent `limit` fact rows, newest first.
    pub fn recent_facts(&self, tenant_id: &str, limit: i64) -> EngineResult<Vec<TenantFacts>> {
        let mut stmt = self.conn.prepare(
            "SELECT tenant_id, period_start, period_days, active_days,
                    features_used, seats_used, seats_added, api_calls,
                    support_open, support_resolved, payment_failures,
                    billing_status, last_activity_at
             FROM usage_fact
             WHERE tenant_id = ?1
             ORDER BY period_start DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![tenant_id, limit], |row| {
                let features_raw: String = row.get(4)?;
                let features_used = serde_json::from_str(&features_raw).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        4,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;
                Ok(TenantFacts {
                    tenant_id: row.get(0)?,
                    period_start: parse_ts(1, row.get(1)?)?,
                    period_days: row.get(2)?,
                    active_days: row.get(3)?,
                    features_used,
                    seats_used: row.get(5)?,
                    seats_added: row.get(6)?,
                    api_calls: row.get(7)?,
                    support_open: row.get(8)?,
                    support_resolved: row.get(9)?,
                    payment_failures: row.get(10)?,
                    billing_status: row.get(11)?,
                    last_activity_at: parse_ts_opt(12, row.get(12)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
