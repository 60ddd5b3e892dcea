//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Subsystems call store methods — they never execute SQL directly.

use crate::{
    error::EngineResult,
    event::EventLogEntry,
    types::{CycleId, TenantId},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

mod churn;
mod expansion;
mod health;
mod nps;
mod playbook;
mod profile;
mod tenant;

pub use playbook::PlaybookAuditRow;
pub use tenant::TenantRow;

pub struct RetentionStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl RetentionStore {
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new isolated database.
    pub fn reopen(&self) -> EngineResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EngineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_profiles.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_health.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_churn.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/005_playbooks.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/006_expansion.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/007_nps.sql"))?;
        Ok(())
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (cycle, subsystem, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.cycle as i64,
                entry.subsystem,
                entry.event_type,
                entry.payload,
                ts(entry.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn events_for_cycle(&self, cycle: CycleId) -> EngineResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, cycle, subsystem, event_type, payload, created_at
             FROM event_log WHERE cycle = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![cycle as i64], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    cycle: row.get::<_, i64>(1)? as u64,
                    subsystem: row.get(2)?,
                    event_type: row.get(3)?,
                    payload: row.get(4)?,
                    created_at: parse_ts(5, row.get(5)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self, event_type: &str) -> EngineResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM event_log WHERE event_type = ?1",
                params![event_type],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    // ── Sweep state ────────────────────────────────────────────

    pub fn sweep_last_run(
        &self,
        tenant_id: &str,
        sweep: &str,
    ) -> EngineResult<Option<DateTime<Utc>>> {
        use rusqlite::OptionalExtension;
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT last_run_at FROM sweep_state
                 WHERE tenant_id = ?1 AND sweep = ?2",
                params![tenant_id, sweep],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(s) => Ok(Some(parse_ts(0, s)?)),
            None => Ok(None),
        }
    }

    pub fn record_sweep_run(
        &self,
        tenant_id: &str,
        sweep: &str,
        at: DateTime<Utc>,
    ) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO sweep_state (tenant_id, sweep, last_run_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(tenant_id, sweep) DO UPDATE SET
                 last_run_at = excluded.last_run_at",
            params![tenant_id, sweep, ts(at)],
        )?;
        Ok(())
    }

    // ── Sweep errors ───────────────────────────────────────────

    pub fn record_sweep_error(
        &self,
        cycle: CycleId,
        subsystem: &str,
        tenant_id: &TenantId,
        message: &str,
        at: DateTime<Utc>,
    ) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO sweep_error (cycle, subsystem, tenant_id, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![cycle as i64, subsystem, tenant_id, message, ts(at)],
        )?;
        Ok(())
    }

    pub fn sweep_error_count(&self, subsystem: &str) -> EngineResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM sweep_error WHERE subsystem = ?1",
                params![subsystem],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }
}

/// Timestamps are stored as RFC 3339 text columns.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn parse_ts(col: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                col,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

pub(crate) fn parse_ts_opt(
    col: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(col, s)).transpose()
}

/// Parse a stored enum discriminant back into its typed form.
pub(crate) fn parse_enum<T>(col: usize, raw: String) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}
