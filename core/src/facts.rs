//! Usage/billing facts boundary.
//!
//! An external ingestion path writes one `usage_fact` row per tenant per
//! reporting period; the engine treats the table as an opaque read-only
//! feed keyed by tenant id. `TenantFacts` is the normalized bundle the
//! subsystems consume.

use crate::types::TenantId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The latest reporting-period facts for one tenant, plus derived fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantFacts {
    pub tenant_id: TenantId,
    pub period_start: DateTime<Utc>,
    pub period_days: i64,
    pub active_days: i64,
    pub features_used: Vec<String>,
    pub seats_used: i64,
    pub seats_added: i64,
    pub api_calls: i64,
    pub support_open: i64,
    pub support_resolved: i64,
    pub payment_failures: i64,
    pub billing_status: String,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl TenantFacts {
    /// Days since the tenant's last recorded activity, relative to `now`.
    /// A tenant with no recorded activity reads as maximally inactive.
    pub fn days_inactive(&self, now: DateTime<Utc>) -> i64 {
        match self.last_activity_at {
            Some(at) => (now - at).num_days().max(0),
            None => i64::MAX / 2,
        }
    }

    /// Resolve a churn-signal metric by name. Unknown metrics read as
    /// None so a misconfigured signal never fires.
    pub fn metric(&self, name: &str, now: DateTime<Utc>) -> Option<f64> {
        match name {
            "active_days" => Some(self.active_days as f64),
            "days_inactive" => Some(self.days_inactive(now) as f64),
            "seats_used" => Some(self.seats_used as f64),
            "seats_added" => Some(self.seats_added as f64),
            "api_calls" => Some(self.api_calls as f64),
            "support_open" => Some(self.support_open as f64),
            "support_resolved" => Some(self.support_resolved as f64),
            "payment_failures" => Some(self.payment_failures as f64),
            "billing_delinquent" => {
                Some(if self.billing_status == "delinquent" { 1.0 } else { 0.0 })
            }
            _ => None,
        }
    }
}
