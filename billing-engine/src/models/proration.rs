//! Proration ledger model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User-count-changing action recorded on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserCountAction {
    Added,
    Activated,
    Deactivated,
    Deleted,
}

impl UserCountAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserCountAction::Added => "added",
            UserCountAction::Activated => "activated",
            UserCountAction::Deactivated => "deactivated",
            UserCountAction::Deleted => "deleted",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "activated" => UserCountAction::Activated,
            "deactivated" => UserCountAction::Deactivated,
            "deleted" => UserCountAction::Deleted,
            _ => UserCountAction::Added,
        }
    }
}

/// One entry on the per-tenant, per-month proration ledger.
///
/// Immutable after creation: the ledger is append-only so every event stays
/// independently replayable for disputes. Callers supply the before/after
/// counts explicitly; the event never reads "current" state.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProrationEvent {
    pub event_id: Uuid,
    pub event_date: NaiveDate,
    pub action: String,
    pub user_count_before: i64,
    pub user_count_after: i64,
    pub days_in_month: i64,
    pub remaining_days: i64,
    pub monthly_price_before: i64,
    pub monthly_price_after: i64,
    /// Tax-inclusive day-weighted charge. Negative for removals (a credit);
    /// the sign is preserved through aggregation.
    pub daily_charge: i64,
    pub created_utc: DateTime<Utc>,
}

impl ProrationEvent {
    pub fn action(&self) -> UserCountAction {
        UserCountAction::from_string(&self.action)
    }
}
