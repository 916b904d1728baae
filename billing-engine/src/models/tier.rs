//! Pricing tier models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A user-count band with a per-user monthly price.
///
/// Prices are whole yen. `max_users == None` marks the unbounded last band
/// of a schedule; `tenant_id == None` marks a platform-default band. Tier
/// sets are tenant configuration: created and edited by a billing admin,
/// read-only during calculation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PricingTier {
    pub tier_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub name: String,
    pub min_users: i64,
    pub max_users: Option<i64>,
    pub price_per_user: i64,
    pub sort_order: i32,
    pub created_utc: DateTime<Utc>,
}

/// Input for one band when replacing a tenant's tier schedule.
#[derive(Debug, Clone)]
pub struct CreatePricingTier {
    pub name: String,
    pub min_users: i64,
    pub max_users: Option<i64>,
    pub price_per_user: i64,
    pub sort_order: i32,
}

/// Per-band share of a resolved monthly price. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierBreakdown {
    pub tier_name: String,
    pub min_users: i64,
    pub max_users: Option<i64>,
    pub price_per_user: i64,
    pub users_in_tier: i64,
    pub subtotal: i64,
}

/// Result of resolving a user count against a tier schedule.
///
/// Invariants: breakdown subtotals sum to `total_price`, and (for a
/// positive count) the per-band user counts sum to `user_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingCalculationResult {
    pub total_price: i64,
    pub breakdown: Vec<TierBreakdown>,
    pub user_count: i64,
}
