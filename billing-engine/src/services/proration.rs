//! Mid-month proration for user-count changes.

use crate::models::{PricingTier, ProrationEvent, UserCountAction};
use crate::services::metrics::PRORATION_EVENTS_TOTAL;
use crate::services::repository::BillingStore;
use crate::services::{pricing, tax};
use chrono::{Datelike, NaiveDate, Utc};
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Calendar days in the given month (28-31).
pub fn days_in_month(year: i32, month: u32) -> Result<i64, AppError> {
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("invalid month {}-{:02}", year, month))
    })?;
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("invalid month {}-{:02}", year, month))
    })?;
    Ok((next_first - first).num_days())
}

/// Days from `date` to month end, inclusive of the day itself: the day of
/// a change is billed.
pub fn remaining_days(date: NaiveDate) -> Result<i64, AppError> {
    let days = days_in_month(date.year(), date.month())?;
    Ok(days - i64::from(date.day()) + 1)
}

/// Price the delta of a single user-count change for the rest of the month.
///
/// Two independent tier resolutions give the before/after monthly prices;
/// the pre-tax charge floor-divides the day-weighted delta, and tax is then
/// baked into the stored `daily_charge`. A removal produces a negative
/// charge (a credit) whose sign survives aggregation. Pure given its
/// inputs, so every event is independently replayable.
pub fn calculate_daily_proration(
    date: NaiveDate,
    action: UserCountAction,
    user_count_before: i64,
    user_count_after: i64,
    tiers: Option<&[PricingTier]>,
) -> Result<ProrationEvent, AppError> {
    let days = days_in_month(date.year(), date.month())?;
    let remaining = remaining_days(date)?;

    let price_before = pricing::calculate_monthly_price(user_count_before, tiers)?.total_price;
    let price_after = pricing::calculate_monthly_price(user_count_after, tiers)?.total_price;
    let price_delta = price_after - price_before;

    let pre_tax_charge = (price_delta * remaining).div_euclid(days);
    let daily_charge = tax::calculate_total_with_tax(pre_tax_charge);

    Ok(ProrationEvent {
        event_id: Uuid::new_v4(),
        event_date: date,
        action: action.as_str().to_string(),
        user_count_before,
        user_count_after,
        days_in_month: days,
        remaining_days: remaining,
        monthly_price_before: price_before,
        monthly_price_after: price_after,
        daily_charge,
        created_utc: Utc::now(),
    })
}

/// Append-only recorder for user-count changes.
///
/// Resolves the tenant schedule, computes the event and appends it to the
/// ledger. Reads of the ledger never lock; only the append goes through the
/// store's serialization boundary.
pub struct ProrationLedger {
    store: Arc<dyn BillingStore>,
}

impl ProrationLedger {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn record(
        &self,
        tenant_id: Uuid,
        date: NaiveDate,
        action: UserCountAction,
        user_count_before: i64,
        user_count_after: i64,
    ) -> Result<ProrationEvent, AppError> {
        let schedule = self.store.tier_schedule(tenant_id).await?;
        let tiers = (!schedule.is_empty()).then_some(schedule.as_slice());

        let event =
            calculate_daily_proration(date, action, user_count_before, user_count_after, tiers)?;
        self.store.append_proration(tenant_id, &event).await?;

        PRORATION_EVENTS_TOTAL
            .with_label_values(&[action.as_str()])
            .inc();
        info!(
            event_id = %event.event_id,
            daily_charge = event.daily_charge,
            "Proration event recorded"
        );

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn month_lengths() {
        assert_eq!(days_in_month(2025, 11).unwrap(), 30);
        assert_eq!(days_in_month(2025, 12).unwrap(), 31);
        assert_eq!(days_in_month(2025, 2).unwrap(), 28);
        assert_eq!(days_in_month(2024, 2).unwrap(), 29);
    }

    #[test]
    fn invalid_month_rejected() {
        assert!(days_in_month(2025, 13).is_err());
        assert!(days_in_month(2025, 0).is_err());
    }

    #[test]
    fn remaining_days_include_the_event_day() {
        assert_eq!(remaining_days(date(2025, 11, 20)).unwrap(), 11);
        assert_eq!(remaining_days(date(2025, 11, 1)).unwrap(), 30);
        assert_eq!(remaining_days(date(2025, 11, 30)).unwrap(), 1);
    }

    #[test]
    fn adding_five_users_on_day_twenty() {
        let event =
            calculate_daily_proration(date(2025, 11, 20), UserCountAction::Added, 49, 54, None)
                .unwrap();
        assert_eq!(event.days_in_month, 30);
        assert_eq!(event.remaining_days, 11);
        assert_eq!(event.monthly_price_before, 41_200);
        assert_eq!(event.monthly_price_after, 45_200);
        // floor(4000 * 11 / 30) = 1466, plus floor 10% tax.
        assert_eq!(event.daily_charge, 1_612);
    }

    #[test]
    fn removal_yields_a_credit() {
        let event = calculate_daily_proration(
            date(2025, 11, 20),
            UserCountAction::Deactivated,
            54,
            49,
            None,
        )
        .unwrap();
        assert!(event.daily_charge < 0);
        assert_eq!(event.monthly_price_after - event.monthly_price_before, -4_000);
        // floor(-4000 * 11 / 30) = -1467, plus truncated tax.
        assert_eq!(event.daily_charge, -1_613);
    }

    #[test]
    fn credit_round_trips_through_tax_removal() {
        let event = calculate_daily_proration(
            date(2025, 11, 20),
            UserCountAction::Deleted,
            54,
            49,
            None,
        )
        .unwrap();
        let net = tax::subtotal_from_gross(event.daily_charge);
        assert_eq!(tax::calculate_total_with_tax(net), event.daily_charge);
    }

    #[test]
    fn change_on_the_first_bills_the_whole_delta() {
        let event =
            calculate_daily_proration(date(2025, 11, 1), UserCountAction::Added, 49, 54, None)
                .unwrap();
        assert_eq!(event.remaining_days, 30);
        assert_eq!(event.daily_charge, tax::calculate_total_with_tax(4_000));
    }

    #[test]
    fn no_delta_means_no_charge() {
        let event =
            calculate_daily_proration(date(2025, 11, 15), UserCountAction::Activated, 49, 49, None)
                .unwrap();
        assert_eq!(event.daily_charge, 0);
    }

    #[test]
    fn negative_counts_rejected() {
        let result =
            calculate_daily_proration(date(2025, 11, 15), UserCountAction::Added, -1, 4, None);
        assert!(result.is_err());
    }
}
