//! Cumulative tier pricing.

use crate::models::{PricingCalculationResult, PricingTier, TierBreakdown};
use chrono::Utc;
use service_core::error::AppError;
use uuid::Uuid;

/// Built-in schedule used when a tenant has no override configured:
/// 1-10 @ ¥1,000, 11-50 @ ¥800, 51+ @ ¥600 per user.
pub fn default_tiers() -> Vec<PricingTier> {
    let bands: [(&str, i64, Option<i64>, i64); 3] = [
        ("Starter", 1, Some(10), 1000),
        ("Team", 11, Some(50), 800),
        ("Enterprise", 51, None, 600),
    ];

    bands
        .iter()
        .enumerate()
        .map(|(idx, (name, min_users, max_users, price))| PricingTier {
            tier_id: Uuid::new_v4(),
            tenant_id: None,
            name: (*name).to_string(),
            min_users: *min_users,
            max_users: *max_users,
            price_per_user: *price,
            sort_order: idx as i32,
            created_utc: Utc::now(),
        })
        .collect()
}

/// Resolve a user count against a tier schedule.
///
/// Walks the schedule in `sort_order`, filling each band before moving to
/// the next, and returns the cumulative price with a per-band breakdown.
/// A zero count resolves to a zero total with an empty breakdown; a
/// negative count is a caller error, not something to clamp.
pub fn calculate_monthly_price(
    user_count: i64,
    tiers: Option<&[PricingTier]>,
) -> Result<PricingCalculationResult, AppError> {
    if user_count < 0 {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "user_count must not be negative (got {})",
            user_count
        )));
    }

    let owned_defaults;
    let schedule: &[PricingTier] = match tiers {
        Some(t) => t,
        None => {
            owned_defaults = default_tiers();
            &owned_defaults
        }
    };

    let mut ordered: Vec<&PricingTier> = schedule.iter().collect();
    ordered.sort_by_key(|t| t.sort_order);

    let mut remaining = user_count;
    let mut total_price = 0i64;
    let mut breakdown = Vec::new();

    for tier in ordered {
        if remaining <= 0 {
            break;
        }
        let band_capacity = match tier.max_users {
            Some(max_users) => max_users - tier.min_users + 1,
            None => remaining,
        };
        let users_in_tier = remaining.min(band_capacity);
        if users_in_tier <= 0 {
            continue;
        }
        let subtotal = users_in_tier * tier.price_per_user;
        total_price += subtotal;
        breakdown.push(TierBreakdown {
            tier_name: tier.name.clone(),
            min_users: tier.min_users,
            max_users: tier.max_users,
            price_per_user: tier.price_per_user,
            users_in_tier,
            subtotal,
        });
        remaining -= users_in_tier;
    }

    Ok(PricingCalculationResult {
        total_price,
        breakdown,
        user_count,
    })
}

/// Validate a tier schedule before it is activated.
///
/// Returns one human-readable message per violation; an empty list means
/// the schedule is usable. Calculation never runs this implicitly, so
/// callers persisting a tenant override must validate first.
pub fn validate_pricing_tiers(tiers: &[PricingTier]) -> Vec<String> {
    let mut errors = Vec::new();

    if tiers.is_empty() {
        errors.push("schedule has no tiers".to_string());
        return errors;
    }

    let mut ordered: Vec<&PricingTier> = tiers.iter().collect();
    ordered.sort_by_key(|t| t.sort_order);

    if ordered[0].min_users != 1 {
        errors.push(format!(
            "first tier '{}' must start at 1 user (starts at {})",
            ordered[0].name, ordered[0].min_users
        ));
    }

    for pair in ordered.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        match prev.max_users {
            None => errors.push(format!(
                "unbounded tier '{}' must be the last tier",
                prev.name
            )),
            Some(prev_max) => {
                if next.min_users != prev_max + 1 {
                    errors.push(format!(
                        "tier '{}' must start at {} to stay contiguous with '{}' (starts at {})",
                        next.name,
                        prev_max + 1,
                        prev.name,
                        next.min_users
                    ));
                }
            }
        }
    }

    for tier in &ordered {
        if let Some(max_users) = tier.max_users {
            if max_users < tier.min_users {
                errors.push(format!(
                    "tier '{}' has max_users {} below min_users {}",
                    tier.name, max_users, tier.min_users
                ));
            }
        }
        if tier.price_per_user < 0 {
            errors.push(format!("tier '{}' has a negative price", tier.name));
        }
    }

    if let Some(last) = ordered.last() {
        if last.max_users.is_some() {
            errors.push(format!(
                "last tier '{}' must be unbounded (no max_users)",
                last.name
            ));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(
        name: &str,
        min_users: i64,
        max_users: Option<i64>,
        price: i64,
        sort_order: i32,
    ) -> PricingTier {
        PricingTier {
            tier_id: Uuid::new_v4(),
            tenant_id: None,
            name: name.to_string(),
            min_users,
            max_users,
            price_per_user: price,
            sort_order,
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn forty_nine_users_on_default_schedule() {
        let result = calculate_monthly_price(49, None).unwrap();
        assert_eq!(result.total_price, 10 * 1000 + 39 * 800);
        assert_eq!(result.total_price, 41_200);
        assert_eq!(result.breakdown.len(), 2);
        assert_eq!(result.breakdown[0].users_in_tier, 10);
        assert_eq!(result.breakdown[1].users_in_tier, 39);
    }

    #[test]
    fn breakdown_sums_match_totals() {
        for user_count in [0, 1, 10, 11, 50, 51, 49, 200] {
            let result = calculate_monthly_price(user_count, None).unwrap();
            let subtotal_sum: i64 = result.breakdown.iter().map(|b| b.subtotal).sum();
            let user_sum: i64 = result.breakdown.iter().map(|b| b.users_in_tier).sum();
            assert_eq!(subtotal_sum, result.total_price);
            assert_eq!(user_sum, user_count);
        }
    }

    #[test]
    fn zero_users_is_free_with_empty_breakdown() {
        let result = calculate_monthly_price(0, None).unwrap();
        assert_eq!(result.total_price, 0);
        assert!(result.breakdown.is_empty());
    }

    #[test]
    fn negative_users_rejected() {
        let err = calculate_monthly_price(-1, None).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn unbounded_tier_absorbs_the_tail() {
        let result = calculate_monthly_price(120, None).unwrap();
        assert_eq!(result.breakdown[2].users_in_tier, 70);
        assert_eq!(result.total_price, 10 * 1000 + 40 * 800 + 70 * 600);
    }

    #[test]
    fn tiers_are_ordered_by_sort_order_before_walking() {
        let shuffled = vec![
            band("Top", 21, None, 500, 1),
            band("Base", 1, Some(20), 1000, 0),
        ];
        let result = calculate_monthly_price(25, Some(&shuffled)).unwrap();
        assert_eq!(result.breakdown[0].tier_name, "Base");
        assert_eq!(result.total_price, 20 * 1000 + 5 * 500);
    }

    #[test]
    fn valid_schedule_has_no_errors() {
        assert!(validate_pricing_tiers(&default_tiers()).is_empty());
    }

    #[test]
    fn first_tier_must_start_at_one() {
        let tiers = vec![band("Base", 2, Some(10), 1000, 0), band("Top", 11, None, 800, 1)];
        let errors = validate_pricing_tiers(&tiers);
        assert!(errors.iter().any(|e| e.contains("must start at 1 user")));
    }

    #[test]
    fn gap_between_tiers_is_reported() {
        let tiers = vec![band("Base", 1, Some(10), 1000, 0), band("Top", 12, None, 800, 1)];
        let errors = validate_pricing_tiers(&tiers);
        assert!(errors.iter().any(|e| e.contains("contiguous")));
    }

    #[test]
    fn bounded_last_tier_is_reported() {
        let tiers = vec![band("Base", 1, Some(10), 1000, 0), band("Top", 11, Some(50), 800, 1)];
        let errors = validate_pricing_tiers(&tiers);
        assert!(errors.iter().any(|e| e.contains("must be unbounded")));
    }

    #[test]
    fn unbounded_tier_in_the_middle_is_reported() {
        let tiers = vec![
            band("Base", 1, None, 1000, 0),
            band("Top", 11, None, 800, 1),
        ];
        let errors = validate_pricing_tiers(&tiers);
        assert!(errors.iter().any(|e| e.contains("must be the last tier")));
    }

    #[test]
    fn empty_schedule_is_reported() {
        let errors = validate_pricing_tiers(&[]);
        assert_eq!(errors, vec!["schedule has no tiers".to_string()]);
    }
}
