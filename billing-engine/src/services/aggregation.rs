//! Month-close aggregation of base fee and proration charges.

use crate::models::{PricingTier, ProrationEvent};
use crate::services::{pricing, tax};
use serde::Serialize;
use service_core::error::AppError;

/// Month-close totals combining the base-tier charge with the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthlyBillingSummary {
    pub base_fee: i64,
    pub base_fee_tax: i64,
    pub proration_total: i64,
    pub subtotal: i64,
    pub tax: i64,
    pub total: i64,
}

/// Combine the month-start base charge with the recorded proration deltas.
///
/// The base fee is taxed once for the period while each proration charge
/// arrives already tax-inclusive (tax was applied per transaction when the
/// event was recorded). `total` preserves that split exactly so historical
/// invoices keep reconciling; `subtotal`/`tax` re-derive the pre-tax/tax
/// split of the same total for reporting. The invoice generator's
/// invoice-level tax computation is the canonical figure for new invoices.
pub fn calculate_monthly_billing(
    daily_charges: &[ProrationEvent],
    base_user_count: i64,
    tiers: Option<&[PricingTier]>,
) -> Result<MonthlyBillingSummary, AppError> {
    let base_fee = pricing::calculate_monthly_price(base_user_count, tiers)?.total_price;
    let base_fee_tax = tax::calculate_tax(base_fee);

    let proration_total: i64 = daily_charges.iter().map(|e| e.daily_charge).sum();
    let proration_net: i64 = daily_charges
        .iter()
        .map(|e| tax::subtotal_from_gross(e.daily_charge))
        .sum();

    let subtotal = base_fee + proration_net;
    let total = base_fee + base_fee_tax + proration_total;
    let tax = total - subtotal;

    Ok(MonthlyBillingSummary {
        base_fee,
        base_fee_tax,
        proration_total,
        subtotal,
        tax,
        total,
    })
}
