//! Draft invoice assembly and month-close orchestration.

use crate::models::{Invoice, InvoiceItem, InvoiceStatus, PricingTier, ProrationEvent};
use crate::services::metrics::{INVOICES_TOTAL, INVOICE_AMOUNT_TOTAL, NUMBERING_CONFLICTS_TOTAL};
use crate::services::repository::BillingStore;
use crate::services::{numbering, pricing, proration, tax};
use chrono::{Datelike, Days, NaiveDate, Utc};
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::ValidateEmail;

/// Payment terms: due 30 days after the last day of the billing month.
const DUE_DATE_NET_DAYS: u64 = 30;

/// Allocation attempts before a numbering race is reported to the caller.
const MAX_NUMBERING_ATTEMPTS: u32 = 3;

/// Last calendar day of the month containing `date`.
pub fn last_day_of_month(date: NaiveDate) -> Result<NaiveDate, AppError> {
    let days = proration::days_in_month(date.year(), date.month())?;
    date.with_day(days as u32).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("invalid billing month {}", date))
    })
}

fn first_of_month(date: NaiveDate) -> Result<NaiveDate, AppError> {
    date.with_day(1)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("invalid billing month {}", date)))
}

/// Assemble a draft invoice under an already-decided invoice number.
///
/// One base item from the tier schedule for the month-start user count,
/// plus one item per proration event with its pre-tax amount recovered from
/// the event's tax-inclusive charge. Tax is computed once, at invoice
/// level, from the summed pre-tax subtotal; that single computation is the
/// canonical reconciliation rule.
#[allow(clippy::too_many_arguments)]
pub fn build_invoice(
    tenant_id: Uuid,
    tenant_name: &str,
    billing_month: NaiveDate,
    user_count: i64,
    prorations: &[ProrationEvent],
    billing_email: &str,
    tiers: Option<&[PricingTier]>,
    memo: Option<&str>,
    invoice_number: String,
) -> Result<Invoice, AppError> {
    if tenant_name.trim().is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "tenant_name must not be empty"
        )));
    }
    if !billing_email.validate_email() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "'{}' is not a valid billing email",
            billing_email
        )));
    }

    let month_start = first_of_month(billing_month)?;
    let month_end = last_day_of_month(month_start)?;

    let pricing_result = pricing::calculate_monthly_price(user_count, tiers)?;
    let invoice_id = Uuid::new_v4();

    let mut items = Vec::with_capacity(prorations.len() + 1);
    // The unit price is a display average; `amount` is authoritative.
    let average_unit_price = if user_count > 0 {
        pricing_result.total_price / user_count
    } else {
        0
    };
    items.push(InvoiceItem {
        item_id: Uuid::new_v4(),
        invoice_id,
        description: format!("Monthly subscription ({} users)", user_count),
        quantity: user_count,
        unit_price: average_unit_price,
        amount: pricing_result.total_price,
        period: Some(format!("{} to {}", month_start, month_end)),
        sort_order: 0,
        created_utc: Utc::now(),
    });

    for (idx, event) in prorations.iter().enumerate() {
        let amount = tax::subtotal_from_gross(event.daily_charge);
        items.push(InvoiceItem {
            item_id: Uuid::new_v4(),
            invoice_id,
            description: format!(
                "Proration: {} ({} -> {} users on {})",
                event.action, event.user_count_before, event.user_count_after, event.event_date
            ),
            quantity: 1,
            unit_price: amount,
            amount,
            period: Some(format!("{} to {}", event.event_date, month_end)),
            sort_order: (idx + 1) as i32,
            created_utc: Utc::now(),
        });
    }

    let subtotal: i64 = items.iter().map(|item| item.amount).sum();
    let tax_amount = tax::calculate_tax(subtotal);
    let due_date = month_end
        .checked_add_days(Days::new(DUE_DATE_NET_DAYS))
        .ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("due date overflows the calendar"))
        })?;

    Ok(Invoice {
        invoice_id,
        invoice_number,
        tenant_id,
        tenant_name: tenant_name.to_string(),
        billing_month: month_start,
        subtotal,
        tax: tax_amount,
        total: subtotal + tax_amount,
        status: InvoiceStatus::Draft.as_str().to_string(),
        due_date,
        sent_date: None,
        paid_date: None,
        billing_email: billing_email.to_string(),
        memo: memo.map(str::to_string),
        created_utc: Utc::now(),
        items,
    })
}

/// Generate a draft invoice, numbering it from a scan of existing numbers.
///
/// Pure given its inputs and therefore replayable; production callers go
/// through [`InvoiceGenerator`], which allocates numbers atomically and
/// owns persistence.
#[allow(clippy::too_many_arguments)]
pub fn generate_invoice(
    tenant_id: Uuid,
    tenant_name: &str,
    billing_month: NaiveDate,
    user_count: i64,
    prorations: &[ProrationEvent],
    existing_invoices: &[String],
    billing_email: &str,
    tiers: Option<&[PricingTier]>,
    memo: Option<&str>,
) -> Result<Invoice, AppError> {
    let month_start = first_of_month(billing_month)?;
    let invoice_number = numbering::next_invoice_number(
        existing_invoices,
        month_start.year(),
        month_start.month(),
    );
    build_invoice(
        tenant_id,
        tenant_name,
        month_start,
        user_count,
        prorations,
        billing_email,
        tiers,
        memo,
        invoice_number,
    )
}

/// Month-close request for one tenant.
#[derive(Debug, Clone)]
pub struct MonthlyInvoiceRequest {
    pub tenant_id: Uuid,
    pub tenant_name: String,
    /// Any day inside the billing month; normalized to its first day.
    pub billing_month: NaiveDate,
    /// User count in force at month start, the anchor the proration events
    /// recorded their deltas against.
    pub user_count: i64,
    pub billing_email: String,
    pub memo: Option<String>,
}

/// Month-close orchestrator.
///
/// Resolves the tenant tier schedule and the proration ledger, allocates an
/// invoice number through the store's serialized counter and persists the
/// draft. Generation is idempotent per tenant and month: an existing draft
/// is superseded in place (reusing its number, so the sequence stays
/// gap-free) and a sent or paid invoice makes regeneration a conflict.
pub struct InvoiceGenerator {
    store: Arc<dyn BillingStore>,
}

impl InvoiceGenerator {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    #[instrument(
        skip(self, request),
        fields(tenant_id = %request.tenant_id, billing_month = %request.billing_month)
    )]
    pub async fn generate_monthly_invoice(
        &self,
        request: &MonthlyInvoiceRequest,
    ) -> Result<Invoice, AppError> {
        let month = first_of_month(request.billing_month)?;

        let schedule = self.store.tier_schedule(request.tenant_id).await?;
        let tiers = (!schedule.is_empty()).then_some(schedule.as_slice());
        let prorations = self
            .store
            .prorations_for_month(request.tenant_id, month)
            .await?;

        if let Some(existing) = self
            .store
            .find_invoice_for_month(request.tenant_id, month)
            .await?
        {
            return self
                .supersede_draft(request, month, &prorations, tiers, existing)
                .await;
        }

        let (year, month_number) = (month.year(), month.month());
        let mut attempts = 0;
        loop {
            attempts += 1;
            let sequence = self
                .store
                .allocate_invoice_sequence(request.tenant_id, year, month_number)
                .await?;
            let invoice_number = numbering::format_invoice_number(year, month_number, sequence);
            let invoice = self.build_for_request(request, month, &prorations, tiers, invoice_number)?;

            match self.store.insert_invoice(&invoice).await {
                Ok(()) => {
                    INVOICES_TOTAL.with_label_values(&["draft"]).inc();
                    if invoice.total > 0 {
                        INVOICE_AMOUNT_TOTAL
                            .with_label_values(&["JPY"])
                            .inc_by(invoice.total as f64);
                    }
                    info!(
                        invoice_number = %invoice.invoice_number,
                        total = invoice.total,
                        "Draft invoice generated"
                    );
                    return Ok(invoice);
                }
                Err(AppError::Conflict(cause)) => {
                    NUMBERING_CONFLICTS_TOTAL.inc();
                    warn!(attempt = attempts, error = %cause, "Invoice insert conflict, re-reading");

                    // A concurrent generation may have landed the month's
                    // invoice between our check and the insert; converge on
                    // it instead of burning further sequence numbers.
                    if let Some(existing) = self
                        .store
                        .find_invoice_for_month(request.tenant_id, month)
                        .await?
                    {
                        return self
                            .supersede_draft(request, month, &prorations, tiers, existing)
                            .await;
                    }
                    if attempts >= MAX_NUMBERING_ATTEMPTS {
                        return Err(AppError::Conflict(cause));
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Rebuild the month's invoice under the existing draft's number and
    /// replace it in place. Anything past draft refuses regeneration.
    async fn supersede_draft(
        &self,
        request: &MonthlyInvoiceRequest,
        month: NaiveDate,
        prorations: &[ProrationEvent],
        tiers: Option<&[PricingTier]>,
        existing: Invoice,
    ) -> Result<Invoice, AppError> {
        if existing.status() != InvoiceStatus::Draft {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "invoice {} for {} is already {}",
                existing.invoice_number,
                month.format("%Y-%m"),
                existing.status
            )));
        }

        let invoice =
            self.build_for_request(request, month, prorations, tiers, existing.invoice_number)?;
        self.store.replace_invoice(&invoice).await?;
        info!(
            invoice_number = %invoice.invoice_number,
            total = invoice.total,
            "Draft invoice superseded"
        );
        Ok(invoice)
    }

    fn build_for_request(
        &self,
        request: &MonthlyInvoiceRequest,
        month: NaiveDate,
        prorations: &[ProrationEvent],
        tiers: Option<&[PricingTier]>,
        invoice_number: String,
    ) -> Result<Invoice, AppError> {
        build_invoice(
            request.tenant_id,
            &request.tenant_name,
            month,
            request.user_count,
            prorations,
            &request.billing_email,
            tiers,
            request.memo.as_deref(),
            invoice_number,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserCountAction;
    use crate::services::proration::calculate_daily_proration;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn base_invoice_for_forty_nine_users() {
        let invoice = generate_invoice(
            Uuid::new_v4(),
            "Acme",
            date(2025, 11, 1),
            49,
            &[],
            &[],
            "billing@acme.example",
            None,
            None,
        )
        .unwrap();

        assert_eq!(invoice.invoice_number, "INV-2025-11-001");
        assert_eq!(invoice.subtotal, 41_200);
        assert_eq!(invoice.tax, 4_120);
        assert_eq!(invoice.total, 45_320);
        assert_eq!(invoice.status(), InvoiceStatus::Draft);
        assert_eq!(invoice.due_date, date(2025, 12, 30));
        assert_eq!(invoice.items.len(), 1);
        assert_eq!(invoice.items[0].quantity, 49);
        assert_eq!(
            invoice.items[0].period.as_deref(),
            Some("2025-11-01 to 2025-11-30")
        );
    }

    #[test]
    fn numbering_continues_from_existing_invoices() {
        let existing = vec![
            "INV-2025-11-001".to_string(),
            "INV-2025-11-002".to_string(),
        ];
        let invoice = generate_invoice(
            Uuid::new_v4(),
            "Acme",
            date(2025, 11, 1),
            1,
            &[],
            &existing,
            "billing@acme.example",
            None,
            None,
        )
        .unwrap();
        assert_eq!(invoice.invoice_number, "INV-2025-11-003");
    }

    #[test]
    fn proration_items_recover_pre_tax_amounts() {
        let event =
            calculate_daily_proration(date(2025, 11, 20), UserCountAction::Added, 49, 54, None)
                .unwrap();
        let invoice = generate_invoice(
            Uuid::new_v4(),
            "Acme",
            date(2025, 11, 1),
            49,
            std::slice::from_ref(&event),
            &[],
            "billing@acme.example",
            None,
            None,
        )
        .unwrap();

        assert_eq!(invoice.items.len(), 2);
        // 1612 tax-inclusive recovers to the 1466 pre-tax charge.
        assert_eq!(invoice.items[1].amount, 1_466);
        assert_eq!(invoice.subtotal, 41_200 + 1_466);
        assert_eq!(invoice.tax, tax::calculate_tax(invoice.subtotal));
        assert_eq!(invoice.total, invoice.subtotal + invoice.tax);
    }

    #[test]
    fn credits_carry_their_sign_onto_the_invoice() {
        let event = calculate_daily_proration(
            date(2025, 11, 20),
            UserCountAction::Deactivated,
            54,
            49,
            None,
        )
        .unwrap();
        let invoice = generate_invoice(
            Uuid::new_v4(),
            "Acme",
            date(2025, 11, 1),
            54,
            std::slice::from_ref(&event),
            &[],
            "billing@acme.example",
            None,
            None,
        )
        .unwrap();
        assert!(invoice.items[1].amount < 0);
        assert_eq!(invoice.subtotal, 45_200 - 1_467);
    }

    #[test]
    fn billing_month_is_normalized_to_its_first_day() {
        let invoice = generate_invoice(
            Uuid::new_v4(),
            "Acme",
            date(2025, 11, 17),
            3,
            &[],
            &[],
            "billing@acme.example",
            None,
            None,
        )
        .unwrap();
        assert_eq!(invoice.billing_month, date(2025, 11, 1));
    }

    #[test]
    fn invalid_email_rejected() {
        let result = generate_invoice(
            Uuid::new_v4(),
            "Acme",
            date(2025, 11, 1),
            1,
            &[],
            &[],
            "not-an-email",
            None,
            None,
        );
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn blank_tenant_name_rejected() {
        let result = generate_invoice(
            Uuid::new_v4(),
            "   ",
            date(2025, 11, 1),
            1,
            &[],
            &[],
            "billing@acme.example",
            None,
            None,
        );
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn zero_user_invoice_is_empty_but_well_formed() {
        let invoice = generate_invoice(
            Uuid::new_v4(),
            "Acme",
            date(2025, 11, 1),
            0,
            &[],
            &[],
            "billing@acme.example",
            None,
            None,
        )
        .unwrap();
        assert_eq!(invoice.subtotal, 0);
        assert_eq!(invoice.total, 0);
        assert_eq!(invoice.items[0].amount, 0);
    }
}
