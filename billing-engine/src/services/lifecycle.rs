//! Invoice lifecycle: draft -> sent -> paid, forward only.
//!
//! There is no void or cancel state; correcting an already-sent invoice is
//! a pending product decision and deliberately not guessed at here.

use crate::models::{Invoice, InvoiceStatus};
use crate::services::metrics::INVOICES_TOTAL;
use crate::services::repository::BillingStore;
use chrono::NaiveDate;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Transition a draft to `sent`, stamping the send date.
pub fn mark_sent(invoice: &mut Invoice, sent_date: NaiveDate) -> Result<(), AppError> {
    let current = invoice.status();
    if !current.can_transition_to(InvoiceStatus::Sent) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "cannot send invoice {} in status '{}'",
            invoice.invoice_number,
            current.as_str()
        )));
    }
    invoice.status = InvoiceStatus::Sent.as_str().to_string();
    invoice.sent_date = Some(sent_date);
    Ok(())
}

/// Transition a draft or sent invoice to `paid`, stamping the payment date.
pub fn mark_paid(invoice: &mut Invoice, paid_date: NaiveDate) -> Result<(), AppError> {
    let current = invoice.status();
    if !current.can_transition_to(InvoiceStatus::Paid) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "cannot mark invoice {} paid in status '{}'",
            invoice.invoice_number,
            current.as_str()
        )));
    }
    invoice.status = InvoiceStatus::Paid.as_str().to_string();
    invoice.paid_date = Some(paid_date);
    Ok(())
}

/// Reject any mutation beyond status/date stamps once an invoice is paid.
pub fn ensure_mutable(invoice: &Invoice) -> Result<(), AppError> {
    if invoice.status() == InvoiceStatus::Paid {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "invoice {} is paid and can no longer be modified",
            invoice.invoice_number
        )));
    }
    Ok(())
}

/// Store-backed lifecycle operations.
pub struct InvoiceLifecycle {
    store: Arc<dyn BillingStore>,
}

impl InvoiceLifecycle {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn send(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        sent_date: NaiveDate,
    ) -> Result<Invoice, AppError> {
        let invoice = self
            .store
            .mark_invoice_sent(tenant_id, invoice_id, sent_date)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        INVOICES_TOTAL.with_label_values(&["sent"]).inc();
        info!(invoice_number = %invoice.invoice_number, "Invoice sent");
        Ok(invoice)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn pay(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        paid_date: NaiveDate,
    ) -> Result<Invoice, AppError> {
        let invoice = self
            .store
            .mark_invoice_paid(tenant_id, invoice_id, paid_date)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        INVOICES_TOTAL.with_label_values(&["paid"]).inc();
        info!(invoice_number = %invoice.invoice_number, "Invoice paid");
        Ok(invoice)
    }

    /// Update the free-text memo. Rejected once the invoice is paid.
    #[instrument(skip(self, memo), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn update_memo(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        memo: Option<String>,
    ) -> Result<Invoice, AppError> {
        self.store
            .update_invoice_memo(tenant_id, invoice_id, memo)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn draft_invoice() -> Invoice {
        Invoice {
            invoice_id: Uuid::new_v4(),
            invoice_number: "INV-2025-11-001".to_string(),
            tenant_id: Uuid::new_v4(),
            tenant_name: "Acme".to_string(),
            billing_month: NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
            subtotal: 41_200,
            tax: 4_120,
            total: 45_320,
            status: InvoiceStatus::Draft.as_str().to_string(),
            due_date: NaiveDate::from_ymd_opt(2025, 12, 30).unwrap(),
            sent_date: None,
            paid_date: None,
            billing_email: "billing@acme.example".to_string(),
            memo: None,
            created_utc: Utc::now(),
            items: Vec::new(),
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, d).unwrap()
    }

    #[test]
    fn draft_to_sent_to_paid() {
        let mut invoice = draft_invoice();
        mark_sent(&mut invoice, day(1)).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Sent);
        assert_eq!(invoice.sent_date, Some(day(1)));

        mark_paid(&mut invoice, day(15)).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
        assert_eq!(invoice.paid_date, Some(day(15)));
    }

    #[test]
    fn draft_can_be_paid_without_sending() {
        let mut invoice = draft_invoice();
        mark_paid(&mut invoice, day(3)).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
        assert_eq!(invoice.sent_date, None);
    }

    #[test]
    fn no_reverse_or_repeat_transitions() {
        let mut invoice = draft_invoice();
        mark_sent(&mut invoice, day(1)).unwrap();
        assert!(mark_sent(&mut invoice, day(2)).is_err());

        mark_paid(&mut invoice, day(5)).unwrap();
        assert!(mark_paid(&mut invoice, day(6)).is_err());
        assert!(mark_sent(&mut invoice, day(7)).is_err());
        // The original stamps survive the rejected attempts.
        assert_eq!(invoice.sent_date, Some(day(1)));
        assert_eq!(invoice.paid_date, Some(day(5)));
    }

    #[test]
    fn paid_invoices_are_frozen() {
        let mut invoice = draft_invoice();
        assert!(ensure_mutable(&invoice).is_ok());
        mark_paid(&mut invoice, day(1)).unwrap();
        assert!(ensure_mutable(&invoice).is_err());
    }
}
