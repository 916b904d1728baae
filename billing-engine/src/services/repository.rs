//! Abstract billing store and the in-memory reference implementation.
//!
//! The engine's calculators are pure; this trait is the only persistence
//! seam. The two contention points are invoice number allocation and the
//! read-then-append on the proration ledger, so `allocate_invoice_sequence`
//! and `append_proration` must be serialized by every implementation.
//! Uniqueness violations surface as retryable `Conflict` errors and are
//! never silently overwritten.

use crate::models::{
    CreatePricingTier, Invoice, InvoiceStatus, ListInvoicesFilter, PricingTier, ProrationEvent,
};
use crate::services::{lifecycle, numbering, pricing};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use service_core::error::AppError;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Replace a tenant's tier schedule. The schedule must pass
    /// [`pricing::validate_pricing_tiers`]; an invalid schedule blocks
    /// activation instead of silently falling back to defaults.
    async fn replace_tier_schedule(
        &self,
        tenant_id: Uuid,
        tiers: Vec<CreatePricingTier>,
    ) -> Result<Vec<PricingTier>, AppError>;

    /// The tenant's active schedule; empty when the tenant uses defaults.
    async fn tier_schedule(&self, tenant_id: Uuid) -> Result<Vec<PricingTier>, AppError>;

    /// Append one event to the tenant's proration ledger.
    async fn append_proration(
        &self,
        tenant_id: Uuid,
        event: &ProrationEvent,
    ) -> Result<(), AppError>;

    /// Ledger entries for the month containing `month`, in event order.
    async fn prorations_for_month(
        &self,
        tenant_id: Uuid,
        month: NaiveDate,
    ) -> Result<Vec<ProrationEvent>, AppError>;

    /// Atomically allocate the next invoice sequence for the scope.
    /// The first allocation bootstraps from a scan of existing numbers.
    async fn allocate_invoice_sequence(
        &self,
        tenant_id: Uuid,
        year: i32,
        month: u32,
    ) -> Result<i64, AppError>;

    /// Persist a draft invoice with its items. A duplicate invoice number
    /// or a second invoice for the tenant's month is a `Conflict`.
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), AppError>;

    /// Supersede the month's existing draft with a regenerated invoice.
    async fn replace_invoice(&self, invoice: &Invoice) -> Result<(), AppError>;

    async fn find_invoice_for_month(
        &self,
        tenant_id: Uuid,
        month: NaiveDate,
    ) -> Result<Option<Invoice>, AppError>;

    async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError>;

    async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError>;

    /// Numbers already allocated in the scope, for the scan fallback.
    async fn invoice_numbers_for_month(
        &self,
        tenant_id: Uuid,
        year: i32,
        month: u32,
    ) -> Result<Vec<String>, AppError>;

    async fn mark_invoice_sent(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        sent_date: NaiveDate,
    ) -> Result<Option<Invoice>, AppError>;

    async fn mark_invoice_paid(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        paid_date: NaiveDate,
    ) -> Result<Option<Invoice>, AppError>;

    /// Update the memo. Rejected once the invoice is paid.
    async fn update_invoice_memo(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        memo: Option<String>,
    ) -> Result<Option<Invoice>, AppError>;
}

#[derive(Default)]
struct InMemoryState {
    schedules: HashMap<Uuid, Vec<PricingTier>>,
    ledgers: HashMap<(Uuid, NaiveDate), Vec<ProrationEvent>>,
    counters: HashMap<(Uuid, i32, u32), i64>,
    invoices: Vec<Invoice>,
}

/// In-memory store used by the integration tests and as a replayable
/// fallback. Mirrors the Postgres implementation's uniqueness and lifecycle
/// guards; one mutex stands in for the database's serialization boundary.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<InMemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn month_key(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

#[async_trait]
impl BillingStore for InMemoryStore {
    async fn replace_tier_schedule(
        &self,
        tenant_id: Uuid,
        tiers: Vec<CreatePricingTier>,
    ) -> Result<Vec<PricingTier>, AppError> {
        let schedule: Vec<PricingTier> = tiers
            .into_iter()
            .map(|input| PricingTier {
                tier_id: Uuid::new_v4(),
                tenant_id: Some(tenant_id),
                name: input.name,
                min_users: input.min_users,
                max_users: input.max_users,
                price_per_user: input.price_per_user,
                sort_order: input.sort_order,
                created_utc: Utc::now(),
            })
            .collect();

        let violations = pricing::validate_pricing_tiers(&schedule);
        if !violations.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "invalid tier schedule: {}",
                violations.join("; ")
            )));
        }

        let mut state = self.inner.lock().await;
        state.schedules.insert(tenant_id, schedule.clone());
        Ok(schedule)
    }

    async fn tier_schedule(&self, tenant_id: Uuid) -> Result<Vec<PricingTier>, AppError> {
        let state = self.inner.lock().await;
        let mut schedule = state.schedules.get(&tenant_id).cloned().unwrap_or_default();
        schedule.sort_by_key(|t| t.sort_order);
        Ok(schedule)
    }

    async fn append_proration(
        &self,
        tenant_id: Uuid,
        event: &ProrationEvent,
    ) -> Result<(), AppError> {
        let mut state = self.inner.lock().await;
        state
            .ledgers
            .entry((tenant_id, month_key(event.event_date)))
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn prorations_for_month(
        &self,
        tenant_id: Uuid,
        month: NaiveDate,
    ) -> Result<Vec<ProrationEvent>, AppError> {
        let state = self.inner.lock().await;
        let mut events = state
            .ledgers
            .get(&(tenant_id, month_key(month)))
            .cloned()
            .unwrap_or_default();
        events.sort_by_key(|e| (e.event_date, e.created_utc));
        Ok(events)
    }

    async fn allocate_invoice_sequence(
        &self,
        tenant_id: Uuid,
        year: i32,
        month: u32,
    ) -> Result<i64, AppError> {
        let mut state = self.inner.lock().await;
        let bootstrap = state
            .invoices
            .iter()
            .filter(|inv| inv.tenant_id == tenant_id)
            .filter_map(|inv| numbering::parse_sequence(&inv.invoice_number, year, month))
            .max()
            .unwrap_or(0);
        let counter = state.counters.entry((tenant_id, year, month)).or_insert(bootstrap);
        *counter += 1;
        Ok(*counter)
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), AppError> {
        let mut state = self.inner.lock().await;
        if state.invoices.iter().any(|existing| {
            existing.tenant_id == invoice.tenant_id
                && existing.invoice_number == invoice.invoice_number
        }) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "invoice number {} already allocated",
                invoice.invoice_number
            )));
        }
        if state.invoices.iter().any(|existing| {
            existing.tenant_id == invoice.tenant_id
                && existing.billing_month == invoice.billing_month
        }) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "tenant already has an invoice for {}",
                invoice.billing_month.format("%Y-%m")
            )));
        }
        state.invoices.push(invoice.clone());
        Ok(())
    }

    async fn replace_invoice(&self, invoice: &Invoice) -> Result<(), AppError> {
        let mut state = self.inner.lock().await;
        let position = state
            .invoices
            .iter()
            .position(|existing| {
                existing.tenant_id == invoice.tenant_id
                    && existing.billing_month == invoice.billing_month
            })
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "no invoice to supersede for {}",
                    invoice.billing_month.format("%Y-%m")
                ))
            })?;

        if state.invoices[position].status() != InvoiceStatus::Draft {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "only draft invoices can be superseded"
            )));
        }
        state.invoices[position] = invoice.clone();
        Ok(())
    }

    async fn find_invoice_for_month(
        &self,
        tenant_id: Uuid,
        month: NaiveDate,
    ) -> Result<Option<Invoice>, AppError> {
        let state = self.inner.lock().await;
        Ok(state
            .invoices
            .iter()
            .find(|inv| inv.tenant_id == tenant_id && inv.billing_month == month_key(month))
            .cloned())
    }

    async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let state = self.inner.lock().await;
        Ok(state
            .invoices
            .iter()
            .find(|inv| inv.tenant_id == tenant_id && inv.invoice_id == invoice_id)
            .cloned())
    }

    async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let state = self.inner.lock().await;
        let limit = filter.page_size.clamp(1, 100) as usize;
        let status_str = filter.status.map(|s| s.as_str());

        let mut matches: Vec<Invoice> = state
            .invoices
            .iter()
            .filter(|inv| inv.tenant_id == tenant_id)
            .filter(|inv| status_str.map_or(true, |s| inv.status == s))
            .filter(|inv| {
                filter
                    .from_month
                    .map_or(true, |from| inv.billing_month >= month_key(from))
            })
            .filter(|inv| {
                filter
                    .to_month
                    .map_or(true, |to| inv.billing_month <= month_key(to))
            })
            .cloned()
            .collect();
        matches.sort_by_key(|inv| inv.invoice_id);

        let page = matches
            .into_iter()
            .filter(|inv| filter.page_token.map_or(true, |cursor| inv.invoice_id > cursor))
            .take(limit)
            .collect();
        Ok(page)
    }

    async fn invoice_numbers_for_month(
        &self,
        tenant_id: Uuid,
        year: i32,
        month: u32,
    ) -> Result<Vec<String>, AppError> {
        let state = self.inner.lock().await;
        let mut numbers: Vec<String> = state
            .invoices
            .iter()
            .filter(|inv| inv.tenant_id == tenant_id)
            .filter(|inv| inv.billing_month.year() == year && inv.billing_month.month() == month)
            .map(|inv| inv.invoice_number.clone())
            .collect();
        numbers.sort();
        Ok(numbers)
    }

    async fn mark_invoice_sent(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        sent_date: NaiveDate,
    ) -> Result<Option<Invoice>, AppError> {
        let mut state = self.inner.lock().await;
        let Some(invoice) = state
            .invoices
            .iter_mut()
            .find(|inv| inv.tenant_id == tenant_id && inv.invoice_id == invoice_id)
        else {
            return Ok(None);
        };
        lifecycle::mark_sent(invoice, sent_date)?;
        Ok(Some(invoice.clone()))
    }

    async fn mark_invoice_paid(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        paid_date: NaiveDate,
    ) -> Result<Option<Invoice>, AppError> {
        let mut state = self.inner.lock().await;
        let Some(invoice) = state
            .invoices
            .iter_mut()
            .find(|inv| inv.tenant_id == tenant_id && inv.invoice_id == invoice_id)
        else {
            return Ok(None);
        };
        lifecycle::mark_paid(invoice, paid_date)?;
        Ok(Some(invoice.clone()))
    }

    async fn update_invoice_memo(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        memo: Option<String>,
    ) -> Result<Option<Invoice>, AppError> {
        let mut state = self.inner.lock().await;
        let Some(invoice) = state
            .invoices
            .iter_mut()
            .find(|inv| inv.tenant_id == tenant_id && inv.invoice_id == invoice_id)
        else {
            return Ok(None);
        };
        lifecycle::ensure_mutable(invoice)?;
        invoice.memo = memo;
        Ok(Some(invoice.clone()))
    }
}
