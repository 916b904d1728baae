//! Invoice model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "sent" => InvoiceStatus::Sent,
            "paid" => InvoiceStatus::Paid,
            _ => InvoiceStatus::Draft,
        }
    }

    /// Forward-only lifecycle. A draft may be paid directly when no
    /// explicit send is recorded; nothing transitions out of `paid`.
    pub fn can_transition_to(self, next: InvoiceStatus) -> bool {
        matches!(
            (self, next),
            (InvoiceStatus::Draft, InvoiceStatus::Sent)
                | (InvoiceStatus::Draft, InvoiceStatus::Paid)
                | (InvoiceStatus::Sent, InvoiceStatus::Paid)
        )
    }
}

/// An immutable monthly invoice for one tenant.
///
/// Invariants: `total == subtotal + tax`, `tax` is the floor of 10% of
/// `subtotal`, `subtotal` is the sum of the item amounts, and the invoice
/// number is unique and gap-free within the tenant's billing month. Once
/// `paid`, the financial fields are frozen.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub tenant_id: Uuid,
    pub tenant_name: String,
    /// First day of the calendar month the invoice covers.
    pub billing_month: NaiveDate,
    pub subtotal: i64,
    pub tax: i64,
    pub total: i64,
    pub status: String,
    pub due_date: NaiveDate,
    pub sent_date: Option<NaiveDate>,
    pub paid_date: Option<NaiveDate>,
    pub billing_email: String,
    pub memo: Option<String>,
    pub created_utc: DateTime<Utc>,
    #[sqlx(skip)]
    pub items: Vec<InvoiceItem>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }
}

/// One line on an invoice: the tier-derived base item or a proration item.
///
/// `amount` is tax-exclusive and authoritative; `quantity * unit_price` is
/// advisory display data (the unit price is an average, so rounding means
/// the product need not equal `amount`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub item_id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    pub quantity: i64,
    pub unit_price: i64,
    pub amount: i64,
    pub period: Option<String>,
    pub sort_order: i32,
    pub created_utc: DateTime<Utc>,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub status: Option<InvoiceStatus>,
    pub from_month: Option<NaiveDate>,
    pub to_month: Option<NaiveDate>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
