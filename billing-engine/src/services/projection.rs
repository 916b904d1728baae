//! Renderer-facing invoice projection.
//!
//! The engine computes exclusively in integer yen; currency display strings
//! exist only past this boundary, where the record is handed to the
//! PDF/email renderer.

use crate::models::Invoice;
use serde::Serialize;

/// One display line for the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectedLineItem {
    pub description: String,
    pub quantity: i64,
    pub unit_price: String,
    pub amount: String,
}

/// PDF/email-ready projection of an invoice.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceProjection {
    pub invoice_number: String,
    pub issue_date: String,
    pub due_date: String,
    pub billing_month: String,
    pub tenant_name: String,
    pub billing_email: String,
    pub items: Vec<ProjectedLineItem>,
    pub subtotal: String,
    pub tax: String,
    pub total: String,
    pub memo: Option<String>,
}

/// Format whole yen with thousands separators: `¥41,200`, `-¥1,612`.
pub fn format_money(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 2);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if amount < 0 {
        format!("-¥{}", grouped)
    } else {
        format!("¥{}", grouped)
    }
}

/// Project an invoice for the renderer.
///
/// The issue date is the send date once the invoice has gone out, otherwise
/// the creation date of the draft.
pub fn project_invoice(invoice: &Invoice) -> InvoiceProjection {
    let issue_date = invoice
        .sent_date
        .unwrap_or_else(|| invoice.created_utc.date_naive());

    let items = invoice
        .items
        .iter()
        .map(|item| {
            let description = match &item.period {
                Some(period) => format!("{} ({})", item.description, period),
                None => item.description.clone(),
            };
            ProjectedLineItem {
                description,
                quantity: item.quantity,
                unit_price: format_money(item.unit_price),
                amount: format_money(item.amount),
            }
        })
        .collect();

    InvoiceProjection {
        invoice_number: invoice.invoice_number.clone(),
        issue_date: issue_date.to_string(),
        due_date: invoice.due_date.to_string(),
        billing_month: invoice.billing_month.format("%Y-%m").to_string(),
        tenant_name: invoice.tenant_name.clone(),
        billing_email: invoice.billing_email.clone(),
        items,
        subtotal: format_money(invoice.subtotal),
        tax: format_money(invoice.tax),
        total: format_money(invoice.total),
        memo: invoice.memo.clone(),
    }
}
