//! Data models for the billing engine.

mod invoice;
mod proration;
mod tier;

pub use invoice::{Invoice, InvoiceItem, InvoiceStatus, ListInvoicesFilter};
pub use proration::{ProrationEvent, UserCountAction};
pub use tier::{CreatePricingTier, PricingCalculationResult, PricingTier, TierBreakdown};
