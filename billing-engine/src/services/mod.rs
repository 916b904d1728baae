//! Billing engine services.

pub mod aggregation;
pub mod database;
pub mod generator;
pub mod lifecycle;
pub mod metrics;
pub mod numbering;
pub mod pricing;
pub mod projection;
pub mod proration;
pub mod repository;
pub mod tax;

pub use database::Database;
pub use generator::{InvoiceGenerator, MonthlyInvoiceRequest};
pub use lifecycle::InvoiceLifecycle;
pub use metrics::{get_metrics, init_metrics};
pub use proration::ProrationLedger;
pub use repository::{BillingStore, InMemoryStore};
