//! Prometheus metrics for the billing engine.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec, TextEncoder,
};

/// Invoice counter by status (draft, sent, paid).
pub static INVOICES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_invoices_total",
        "Total number of invoices by status",
        &["status"]
    )
    .expect("Failed to register invoices_total")
});

/// Invoiced amount counter by currency.
pub static INVOICE_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_invoice_amount_total",
        "Total invoiced amount by currency",
        &["currency"]
    )
    .expect("Failed to register invoice_amount_total")
});

/// Proration ledger counter by action.
pub static PRORATION_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_proration_events_total",
        "Total number of proration events by action",
        &["action"]
    )
    .expect("Failed to register proration_events_total")
});

/// Lost invoice-number allocations that triggered a retry.
pub static NUMBERING_CONFLICTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "billing_numbering_conflicts_total",
        "Total number of invoice-number allocation conflicts"
    )
    .expect("Failed to register numbering_conflicts_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "billing_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&INVOICES_TOTAL);
    Lazy::force(&INVOICE_AMOUNT_TOTAL);
    Lazy::force(&PRORATION_EVENTS_TOTAL);
    Lazy::force(&NUMBERING_CONFLICTS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
