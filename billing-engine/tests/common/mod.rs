//! Test helper module for billing-engine integration tests.
//!
//! All suites run against the in-memory store, which mirrors the Postgres
//! implementation's uniqueness and lifecycle guards.

#![allow(dead_code)]

use billing_engine::models::CreatePricingTier;
use billing_engine::services::{InMemoryStore, MonthlyInvoiceRequest};
use chrono::NaiveDate;
use std::sync::Arc;
use uuid::Uuid;

pub const TEST_TENANT_ID: &str = "11111111-1111-1111-1111-111111111111";

pub fn tenant_id() -> Uuid {
    Uuid::parse_str(TEST_TENANT_ID).unwrap()
}

pub fn store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::new())
}

pub fn month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap()
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn monthly_request(
    tenant: Uuid,
    billing_month: NaiveDate,
    user_count: i64,
) -> MonthlyInvoiceRequest {
    MonthlyInvoiceRequest {
        tenant_id: tenant,
        tenant_name: "Acme Workforce".to_string(),
        billing_month,
        user_count,
        billing_email: "billing@acme.example".to_string(),
        memo: None,
    }
}

/// A two-band override schedule: 1-20 @ ¥1,200, 21+ @ ¥900.
pub fn override_schedule() -> Vec<CreatePricingTier> {
    vec![
        CreatePricingTier {
            name: "Flat".to_string(),
            min_users: 1,
            max_users: Some(20),
            price_per_user: 1_200,
            sort_order: 0,
        },
        CreatePricingTier {
            name: "Volume".to_string(),
            min_users: 21,
            max_users: None,
            price_per_user: 900,
            sort_order: 1,
        },
    ]
}
