//! Postgres-backed billing store.

use crate::models::{
    CreatePricingTier, Invoice, InvoiceItem, InvoiceStatus, ListInvoicesFilter, PricingTier,
    ProrationEvent,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::repository::BillingStore;
use crate::services::{numbering, pricing};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "invoice_id, invoice_number, tenant_id, tenant_name, billing_month, \
     subtotal, tax, total, status, due_date, sent_date, paid_date, billing_email, memo, created_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-engine"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn load_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError> {
        sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT item_id, invoice_id, description, quantity, unit_price, amount, period,
                sort_order, created_utc
            FROM invoice_items
            WHERE invoice_id = $1
            ORDER BY sort_order, created_utc
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load items: {}", e)))
    }

    async fn with_items(&self, invoice: Option<Invoice>) -> Result<Option<Invoice>, AppError> {
        match invoice {
            Some(mut invoice) => {
                invoice.items = self.load_items(invoice.invoice_id).await?;
                Ok(Some(invoice))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl BillingStore for Database {
    #[instrument(skip(self, tiers), fields(tenant_id = %tenant_id))]
    async fn replace_tier_schedule(
        &self,
        tenant_id: Uuid,
        tiers: Vec<CreatePricingTier>,
    ) -> Result<Vec<PricingTier>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["replace_tier_schedule"])
            .start_timer();

        let candidate: Vec<PricingTier> = tiers
            .into_iter()
            .map(|input| PricingTier {
                tier_id: Uuid::new_v4(),
                tenant_id: Some(tenant_id),
                name: input.name,
                min_users: input.min_users,
                max_users: input.max_users,
                price_per_user: input.price_per_user,
                sort_order: input.sort_order,
                created_utc: chrono::Utc::now(),
            })
            .collect();

        // Invalid schedules block activation; the current schedule stays.
        let violations = pricing::validate_pricing_tiers(&candidate);
        if !violations.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "invalid tier schedule: {}",
                violations.join("; ")
            )));
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        sqlx::query("DELETE FROM pricing_tiers WHERE tenant_id = $1")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to clear schedule: {}", e))
            })?;

        let mut stored = Vec::with_capacity(candidate.len());
        for tier in &candidate {
            let row = sqlx::query_as::<_, PricingTier>(
                r#"
                INSERT INTO pricing_tiers (
                    tier_id, tenant_id, name, min_users, max_users, price_per_user, sort_order
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING tier_id, tenant_id, name, min_users, max_users, price_per_user,
                    sort_order, created_utc
                "#,
            )
            .bind(tier.tier_id)
            .bind(tier.tenant_id)
            .bind(&tier.name)
            .bind(tier.min_users)
            .bind(tier.max_users)
            .bind(tier.price_per_user)
            .bind(tier.sort_order)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert tier: {}", e))
            })?;
            stored.push(row);
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit schedule: {}", e))
        })?;

        timer.observe_duration();

        info!(tiers = stored.len(), "Tier schedule replaced");

        Ok(stored)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn tier_schedule(&self, tenant_id: Uuid) -> Result<Vec<PricingTier>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["tier_schedule"])
            .start_timer();

        let schedule = sqlx::query_as::<_, PricingTier>(
            r#"
            SELECT tier_id, tenant_id, name, min_users, max_users, price_per_user,
                sort_order, created_utc
            FROM pricing_tiers
            WHERE tenant_id = $1
            ORDER BY sort_order
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load schedule: {}", e)))?;

        timer.observe_duration();

        Ok(schedule)
    }

    #[instrument(skip(self, event), fields(tenant_id = %tenant_id, event_id = %event.event_id))]
    async fn append_proration(
        &self,
        tenant_id: Uuid,
        event: &ProrationEvent,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["append_proration"])
            .start_timer();

        let billing_month = event.event_date.with_day(1).unwrap_or(event.event_date);

        sqlx::query(
            r#"
            INSERT INTO proration_events (
                event_id, tenant_id, billing_month, event_date, action,
                user_count_before, user_count_after, days_in_month, remaining_days,
                monthly_price_before, monthly_price_after, daily_charge
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(event.event_id)
        .bind(tenant_id)
        .bind(billing_month)
        .bind(event.event_date)
        .bind(&event.action)
        .bind(event.user_count_before)
        .bind(event.user_count_after)
        .bind(event.days_in_month)
        .bind(event.remaining_days)
        .bind(event.monthly_price_before)
        .bind(event.monthly_price_after)
        .bind(event.daily_charge)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to append proration: {}", e))
        })?;

        timer.observe_duration();

        info!(daily_charge = event.daily_charge, "Proration event appended");

        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn prorations_for_month(
        &self,
        tenant_id: Uuid,
        month: NaiveDate,
    ) -> Result<Vec<ProrationEvent>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["prorations_for_month"])
            .start_timer();

        let billing_month = month.with_day(1).unwrap_or(month);

        let events = sqlx::query_as::<_, ProrationEvent>(
            r#"
            SELECT event_id, event_date, action, user_count_before, user_count_after,
                days_in_month, remaining_days, monthly_price_before, monthly_price_after,
                daily_charge, created_utc
            FROM proration_events
            WHERE tenant_id = $1 AND billing_month = $2
            ORDER BY event_date, created_utc
            "#,
        )
        .bind(tenant_id)
        .bind(billing_month)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load ledger: {}", e)))?;

        timer.observe_duration();

        Ok(events)
    }

    /// Allocation serializes on the counter row lock; the first allocation
    /// for a scope seeds the counter from a scan of existing numbers (the
    /// scan-based fallback retained as bootstrap).
    #[instrument(skip(self), fields(tenant_id = %tenant_id, year = year, month = month))]
    async fn allocate_invoice_sequence(
        &self,
        tenant_id: Uuid,
        year: i32,
        month: u32,
    ) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["allocate_invoice_sequence"])
            .start_timer();

        let prefix_pattern = format!("{}%", numbering::invoice_number_prefix(year, month));

        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invoice_counters (tenant_id, year, month, last_seq)
            VALUES ($1, $2, $3, COALESCE((
                SELECT MAX(split_part(invoice_number, '-', 4)::bigint)
                FROM invoices
                WHERE tenant_id = $1 AND invoice_number LIKE $4
            ), 0) + 1)
            ON CONFLICT (tenant_id, year, month)
            DO UPDATE SET last_seq = invoice_counters.last_seq + 1
            RETURNING last_seq
            "#,
        )
        .bind(tenant_id)
        .bind(year)
        .bind(month as i32)
        .bind(&prefix_pattern)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to allocate sequence: {}", e))
        })?;

        timer.observe_duration();

        Ok(sequence)
    }

    #[instrument(skip(self, invoice), fields(tenant_id = %invoice.tenant_id, invoice_number = %invoice.invoice_number))]
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        sqlx::query(
            r#"
            INSERT INTO invoices (
                invoice_id, invoice_number, tenant_id, tenant_name, billing_month,
                subtotal, tax, total, status, due_date, sent_date, paid_date,
                billing_email, memo
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(invoice.invoice_id)
        .bind(&invoice.invoice_number)
        .bind(invoice.tenant_id)
        .bind(&invoice.tenant_name)
        .bind(invoice.billing_month)
        .bind(invoice.subtotal)
        .bind(invoice.tax)
        .bind(invoice.total)
        .bind(&invoice.status)
        .bind(invoice.due_date)
        .bind(invoice.sent_date)
        .bind(invoice.paid_date)
        .bind(&invoice.billing_email)
        .bind(&invoice.memo)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "invoice {} collides with an existing invoice",
                    invoice.invoice_number
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to insert invoice: {}", e)),
        })?;

        for item in &invoice.items {
            sqlx::query(
                r#"
                INSERT INTO invoice_items (
                    item_id, invoice_id, description, quantity, unit_price, amount,
                    period, sort_order
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(item.item_id)
            .bind(item.invoice_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.amount)
            .bind(&item.period)
            .bind(item.sort_order)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert item: {}", e))
            })?;
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit invoice: {}", e))
        })?;

        timer.observe_duration();

        info!("Draft invoice persisted");

        Ok(())
    }

    #[instrument(skip(self, invoice), fields(tenant_id = %invoice.tenant_id, invoice_number = %invoice.invoice_number))]
    async fn replace_invoice(&self, invoice: &Invoice) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["replace_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let existing_status: Option<String> = sqlx::query_scalar(
            r#"
            SELECT status FROM invoices
            WHERE tenant_id = $1 AND billing_month = $2
            FOR UPDATE
            "#,
        )
        .bind(invoice.tenant_id)
        .bind(invoice.billing_month)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock invoice: {}", e)))?;

        match existing_status.as_deref() {
            Some("draft") => {}
            Some(_) => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "only draft invoices can be superseded"
                )))
            }
            None => {
                return Err(AppError::NotFound(anyhow::anyhow!(
                    "no invoice to supersede for {}",
                    invoice.billing_month.format("%Y-%m")
                )))
            }
        }

        // Items cascade with the old row.
        sqlx::query(
            "DELETE FROM invoices WHERE tenant_id = $1 AND billing_month = $2 AND status = 'draft'",
        )
        .bind(invoice.tenant_id)
        .bind(invoice.billing_month)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to remove old draft: {}", e))
        })?;

        sqlx::query(
            r#"
            INSERT INTO invoices (
                invoice_id, invoice_number, tenant_id, tenant_name, billing_month,
                subtotal, tax, total, status, due_date, sent_date, paid_date,
                billing_email, memo
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(invoice.invoice_id)
        .bind(&invoice.invoice_number)
        .bind(invoice.tenant_id)
        .bind(&invoice.tenant_name)
        .bind(invoice.billing_month)
        .bind(invoice.subtotal)
        .bind(invoice.tax)
        .bind(invoice.total)
        .bind(&invoice.status)
        .bind(invoice.due_date)
        .bind(invoice.sent_date)
        .bind(invoice.paid_date)
        .bind(&invoice.billing_email)
        .bind(&invoice.memo)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert superseding draft: {}", e))
        })?;

        for item in &invoice.items {
            sqlx::query(
                r#"
                INSERT INTO invoice_items (
                    item_id, invoice_id, description, quantity, unit_price, amount,
                    period, sort_order
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(item.item_id)
            .bind(item.invoice_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.amount)
            .bind(&item.period)
            .bind(item.sort_order)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert item: {}", e))
            })?;
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit supersede: {}", e))
        })?;

        timer.observe_duration();

        info!("Draft invoice superseded");

        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn find_invoice_for_month(
        &self,
        tenant_id: Uuid,
        month: NaiveDate,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_invoice_for_month"])
            .start_timer();

        let billing_month = month.with_day(1).unwrap_or(month);

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices WHERE tenant_id = $1 AND billing_month = $2",
            INVOICE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(billing_month)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find invoice: {}", e)))?;

        timer.observe_duration();

        self.with_items(invoice).await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices WHERE tenant_id = $1 AND invoice_id = $2",
            INVOICE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        self.with_items(invoice).await
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id))]
    async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let status_str = filter.status.map(|s| s.as_str().to_string());

        let invoices = if let Some(cursor) = filter.page_token {
            sqlx::query_as::<_, Invoice>(&format!(
                r#"
                SELECT {} FROM invoices
                WHERE tenant_id = $1
                  AND ($2::varchar IS NULL OR status = $2)
                  AND ($3::date IS NULL OR billing_month >= $3)
                  AND ($4::date IS NULL OR billing_month <= $4)
                  AND invoice_id > $5
                ORDER BY invoice_id
                LIMIT $6
                "#,
                INVOICE_COLUMNS
            ))
            .bind(tenant_id)
            .bind(&status_str)
            .bind(filter.from_month)
            .bind(filter.to_month)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Invoice>(&format!(
                r#"
                SELECT {} FROM invoices
                WHERE tenant_id = $1
                  AND ($2::varchar IS NULL OR status = $2)
                  AND ($3::date IS NULL OR billing_month >= $3)
                  AND ($4::date IS NULL OR billing_month <= $4)
                ORDER BY invoice_id
                LIMIT $5
                "#,
                INVOICE_COLUMNS
            ))
            .bind(tenant_id)
            .bind(&status_str)
            .bind(filter.from_month)
            .bind(filter.to_month)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        let mut result = Vec::with_capacity(invoices.len());
        for mut invoice in invoices {
            invoice.items = self.load_items(invoice.invoice_id).await?;
            result.push(invoice);
        }

        timer.observe_duration();

        Ok(result)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn invoice_numbers_for_month(
        &self,
        tenant_id: Uuid,
        year: i32,
        month: u32,
    ) -> Result<Vec<String>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["invoice_numbers_for_month"])
            .start_timer();

        let prefix_pattern = format!("{}%", numbering::invoice_number_prefix(year, month));

        let numbers = sqlx::query_scalar::<_, String>(
            r#"
            SELECT invoice_number FROM invoices
            WHERE tenant_id = $1 AND invoice_number LIKE $2
            ORDER BY invoice_number
            "#,
        )
        .bind(tenant_id)
        .bind(&prefix_pattern)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list numbers: {}", e)))?;

        timer.observe_duration();

        Ok(numbers)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    async fn mark_invoice_sent(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        sent_date: NaiveDate,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_invoice_sent"])
            .start_timer();

        // Check the current status first so illegal transitions report
        // cleanly instead of vanishing into a zero-row update.
        let existing = self.get_invoice(tenant_id, invoice_id).await?;
        match existing {
            Some(ref inv) if inv.status() == InvoiceStatus::Draft => {}
            Some(inv) => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "cannot send invoice {} in status '{}'",
                    inv.invoice_number,
                    inv.status
                )))
            }
            None => return Ok(None),
        }

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = 'sent', sent_date = $3
            WHERE tenant_id = $1 AND invoice_id = $2 AND status = 'draft'
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(sent_date)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to send invoice: {}", e)))?;

        timer.observe_duration();

        self.with_items(invoice).await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    async fn mark_invoice_paid(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        paid_date: NaiveDate,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_invoice_paid"])
            .start_timer();

        let existing = self.get_invoice(tenant_id, invoice_id).await?;
        match existing {
            Some(ref inv) if inv.status().can_transition_to(InvoiceStatus::Paid) => {}
            Some(inv) => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "cannot mark invoice {} paid in status '{}'",
                    inv.invoice_number,
                    inv.status
                )))
            }
            None => return Ok(None),
        }

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = 'paid', paid_date = $3
            WHERE tenant_id = $1 AND invoice_id = $2 AND status IN ('draft', 'sent')
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(paid_date)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to pay invoice: {}", e)))?;

        timer.observe_duration();

        self.with_items(invoice).await
    }

    #[instrument(skip(self, memo), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    async fn update_invoice_memo(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        memo: Option<String>,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice_memo"])
            .start_timer();

        let existing = self.get_invoice(tenant_id, invoice_id).await?;
        match existing {
            Some(ref inv) if inv.status() != InvoiceStatus::Paid => {}
            Some(inv) => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "invoice {} is paid and can no longer be modified",
                    inv.invoice_number
                )))
            }
            None => return Ok(None),
        }

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET memo = $3
            WHERE tenant_id = $1 AND invoice_id = $2 AND status <> 'paid'
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(&memo)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update memo: {}", e)))?;

        timer.observe_duration();

        self.with_items(invoice).await
    }
}
