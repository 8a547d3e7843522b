//! PostgreSQL-backed store.
//!
//! # Locking
//!
//! - Batch, service and pending rows are locked with `SELECT ... FOR UPDATE`
//!   inside a unit of work.
//! - Invoice number allocation takes a transaction-scoped advisory lock keyed
//!   by receipt book, so concurrent batches on the same book run their
//!   "read last number, insert invoices" sections one after the other.
//! - Unique indexes on `invoice_number`, `invoices.pending_id` and
//!   `billing_pendings.service_id` back those rules at the storage level.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{Postgres, QueryBuilder, Transaction};

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        billing_batch::{BatchFilter, BatchStatus, BillingBatch, NewBillingBatch},
        billing_pending::{BillingPending, PendingFilter, PendingStatus, PendingWithService},
        invoice::{Invoice, InvoiceCriteria, InvoiceDetail, InvoiceFilter, NewInvoice},
        pagination::Page,
        service::{NewService, Service, ServiceFilter, ServiceStatus},
    },
    store::{BatchCompletion, BillingStore, UnitOfWork},
};

/// First key of the two-key advisory lock; the second is the receipt book hash.
const RECEIPT_BOOK_LOCK_NAMESPACE: i32 = 7301;

const PENDING_SELECT: &str = r#"
    SELECT p.id, p.service_id, p.status, p.created_at, p.updated_at,
           s.id AS svc_id, s.service_date AS svc_service_date,
           s.customer_id AS svc_customer_id, s.amount AS svc_amount,
           s.status AS svc_status, s.created_at AS svc_created_at,
           s.updated_at AS svc_updated_at
    FROM billing_pendings p
    LEFT JOIN services s ON s.id = p.service_id
"#;

const INVOICE_SELECT: &str = r#"
    SELECT i.id, i.invoice_number, i.receipt_book, i.cae, i.issue_date, i.amount,
           i.batch_id, i.pending_id, i.created_at,
           s.id AS service_id, s.customer_id, s.service_date
    FROM invoices i
    LEFT JOIN billing_pendings p ON p.id = i.pending_id
    LEFT JOIN services s ON s.id = p.service_id
"#;

/// Flat row of `PENDING_SELECT`.
#[derive(sqlx::FromRow)]
struct PendingRow {
    id: i64,
    service_id: i64,
    status: PendingStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    svc_id: Option<i64>,
    svc_service_date: Option<NaiveDate>,
    svc_customer_id: Option<i64>,
    svc_amount: Option<Decimal>,
    svc_status: Option<ServiceStatus>,
    svc_created_at: Option<DateTime<Utc>>,
    svc_updated_at: Option<DateTime<Utc>>,
}

impl From<PendingRow> for PendingWithService {
    fn from(row: PendingRow) -> Self {
        let service = match (
            row.svc_id,
            row.svc_service_date,
            row.svc_customer_id,
            row.svc_amount,
            row.svc_status,
            row.svc_created_at,
            row.svc_updated_at,
        ) {
            (
                Some(id),
                Some(service_date),
                Some(customer_id),
                Some(amount),
                Some(status),
                Some(created_at),
                Some(updated_at),
            ) => Some(Service {
                id,
                service_date,
                customer_id,
                amount,
                status,
                created_at,
                updated_at,
            }),
            _ => None,
        };

        PendingWithService {
            pending: BillingPending {
                id: row.id,
                service_id: row.service_id,
                status: row.status,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
            service,
        }
    }
}

/// Turn a unique-index violation into a `Conflict`; pass other errors through.
fn conflict_on_unique(err: sqlx::Error, message: impl FnOnce() -> String) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(message()),
        _ => AppError::Database(err),
    }
}

fn push_service_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &ServiceFilter) {
    if let Some(customer_id) = filter.customer_id {
        qb.push(" AND customer_id = ").push_bind(customer_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(from) = filter.date_from {
        qb.push(" AND service_date >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        qb.push(" AND service_date <= ").push_bind(to);
    }
}

fn push_pending_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &PendingFilter) {
    if let Some(status) = filter.status {
        qb.push(" AND p.status = ").push_bind(status);
    }
    if let Some(customer_id) = filter.customer_id {
        qb.push(" AND s.customer_id = ").push_bind(customer_id);
    }
    if let Some(from) = filter.date_from {
        qb.push(" AND s.service_date >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        qb.push(" AND s.service_date <= ").push_bind(to);
    }
}

fn push_batch_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &BatchFilter) {
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(receipt_book) = &filter.receipt_book {
        qb.push(" AND receipt_book = ").push_bind(receipt_book.clone());
    }
    if let Some(from) = filter.date_from {
        qb.push(" AND issue_date >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        qb.push(" AND issue_date <= ").push_bind(to);
    }
}

fn push_invoice_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &InvoiceFilter) {
    if let Some(batch_id) = filter.batch_id {
        qb.push(" AND i.batch_id = ").push_bind(batch_id);
    }
    if let Some(customer_id) = filter.customer_id {
        qb.push(" AND s.customer_id = ").push_bind(customer_id);
    }
    if let Some(number) = &filter.invoice_number {
        qb.push(" AND i.invoice_number ILIKE ")
            .push_bind(format!("%{}%", number));
    }
    if let Some(from) = filter.date_from {
        qb.push(" AND i.issue_date >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        qb.push(" AND i.issue_date <= ").push_bind(to);
    }
    if let Some(min) = filter.min_amount {
        qb.push(" AND i.amount >= ").push_bind(min);
    }
    if let Some(max) = filter.max_amount {
        qb.push(" AND i.amount <= ").push_bind(max);
    }
}

/// Store backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_service(&self, new: NewService) -> Result<Service, AppError> {
        let service = sqlx::query_as::<_, Service>(
            r#"
            INSERT INTO services (service_date, customer_id, amount, status)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(new.service_date)
        .bind(new.customer_id)
        .bind(new.amount)
        .bind(ServiceStatus::Created)
        .fetch_one(&self.pool)
        .await?;

        Ok(service)
    }

    async fn get_service(&self, id: i64) -> Result<Option<Service>, AppError> {
        let service = sqlx::query_as::<_, Service>("SELECT * FROM services WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(service)
    }

    async fn list_services(&self, filter: &ServiceFilter) -> Result<Page<Service>, AppError> {
        let params = filter.page_params();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM services WHERE TRUE");
        push_service_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM services WHERE TRUE");
        push_service_filters(&mut query, filter);
        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(params.limit))
            .push(" OFFSET ")
            .push_bind(params.offset());
        let services = query
            .build_query_as::<Service>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(services, total, params))
    }

    async fn get_pending(&self, id: i64) -> Result<Option<PendingWithService>, AppError> {
        let row = sqlx::query_as::<_, PendingRow>(&format!("{PENDING_SELECT} WHERE p.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn find_pendings(&self, ids: &[i64]) -> Result<Vec<PendingWithService>, AppError> {
        let rows =
            sqlx::query_as::<_, PendingRow>(&format!("{PENDING_SELECT} WHERE p.id = ANY($1)"))
                .bind(ids)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_pendings(
        &self,
        filter: &PendingFilter,
    ) -> Result<Page<PendingWithService>, AppError> {
        let params = filter.page_params();

        let mut count = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) FROM billing_pendings p LEFT JOIN services s ON s.id = p.service_id WHERE TRUE",
        );
        push_pending_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::<Postgres>::new(format!("{PENDING_SELECT} WHERE TRUE"));
        push_pending_filters(&mut query, filter);
        query
            .push(" ORDER BY p.created_at DESC, p.id DESC LIMIT ")
            .push_bind(i64::from(params.limit))
            .push(" OFFSET ")
            .push_bind(params.offset());
        let rows = query
            .build_query_as::<PendingRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(
            rows.into_iter().map(Into::into).collect(),
            total,
            params,
        ))
    }

    async fn open_pendings(&self) -> Result<Vec<PendingWithService>, AppError> {
        let rows = sqlx::query_as::<_, PendingRow>(&format!(
            "{PENDING_SELECT} WHERE p.status = $1 ORDER BY p.created_at ASC, p.id ASC"
        ))
        .bind(PendingStatus::Pending)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_batch(&self, new: NewBillingBatch) -> Result<BillingBatch, AppError> {
        let batch = sqlx::query_as::<_, BillingBatch>(
            r#"
            INSERT INTO billing_batches (issue_date, receipt_book, pending_ids, status)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(new.issue_date)
        .bind(&new.receipt_book)
        .bind(&new.pending_ids)
        .bind(BatchStatus::PendingProcessing)
        .fetch_one(&self.pool)
        .await?;

        Ok(batch)
    }

    async fn get_batch(&self, id: i64) -> Result<Option<BillingBatch>, AppError> {
        let batch = sqlx::query_as::<_, BillingBatch>("SELECT * FROM billing_batches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(batch)
    }

    async fn list_batches(&self, filter: &BatchFilter) -> Result<Page<BillingBatch>, AppError> {
        let params = filter.page_params();

        let mut count =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM billing_batches WHERE TRUE");
        push_batch_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM billing_batches WHERE TRUE");
        push_batch_filters(&mut query, filter);
        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(params.limit))
            .push(" OFFSET ")
            .push_bind(params.offset());
        let batches = query
            .build_query_as::<BillingBatch>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(batches, total, params))
    }

    async fn mark_batch_in_process(
        &self,
        id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE billing_batches
            SET status = $2,
                error_message = NULL,
                processing_started_at = $3,
                updated_at = NOW()
            WHERE id = $1 AND status <> $4
            "#,
        )
        .bind(id)
        .bind(BatchStatus::InProcess)
        .bind(started_at)
        .bind(BatchStatus::Processed)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated > 0 {
            return Ok(true);
        }

        // Nothing updated: either processed already or missing
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM billing_batches WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Err(AppError::not_found("BillingBatch", id));
        }
        Ok(false)
    }

    async fn mark_batch_error(
        &self,
        id: i64,
        message: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE billing_batches
            SET status = $2,
                error_message = $3,
                processing_completed_at = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(BatchStatus::Error)
        .bind(message)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reset_batch_for_retry(&self, id: i64) -> Result<Option<BillingBatch>, AppError> {
        // The status check and the reset are one statement, so two concurrent
        // retries cannot both succeed
        let batch = sqlx::query_as::<_, BillingBatch>(
            r#"
            UPDATE billing_batches
            SET status = $2,
                error_message = NULL,
                processing_started_at = NULL,
                processing_completed_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = $3
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(BatchStatus::PendingProcessing)
        .bind(BatchStatus::Error)
        .fetch_optional(&self.pool)
        .await?;

        Ok(batch)
    }

    async fn list_receipt_books(&self) -> Result<Vec<String>, AppError> {
        let books = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT receipt_book FROM billing_batches ORDER BY receipt_book ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(books)
    }

    async fn get_invoice(&self, id: i64) -> Result<Option<InvoiceDetail>, AppError> {
        let invoice =
            sqlx::query_as::<_, InvoiceDetail>(&format!("{INVOICE_SELECT} WHERE i.id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(invoice)
    }

    async fn get_invoice_by_number(
        &self,
        number: &str,
    ) -> Result<Option<InvoiceDetail>, AppError> {
        let invoice = sqlx::query_as::<_, InvoiceDetail>(&format!(
            "{INVOICE_SELECT} WHERE i.invoice_number = $1"
        ))
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(invoice)
    }

    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Page<InvoiceDetail>, AppError> {
        let params = filter.page_params();

        let mut count = QueryBuilder::<Postgres>::new(
            r#"
            SELECT COUNT(*)
            FROM invoices i
            LEFT JOIN billing_pendings p ON p.id = i.pending_id
            LEFT JOIN services s ON s.id = p.service_id
            WHERE TRUE
            "#,
        );
        push_invoice_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::<Postgres>::new(format!("{INVOICE_SELECT} WHERE TRUE"));
        push_invoice_filters(&mut query, filter);
        query
            .push(" ORDER BY i.created_at DESC, i.id DESC LIMIT ")
            .push_bind(i64::from(params.limit))
            .push(" OFFSET ")
            .push_bind(params.offset());
        let invoices = query
            .build_query_as::<InvoiceDetail>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(invoices, total, params))
    }

    async fn find_invoices(
        &self,
        criteria: &InvoiceCriteria,
    ) -> Result<Vec<InvoiceDetail>, AppError> {
        let mut query = QueryBuilder::<Postgres>::new(format!("{INVOICE_SELECT} WHERE TRUE"));
        if let Some(ids) = &criteria.ids {
            query.push(" AND i.id = ANY(").push_bind(ids.clone()).push(")");
        }
        if let Some(batch_id) = criteria.batch_id {
            query.push(" AND i.batch_id = ").push_bind(batch_id);
        }
        if let Some(customer_id) = criteria.customer_id {
            query.push(" AND s.customer_id = ").push_bind(customer_id);
        }
        query.push(" ORDER BY i.invoice_number ASC");

        let invoices = query
            .build_query_as::<InvoiceDetail>()
            .fetch_all(&self.pool)
            .await?;

        Ok(invoices)
    }

    async fn last_invoice_number(&self, receipt_book: &str) -> Result<Option<String>, AppError> {
        let number = sqlx::query_scalar::<_, String>(
            r#"
            SELECT invoice_number FROM invoices
            WHERE receipt_book = $1
            ORDER BY length(invoice_number) DESC, invoice_number DESC
            LIMIT 1
            "#,
        )
        .bind(receipt_book)
        .fetch_optional(&self.pool)
        .await?;

        Ok(number)
    }
}

/// A PostgreSQL transaction.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_batch(&mut self, id: i64) -> Result<Option<BillingBatch>, AppError> {
        let batch = sqlx::query_as::<_, BillingBatch>(
            "SELECT * FROM billing_batches WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(batch)
    }

    async fn lock_receipt_book(&mut self, receipt_book: &str) -> Result<(), AppError> {
        // Released automatically on commit or rollback
        sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2))")
            .bind(RECEIPT_BOOK_LOCK_NAMESPACE)
            .bind(receipt_book)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn lock_services(&mut self, ids: &[i64]) -> Result<Vec<Service>, AppError> {
        let services = sqlx::query_as::<_, Service>(
            "SELECT * FROM services WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(services)
    }

    async fn lock_pendings(&mut self, ids: &[i64]) -> Result<Vec<PendingWithService>, AppError> {
        // Rows are locked in id order so concurrent batches cannot deadlock
        let rows = sqlx::query_as::<_, PendingRow>(&format!(
            "{PENDING_SELECT} WHERE p.id = ANY($1) ORDER BY p.id FOR UPDATE OF p"
        ))
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_pending_by_service(
        &mut self,
        service_id: i64,
    ) -> Result<Option<BillingPending>, AppError> {
        let pending = sqlx::query_as::<_, BillingPending>(
            "SELECT * FROM billing_pendings WHERE service_id = $1",
        )
        .bind(service_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(pending)
    }

    async fn last_invoice_number(
        &mut self,
        receipt_book: &str,
    ) -> Result<Option<String>, AppError> {
        let number = sqlx::query_scalar::<_, String>(
            r#"
            SELECT invoice_number FROM invoices
            WHERE receipt_book = $1
            ORDER BY length(invoice_number) DESC, invoice_number DESC
            LIMIT 1
            "#,
        )
        .bind(receipt_book)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(number)
    }

    async fn update_service(&mut self, service: &Service) -> Result<Service, AppError> {
        let updated = sqlx::query_as::<_, Service>(
            r#"
            UPDATE services
            SET service_date = $2,
                customer_id = $3,
                amount = $4,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(service.id)
        .bind(service.service_date)
        .bind(service.customer_id)
        .bind(service.amount)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::not_found("Service", service.id))?;

        Ok(updated)
    }

    async fn delete_service(&mut self, id: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM services WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn set_service_status(
        &mut self,
        id: i64,
        status: ServiceStatus,
    ) -> Result<(), AppError> {
        let updated =
            sqlx::query("UPDATE services SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(status)
                .execute(&mut *self.tx)
                .await?
                .rows_affected();

        if updated == 0 {
            return Err(AppError::not_found("Service", id));
        }
        Ok(())
    }

    async fn insert_pending(&mut self, service_id: i64) -> Result<BillingPending, AppError> {
        let pending = sqlx::query_as::<_, BillingPending>(
            r#"
            INSERT INTO billing_pendings (service_id, status)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(service_id)
        .bind(PendingStatus::Pending)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            conflict_on_unique(e, || "Service already has a billing pending".to_string())
        })?;

        Ok(pending)
    }

    async fn set_pending_status(
        &mut self,
        id: i64,
        status: PendingStatus,
    ) -> Result<(), AppError> {
        let updated = sqlx::query(
            "UPDATE billing_pendings SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(AppError::not_found("BillingPending", id));
        }
        Ok(())
    }

    async fn delete_pending(&mut self, id: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM billing_pendings WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn insert_invoice(&mut self, new: &NewInvoice) -> Result<Invoice, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (
                invoice_number,
                receipt_book,
                cae,
                issue_date,
                amount,
                batch_id,
                pending_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(&new.invoice_number)
        .bind(&new.receipt_book)
        .bind(&new.cae)
        .bind(new.issue_date)
        .bind(new.amount)
        .bind(new.batch_id)
        .bind(new.pending_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            conflict_on_unique(e, || {
                format!(
                    "Invoice {} or pending {} already invoiced",
                    new.invoice_number, new.pending_id
                )
            })
        })?;

        Ok(invoice)
    }

    async fn complete_batch(
        &mut self,
        id: i64,
        completion: BatchCompletion,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE billing_batches
            SET status = $2,
                processing_completed_at = $3,
                total_invoices = $4,
                total_amount = $5,
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(BatchStatus::Processed)
        .bind(completion.completed_at)
        .bind(completion.total_invoices)
        .bind(completion.total_amount)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
