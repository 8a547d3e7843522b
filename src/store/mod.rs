//! Persistent record of services, pendings, batches and invoices.
//!
//! # Architecture
//!
//! - [`BillingStore`]: single-statement reads and writes (each one commits on its own)
//! - [`UnitOfWork`]: an explicit `begin → … → commit | rollback` scope for
//!   multi-row writes. Every cross-entity change of one batch, one
//!   send-to-billing item or one cancellation goes through a single unit.
//!
//! Two implementations are provided: [`postgres::PgStore`] for production and
//! [`memory::MemoryStore`] for local development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::{
    error::AppError,
    models::{
        billing_batch::{BatchFilter, BillingBatch, NewBillingBatch},
        billing_pending::{BillingPending, PendingFilter, PendingStatus, PendingWithService},
        invoice::{Invoice, InvoiceCriteria, InvoiceDetail, InvoiceFilter, NewInvoice},
        pagination::Page,
        service::{NewService, Service, ServiceFilter, ServiceStatus},
    },
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Values written to a batch when processing succeeds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchCompletion {
    pub total_invoices: i32,
    pub total_amount: Decimal,
    pub completed_at: DateTime<Utc>,
}

/// Autocommit operations over the billing tables.
#[async_trait]
pub trait BillingStore: Send + Sync + 'static {
    /// Open a unit of work. Nothing it writes is visible until `commit`.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError>;

    /// Connectivity check used by the health endpoint.
    async fn ping(&self) -> Result<(), AppError>;

    // Services
    async fn insert_service(&self, new: NewService) -> Result<Service, AppError>;
    async fn get_service(&self, id: i64) -> Result<Option<Service>, AppError>;
    async fn list_services(&self, filter: &ServiceFilter) -> Result<Page<Service>, AppError>;

    // Pendings
    async fn get_pending(&self, id: i64) -> Result<Option<PendingWithService>, AppError>;

    /// Batched read of pendings with their services, in no particular order.
    async fn find_pendings(&self, ids: &[i64]) -> Result<Vec<PendingWithService>, AppError>;

    async fn list_pendings(
        &self,
        filter: &PendingFilter,
    ) -> Result<Page<PendingWithService>, AppError>;

    /// Every pending still in `PENDING`, oldest first.
    async fn open_pendings(&self) -> Result<Vec<PendingWithService>, AppError>;

    // Batches
    async fn insert_batch(&self, new: NewBillingBatch) -> Result<BillingBatch, AppError>;
    async fn get_batch(&self, id: i64) -> Result<Option<BillingBatch>, AppError>;
    async fn list_batches(&self, filter: &BatchFilter) -> Result<Page<BillingBatch>, AppError>;
    /// Move a batch that is not yet `PROCESSED` to `IN_PROCESS`, clearing any
    /// earlier error. Returns `false` when the batch was already processed.
    async fn mark_batch_in_process(
        &self,
        id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;
    async fn mark_batch_error(
        &self,
        id: i64,
        message: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Move an `ERROR` batch back to `PENDING_PROCESSING`, clearing the error
    /// and both timestamps. Returns `None` if the batch was not in `ERROR`.
    async fn reset_batch_for_retry(&self, id: i64) -> Result<Option<BillingBatch>, AppError>;

    /// Distinct receipt books used by any batch, ascending.
    async fn list_receipt_books(&self) -> Result<Vec<String>, AppError>;

    // Invoices
    async fn get_invoice(&self, id: i64) -> Result<Option<InvoiceDetail>, AppError>;
    async fn get_invoice_by_number(&self, number: &str)
    -> Result<Option<InvoiceDetail>, AppError>;
    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Page<InvoiceDetail>, AppError>;

    /// Unpaginated selection ordered by invoice number.
    async fn find_invoices(&self, criteria: &InvoiceCriteria)
    -> Result<Vec<InvoiceDetail>, AppError>;

    /// Greatest invoice number issued for a receipt book (non-locking read).
    async fn last_invoice_number(&self, receipt_book: &str) -> Result<Option<String>, AppError>;
}

/// Transaction-scoped operations.
///
/// Dropping a unit without calling `commit` discards its writes.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Lock a batch row for the rest of the unit.
    async fn lock_batch(&mut self, id: i64) -> Result<Option<BillingBatch>, AppError>;

    /// Serialize invoice number allocation for a receipt book until the unit ends.
    async fn lock_receipt_book(&mut self, receipt_book: &str) -> Result<(), AppError>;

    /// Lock services by id; missing ids are simply absent from the result.
    async fn lock_services(&mut self, ids: &[i64]) -> Result<Vec<Service>, AppError>;

    /// Lock pendings by id and read their services in one query.
    async fn lock_pendings(&mut self, ids: &[i64]) -> Result<Vec<PendingWithService>, AppError>;

    async fn find_pending_by_service(
        &mut self,
        service_id: i64,
    ) -> Result<Option<BillingPending>, AppError>;

    async fn last_invoice_number(&mut self, receipt_book: &str)
    -> Result<Option<String>, AppError>;

    async fn update_service(&mut self, service: &Service) -> Result<Service, AppError>;
    async fn delete_service(&mut self, id: i64) -> Result<(), AppError>;
    async fn set_service_status(&mut self, id: i64, status: ServiceStatus)
    -> Result<(), AppError>;

    async fn insert_pending(&mut self, service_id: i64) -> Result<BillingPending, AppError>;
    async fn set_pending_status(&mut self, id: i64, status: PendingStatus)
    -> Result<(), AppError>;
    async fn delete_pending(&mut self, id: i64) -> Result<(), AppError>;

    async fn insert_invoice(&mut self, new: &NewInvoice) -> Result<Invoice, AppError>;

    /// Stamp the batch `PROCESSED` with its totals.
    async fn complete_batch(
        &mut self,
        id: i64,
        completion: BatchCompletion,
    ) -> Result<(), AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;
    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}
