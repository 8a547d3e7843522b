#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use billing_batch_server::{
    app::{AppSettings, Application},
    db::{self, DbPool},
    error::AppError,
    middleware::auth::ApiKeys,
    models::{
        billing_batch::{BatchFilter, BillingBatch, CreateBatchRequest, NewBillingBatch},
        billing_pending::{BillingPending, PendingFilter, PendingStatus, PendingWithService},
        invoice::{Invoice, InvoiceCriteria, InvoiceDetail, InvoiceFilter, NewInvoice},
        pagination::Page,
        service::{CreateServiceRequest, NewService, Service, ServiceFilter, ServiceStatus},
    },
    queue::{BackoffPolicy, JobOptions, MemoryJobQueue},
    services::{erp_sync_service::ErpSimulator, service_records},
    store::{BatchCompletion, BillingStore, MemoryStore, UnitOfWork},
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

pub const TEST_API_KEY: &str = "test-api-key";
pub const RECEIPT_BOOK: &str = "A-0001";

pub fn issue_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
}

/// Settings with immediate retries so `drain` runs every attempt.
pub fn test_settings(attempts: u32) -> AppSettings {
    AppSettings {
        job_options: JobOptions {
            attempts,
            backoff: BackoffPolicy::Fixed { delay_ms: 0 },
        },
        worker_concurrency: 2,
        worker_poll_interval: Duration::from_millis(10),
        erp: ErpSimulator::reliable(),
        api_keys: ApiKeys::new([ApiKeys::hash_key(TEST_API_KEY)]),
    }
}

pub struct TestApp {
    pub store: Arc<dyn BillingStore>,
    pub queue: MemoryJobQueue,
    pub app: Application,
}

pub fn test_app() -> TestApp {
    test_app_with(Arc::new(MemoryStore::new()), 3)
}

pub fn test_app_with(store: Arc<dyn BillingStore>, attempts: u32) -> TestApp {
    let queue = MemoryJobQueue::new();
    let app = Application::new(
        store.clone(),
        Arc::new(queue.clone()),
        test_settings(attempts),
    );
    TestApp { store, queue, app }
}

/// Pool on `DATABASE_URL` with migrations applied.
///
/// Only used by the `#[ignore]` PostgreSQL tests:
/// `DATABASE_URL=postgres://... cargo test -- --ignored`
pub async fn pg_pool() -> DbPool {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set to run the PostgreSQL tests");
    let pool = db::create_pool(&url, 10)
        .await
        .expect("Failed to connect to PostgreSQL");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Receipt book no other test run uses, so numbering starts at 1.
pub fn unique_receipt_book() -> String {
    format!("PG-{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

pub fn batch_request(receipt_book: &str, pending_ids: Vec<i64>) -> CreateBatchRequest {
    CreateBatchRequest {
        issue_date: issue_date(),
        receipt_book: receipt_book.to_string(),
        pending_ids,
    }
}

pub async fn create_service(store: &dyn BillingStore, customer_id: i64, cents: i64) -> Service {
    service_records::create_service(
        store,
        CreateServiceRequest {
            service_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            customer_id,
            amount: Decimal::new(cents, 2),
        },
    )
    .await
    .unwrap()
}

/// Create one service per amount and send them all to billing.
///
/// Returns the pending ids in the order of `amounts`.
pub async fn create_pendings(store: &dyn BillingStore, customer_id: i64, amounts: &[i64]) -> Vec<i64> {
    let mut service_ids = Vec::new();
    for &cents in amounts {
        service_ids.push(create_service(store, customer_id, cents).await.id);
    }

    let response = service_records::send_to_billing(store, &service_ids)
        .await
        .unwrap();
    assert!(response.failed.is_empty());

    service_ids
        .iter()
        .map(|service_id| {
            response
                .pendings
                .iter()
                .find(|p| p.service_id == *service_id)
                .map(|p| p.id)
                .unwrap()
        })
        .collect()
}

/// Store wrapper that makes the `fail_at`-th invoice insert of a unit of work
/// fail, for the first `failures` units that get that far.
pub struct FailingStore {
    inner: Arc<dyn BillingStore>,
    fail_at: usize,
    remaining: Arc<AtomicUsize>,
}

impl FailingStore {
    pub fn new(inner: impl BillingStore + 'static, fail_at: usize, failures: usize) -> Self {
        Self {
            inner: Arc::new(inner),
            fail_at,
            remaining: Arc::new(AtomicUsize::new(failures)),
        }
    }
}

struct FailingUnit {
    inner: Box<dyn UnitOfWork>,
    fail_at: usize,
    inserts: usize,
    remaining: Arc<AtomicUsize>,
}

#[async_trait]
impl BillingStore for FailingStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        Ok(Box::new(FailingUnit {
            inner: self.inner.begin().await?,
            fail_at: self.fail_at,
            inserts: 0,
            remaining: self.remaining.clone(),
        }))
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.inner.ping().await
    }

    async fn insert_service(&self, new: NewService) -> Result<Service, AppError> {
        self.inner.insert_service(new).await
    }

    async fn get_service(&self, id: i64) -> Result<Option<Service>, AppError> {
        self.inner.get_service(id).await
    }

    async fn list_services(&self, filter: &ServiceFilter) -> Result<Page<Service>, AppError> {
        self.inner.list_services(filter).await
    }

    async fn get_pending(&self, id: i64) -> Result<Option<PendingWithService>, AppError> {
        self.inner.get_pending(id).await
    }

    async fn find_pendings(&self, ids: &[i64]) -> Result<Vec<PendingWithService>, AppError> {
        self.inner.find_pendings(ids).await
    }

    async fn list_pendings(
        &self,
        filter: &PendingFilter,
    ) -> Result<Page<PendingWithService>, AppError> {
        self.inner.list_pendings(filter).await
    }

    async fn open_pendings(&self) -> Result<Vec<PendingWithService>, AppError> {
        self.inner.open_pendings().await
    }

    async fn insert_batch(&self, new: NewBillingBatch) -> Result<BillingBatch, AppError> {
        self.inner.insert_batch(new).await
    }

    async fn get_batch(&self, id: i64) -> Result<Option<BillingBatch>, AppError> {
        self.inner.get_batch(id).await
    }

    async fn list_batches(&self, filter: &BatchFilter) -> Result<Page<BillingBatch>, AppError> {
        self.inner.list_batches(filter).await
    }

    async fn mark_batch_in_process(
        &self,
        id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.inner.mark_batch_in_process(id, started_at).await
    }

    async fn mark_batch_error(
        &self,
        id: i64,
        message: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.inner.mark_batch_error(id, message, completed_at).await
    }

    async fn reset_batch_for_retry(&self, id: i64) -> Result<Option<BillingBatch>, AppError> {
        self.inner.reset_batch_for_retry(id).await
    }

    async fn list_receipt_books(&self) -> Result<Vec<String>, AppError> {
        self.inner.list_receipt_books().await
    }

    async fn get_invoice(&self, id: i64) -> Result<Option<InvoiceDetail>, AppError> {
        self.inner.get_invoice(id).await
    }

    async fn get_invoice_by_number(
        &self,
        number: &str,
    ) -> Result<Option<InvoiceDetail>, AppError> {
        self.inner.get_invoice_by_number(number).await
    }

    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Page<InvoiceDetail>, AppError> {
        self.inner.list_invoices(filter).await
    }

    async fn find_invoices(
        &self,
        criteria: &InvoiceCriteria,
    ) -> Result<Vec<InvoiceDetail>, AppError> {
        self.inner.find_invoices(criteria).await
    }

    async fn last_invoice_number(&self, receipt_book: &str) -> Result<Option<String>, AppError> {
        self.inner.last_invoice_number(receipt_book).await
    }
}

#[async_trait]
impl UnitOfWork for FailingUnit {
    async fn lock_batch(&mut self, id: i64) -> Result<Option<BillingBatch>, AppError> {
        self.inner.lock_batch(id).await
    }

    async fn lock_receipt_book(&mut self, receipt_book: &str) -> Result<(), AppError> {
        self.inner.lock_receipt_book(receipt_book).await
    }

    async fn lock_services(&mut self, ids: &[i64]) -> Result<Vec<Service>, AppError> {
        self.inner.lock_services(ids).await
    }

    async fn lock_pendings(&mut self, ids: &[i64]) -> Result<Vec<PendingWithService>, AppError> {
        self.inner.lock_pendings(ids).await
    }

    async fn find_pending_by_service(
        &mut self,
        service_id: i64,
    ) -> Result<Option<BillingPending>, AppError> {
        self.inner.find_pending_by_service(service_id).await
    }

    async fn last_invoice_number(
        &mut self,
        receipt_book: &str,
    ) -> Result<Option<String>, AppError> {
        self.inner.last_invoice_number(receipt_book).await
    }

    async fn update_service(&mut self, service: &Service) -> Result<Service, AppError> {
        self.inner.update_service(service).await
    }

    async fn delete_service(&mut self, id: i64) -> Result<(), AppError> {
        self.inner.delete_service(id).await
    }

    async fn set_service_status(
        &mut self,
        id: i64,
        status: ServiceStatus,
    ) -> Result<(), AppError> {
        self.inner.set_service_status(id, status).await
    }

    async fn insert_pending(&mut self, service_id: i64) -> Result<BillingPending, AppError> {
        self.inner.insert_pending(service_id).await
    }

    async fn set_pending_status(
        &mut self,
        id: i64,
        status: PendingStatus,
    ) -> Result<(), AppError> {
        self.inner.set_pending_status(id, status).await
    }

    async fn delete_pending(&mut self, id: i64) -> Result<(), AppError> {
        self.inner.delete_pending(id).await
    }

    async fn insert_invoice(&mut self, new: &NewInvoice) -> Result<Invoice, AppError> {
        self.inserts += 1;
        if self.inserts == self.fail_at
            && self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(AppError::Internal(
                "injected invoice insert failure".to_string(),
            ));
        }
        self.inner.insert_invoice(new).await
    }

    async fn complete_batch(
        &mut self,
        id: i64,
        completion: BatchCompletion,
    ) -> Result<(), AppError> {
        self.inner.complete_batch(id, completion).await
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.inner.rollback().await
    }
}
