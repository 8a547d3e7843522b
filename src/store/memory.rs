//! In-memory store for local development and tests.
//!
//! All state sits behind one async mutex. A unit of work holds the lock for
//! its whole lifetime and writes to a staged copy, which replaces the live
//! state on commit and is discarded on rollback or drop. Units therefore run
//! one at a time, which gives the same guarantees the PostgreSQL row and
//! advisory locks give.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    error::AppError,
    models::{
        billing_batch::{BatchFilter, BatchStatus, BillingBatch, NewBillingBatch},
        billing_pending::{BillingPending, PendingFilter, PendingStatus, PendingWithService},
        invoice::{Invoice, InvoiceCriteria, InvoiceDetail, InvoiceFilter, NewInvoice},
        pagination::Page,
        service::{NewService, Service, ServiceFilter, ServiceStatus},
    },
    services::invoice_numbers::invoice_number_order,
    store::{BatchCompletion, BillingStore, UnitOfWork},
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    services: BTreeMap<i64, Service>,
    pendings: BTreeMap<i64, BillingPending>,
    batches: BTreeMap<i64, BillingBatch>,
    invoices: BTreeMap<i64, Invoice>,
    last_service_id: i64,
    last_pending_id: i64,
    last_batch_id: i64,
    last_invoice_id: i64,
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

impl MemoryState {
    fn pending_with_service(&self, pending: &BillingPending) -> PendingWithService {
        PendingWithService {
            pending: pending.clone(),
            service: self.services.get(&pending.service_id).cloned(),
        }
    }

    fn invoice_detail(&self, invoice: &Invoice) -> InvoiceDetail {
        let service = self
            .pendings
            .get(&invoice.pending_id)
            .and_then(|p| self.services.get(&p.service_id));

        InvoiceDetail {
            id: invoice.id,
            invoice_number: invoice.invoice_number.clone(),
            receipt_book: invoice.receipt_book.clone(),
            cae: invoice.cae.clone(),
            issue_date: invoice.issue_date,
            amount: invoice.amount,
            batch_id: invoice.batch_id,
            pending_id: invoice.pending_id,
            created_at: invoice.created_at,
            service_id: service.map(|s| s.id),
            customer_id: service.map(|s| s.customer_id),
            service_date: service.map(|s| s.service_date),
        }
    }

    fn last_invoice_number(&self, receipt_book: &str) -> Option<String> {
        self.invoices
            .values()
            .filter(|i| i.receipt_book == receipt_book)
            .map(|i| &i.invoice_number)
            .max_by(|a, b| invoice_number_order(a, b))
            .cloned()
    }

    /// Remove a service and everything hanging off it.
    fn delete_service_cascade(&mut self, id: i64) {
        self.services.remove(&id);
        let pending_ids: Vec<i64> = self
            .pendings
            .values()
            .filter(|p| p.service_id == id)
            .map(|p| p.id)
            .collect();
        for pending_id in pending_ids {
            self.delete_pending_cascade(pending_id);
        }
    }

    fn delete_pending_cascade(&mut self, id: i64) {
        self.pendings.remove(&id);
        self.invoices.retain(|_, invoice| invoice.pending_id != id);
    }
}

/// Newest first, ties broken by id.
fn newest_first<T>(items: &mut [T], key: impl Fn(&T) -> (DateTime<Utc>, i64)) {
    items.sort_by(|a, b| key(b).cmp(&key(a)));
}

/// Store that keeps everything in process memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, staged }))
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn insert_service(&self, new: NewService) -> Result<Service, AppError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let service = Service {
            id: next_id(&mut state.last_service_id),
            service_date: new.service_date,
            customer_id: new.customer_id,
            amount: new.amount,
            status: ServiceStatus::Created,
            created_at: now,
            updated_at: now,
        };
        state.services.insert(service.id, service.clone());
        Ok(service)
    }

    async fn get_service(&self, id: i64) -> Result<Option<Service>, AppError> {
        Ok(self.state.lock().await.services.get(&id).cloned())
    }

    async fn list_services(&self, filter: &ServiceFilter) -> Result<Page<Service>, AppError> {
        let state = self.state.lock().await;
        let mut services: Vec<Service> = state
            .services
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        newest_first(&mut services, |s| (s.created_at, s.id));
        Ok(Page::from_vec(services, filter.page_params()))
    }

    async fn get_pending(&self, id: i64) -> Result<Option<PendingWithService>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .pendings
            .get(&id)
            .map(|p| state.pending_with_service(p)))
    }

    async fn find_pendings(&self, ids: &[i64]) -> Result<Vec<PendingWithService>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .pendings
            .values()
            .filter(|p| ids.contains(&p.id))
            .map(|p| state.pending_with_service(p))
            .collect())
    }

    async fn list_pendings(
        &self,
        filter: &PendingFilter,
    ) -> Result<Page<PendingWithService>, AppError> {
        let state = self.state.lock().await;
        let mut items: Vec<PendingWithService> = state
            .pendings
            .values()
            .map(|p| state.pending_with_service(p))
            .filter(|item| filter.matches(item))
            .collect();
        newest_first(&mut items, |item| (item.pending.created_at, item.pending.id));
        Ok(Page::from_vec(items, filter.page_params()))
    }

    async fn open_pendings(&self) -> Result<Vec<PendingWithService>, AppError> {
        let state = self.state.lock().await;
        let mut items: Vec<PendingWithService> = state
            .pendings
            .values()
            .filter(|p| p.status == PendingStatus::Pending)
            .map(|p| state.pending_with_service(p))
            .collect();
        items.sort_by_key(|item| (item.pending.created_at, item.pending.id));
        Ok(items)
    }

    async fn insert_batch(&self, new: NewBillingBatch) -> Result<BillingBatch, AppError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let batch = BillingBatch {
            id: next_id(&mut state.last_batch_id),
            issue_date: new.issue_date,
            receipt_book: new.receipt_book,
            status: BatchStatus::PendingProcessing,
            error_message: None,
            pending_ids: new.pending_ids,
            processing_started_at: None,
            processing_completed_at: None,
            total_invoices: 0,
            total_amount: Default::default(),
            created_at: now,
            updated_at: now,
        };
        state.batches.insert(batch.id, batch.clone());
        Ok(batch)
    }

    async fn get_batch(&self, id: i64) -> Result<Option<BillingBatch>, AppError> {
        Ok(self.state.lock().await.batches.get(&id).cloned())
    }

    async fn list_batches(&self, filter: &BatchFilter) -> Result<Page<BillingBatch>, AppError> {
        let state = self.state.lock().await;
        let mut batches: Vec<BillingBatch> = state
            .batches
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        newest_first(&mut batches, |b| (b.created_at, b.id));
        Ok(Page::from_vec(batches, filter.page_params()))
    }

    async fn mark_batch_in_process(
        &self,
        id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        let batch = state
            .batches
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("BillingBatch", id))?;
        if batch.status == BatchStatus::Processed {
            return Ok(false);
        }
        batch.status = BatchStatus::InProcess;
        batch.error_message = None;
        batch.processing_started_at = Some(started_at);
        batch.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_batch_error(
        &self,
        id: i64,
        message: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if let Some(batch) = state.batches.get_mut(&id) {
            batch.status = BatchStatus::Error;
            batch.error_message = Some(message.to_string());
            batch.processing_completed_at = Some(completed_at);
            batch.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn reset_batch_for_retry(&self, id: i64) -> Result<Option<BillingBatch>, AppError> {
        let mut state = self.state.lock().await;
        match state.batches.get_mut(&id) {
            Some(batch) if batch.status == BatchStatus::Error => {
                batch.status = BatchStatus::PendingProcessing;
                batch.error_message = None;
                batch.processing_started_at = None;
                batch.processing_completed_at = None;
                batch.updated_at = Utc::now();
                Ok(Some(batch.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list_receipt_books(&self) -> Result<Vec<String>, AppError> {
        let state = self.state.lock().await;
        let mut books: Vec<String> = state
            .batches
            .values()
            .map(|b| b.receipt_book.clone())
            .collect();
        books.sort();
        books.dedup();
        Ok(books)
    }

    async fn get_invoice(&self, id: i64) -> Result<Option<InvoiceDetail>, AppError> {
        let state = self.state.lock().await;
        Ok(state.invoices.get(&id).map(|i| state.invoice_detail(i)))
    }

    async fn get_invoice_by_number(
        &self,
        number: &str,
    ) -> Result<Option<InvoiceDetail>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .values()
            .find(|i| i.invoice_number == number)
            .map(|i| state.invoice_detail(i)))
    }

    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Page<InvoiceDetail>, AppError> {
        let state = self.state.lock().await;
        let mut invoices: Vec<InvoiceDetail> = state
            .invoices
            .values()
            .map(|i| state.invoice_detail(i))
            .filter(|i| filter.matches(i))
            .collect();
        newest_first(&mut invoices, |i| (i.created_at, i.id));
        Ok(Page::from_vec(invoices, filter.page_params()))
    }

    async fn find_invoices(
        &self,
        criteria: &InvoiceCriteria,
    ) -> Result<Vec<InvoiceDetail>, AppError> {
        let state = self.state.lock().await;
        let mut invoices: Vec<InvoiceDetail> = state
            .invoices
            .values()
            .map(|i| state.invoice_detail(i))
            .filter(|i| criteria.matches(i))
            .collect();
        invoices.sort_by(|a, b| a.invoice_number.cmp(&b.invoice_number));
        Ok(invoices)
    }

    async fn last_invoice_number(&self, receipt_book: &str) -> Result<Option<String>, AppError> {
        Ok(self.state.lock().await.last_invoice_number(receipt_book))
    }
}

/// Exclusive access to the store plus the writes staged so far.
pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_batch(&mut self, id: i64) -> Result<Option<BillingBatch>, AppError> {
        Ok(self.staged.batches.get(&id).cloned())
    }

    async fn lock_receipt_book(&mut self, _receipt_book: &str) -> Result<(), AppError> {
        // The unit already holds the store-wide lock
        Ok(())
    }

    async fn lock_services(&mut self, ids: &[i64]) -> Result<Vec<Service>, AppError> {
        Ok(self
            .staged
            .services
            .values()
            .filter(|s| ids.contains(&s.id))
            .cloned()
            .collect())
    }

    async fn lock_pendings(&mut self, ids: &[i64]) -> Result<Vec<PendingWithService>, AppError> {
        let state = &self.staged;
        Ok(state
            .pendings
            .values()
            .filter(|p| ids.contains(&p.id))
            .map(|p| state.pending_with_service(p))
            .collect())
    }

    async fn find_pending_by_service(
        &mut self,
        service_id: i64,
    ) -> Result<Option<BillingPending>, AppError> {
        Ok(self
            .staged
            .pendings
            .values()
            .find(|p| p.service_id == service_id)
            .cloned())
    }

    async fn last_invoice_number(
        &mut self,
        receipt_book: &str,
    ) -> Result<Option<String>, AppError> {
        Ok(self.staged.last_invoice_number(receipt_book))
    }

    async fn update_service(&mut self, service: &Service) -> Result<Service, AppError> {
        let current = self
            .staged
            .services
            .get_mut(&service.id)
            .ok_or_else(|| AppError::not_found("Service", service.id))?;
        current.service_date = service.service_date;
        current.customer_id = service.customer_id;
        current.amount = service.amount;
        current.updated_at = Utc::now();
        Ok(current.clone())
    }

    async fn delete_service(&mut self, id: i64) -> Result<(), AppError> {
        self.staged.delete_service_cascade(id);
        Ok(())
    }

    async fn set_service_status(
        &mut self,
        id: i64,
        status: ServiceStatus,
    ) -> Result<(), AppError> {
        let service = self
            .staged
            .services
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("Service", id))?;
        service.status = status;
        service.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_pending(&mut self, service_id: i64) -> Result<BillingPending, AppError> {
        if self
            .staged
            .pendings
            .values()
            .any(|p| p.service_id == service_id)
        {
            return Err(AppError::Conflict(
                "Service already has a billing pending".to_string(),
            ));
        }

        let now = Utc::now();
        let pending = BillingPending {
            id: next_id(&mut self.staged.last_pending_id),
            service_id,
            status: PendingStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.staged.pendings.insert(pending.id, pending.clone());
        Ok(pending)
    }

    async fn set_pending_status(
        &mut self,
        id: i64,
        status: PendingStatus,
    ) -> Result<(), AppError> {
        let pending = self
            .staged
            .pendings
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("BillingPending", id))?;
        pending.status = status;
        pending.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_pending(&mut self, id: i64) -> Result<(), AppError> {
        self.staged.delete_pending_cascade(id);
        Ok(())
    }

    async fn insert_invoice(&mut self, new: &NewInvoice) -> Result<Invoice, AppError> {
        if self.staged.invoices.values().any(|i| {
            i.invoice_number == new.invoice_number || i.pending_id == new.pending_id
        }) {
            return Err(AppError::Conflict(format!(
                "Invoice {} or pending {} already invoiced",
                new.invoice_number, new.pending_id
            )));
        }

        let invoice = Invoice {
            id: next_id(&mut self.staged.last_invoice_id),
            invoice_number: new.invoice_number.clone(),
            receipt_book: new.receipt_book.clone(),
            cae: new.cae.clone(),
            issue_date: new.issue_date,
            amount: new.amount,
            batch_id: new.batch_id,
            pending_id: new.pending_id,
            created_at: Utc::now(),
        };
        self.staged.invoices.insert(invoice.id, invoice.clone());
        Ok(invoice)
    }

    async fn complete_batch(
        &mut self,
        id: i64,
        completion: BatchCompletion,
    ) -> Result<(), AppError> {
        let batch = self
            .staged
            .batches
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("BillingBatch", id))?;
        batch.status = BatchStatus::Processed;
        batch.processing_completed_at = Some(completion.completed_at);
        batch.total_invoices = completion.total_invoices;
        batch.total_amount = completion.total_amount;
        batch.error_message = None;
        batch.updated_at = Utc::now();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryUnitOfWork { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}
