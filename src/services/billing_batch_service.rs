//! Billing batch service - submission, status, retry and lookups.
//!
//! Asynchronous submission is the general case: the batch row is created and
//! a job is queued for the worker. Synchronous submission runs the same
//! processing step inline and returns its result.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::{
    error::AppError,
    models::{
        billing_batch::{
            BatchCreationResult, BatchFilter, BatchStatus, BatchStatusResponse, BatchSummary,
            BatchView, BillingBatch, CreateBatchRequest, NewBillingBatch,
            NextInvoiceNumberResponse, QueueInfo, RetryResponse,
        },
        invoice::InvoiceCriteria,
        pagination::Page,
    },
    queue::{BatchJobPayload, JobInfo, JobOptions, JobQueue, QueueStats, batch_job_key, retry_job_key},
    services::{
        batch_processor::{BatchProcessor, NoProgress},
        invoice_numbers::{self, validate_receipt_book},
        pending_validator::{self, PendingValidation},
    },
    store::BillingStore,
};

pub struct BillingBatchService {
    store: Arc<dyn BillingStore>,
    queue: Arc<dyn JobQueue>,
    processor: Arc<BatchProcessor>,
    job_options: JobOptions,
}

impl BillingBatchService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        queue: Arc<dyn JobQueue>,
        processor: Arc<BatchProcessor>,
        job_options: JobOptions,
    ) -> Self {
        Self {
            store,
            queue,
            processor,
            job_options,
        }
    }

    /// Validate a submission and create its batch row.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest`: Receipt book is empty or too long
    /// - `EmptyBatch`: No pending ids, or none of them is valid (nothing is written)
    async fn create_batch(
        &self,
        request: &CreateBatchRequest,
    ) -> Result<(BillingBatch, PendingValidation), AppError> {
        validate_receipt_book(&request.receipt_book)?;

        if request.pending_ids.is_empty() {
            return Err(AppError::EmptyBatch);
        }

        let validation =
            pending_validator::validate(self.store.as_ref(), &request.pending_ids).await?;
        if validation.valid.is_empty() {
            tracing::warn!(
                "Rejected batch for {}: none of {} pendings is valid",
                request.receipt_book,
                request.pending_ids.len()
            );
            return Err(AppError::EmptyBatch);
        }

        let batch = self
            .store
            .insert_batch(NewBillingBatch {
                issue_date: request.issue_date,
                receipt_book: request.receipt_book.clone(),
                pending_ids: request.pending_ids.clone(),
            })
            .await?;

        Ok((batch, validation))
    }

    /// Create a batch and queue it for background processing.
    ///
    /// The response carries zero invoices; rejected pendings are reported
    /// immediately and the queue handle tells the caller where to poll.
    pub async fn submit(&self, request: CreateBatchRequest) -> Result<BatchCreationResult, AppError> {
        let (batch, validation) = self.create_batch(&request).await?;

        let key = batch_job_key(batch.id);
        let job = self
            .queue
            .enqueue(
                &key,
                &BatchJobPayload {
                    batch_id: batch.id,
                    pending_ids: batch.pending_ids.clone(),
                },
                &self.job_options,
            )
            .await?;

        tracing::info!(
            "Batch {} queued as job {} ({} valid, {} rejected)",
            batch.id,
            job.job_key,
            validation.valid.len(),
            validation.invalid.len()
        );

        let batch_id = batch.id;
        Ok(BatchCreationResult {
            batch: BatchView {
                batch,
                invoices: Vec::new(),
            },
            summary: BatchSummary {
                total_invoices: 0,
                total_amount: Decimal::ZERO,
                successful_pendings: Vec::new(),
                failed_pendings: validation.invalid,
            },
            queue_info: Some(QueueInfo {
                job_id: job.job_key,
                status: "queued".to_string(),
                message: format!(
                    "Batch {id} has been queued for processing. Check status at GET /api/v1/billing-batches/{id}/status",
                    id = batch_id
                ),
            }),
        })
    }

    /// Create a batch and process it before returning.
    ///
    /// # Errors
    ///
    /// - `EmptyBatch`: As for [`submit`](Self::submit)
    /// - `BatchProcessing`: Processing failed and was rolled back; the batch is `ERROR`
    pub async fn submit_sync(
        &self,
        request: CreateBatchRequest,
    ) -> Result<BatchCreationResult, AppError> {
        let (batch, _) = self.create_batch(&request).await?;

        let outcome = self
            .processor
            .process(batch.id, &batch.pending_ids, &NoProgress)
            .await?;

        Ok(BatchCreationResult {
            batch: self.get(batch.id).await?,
            summary: outcome.summary,
            queue_info: None,
        })
    }

    /// Batch with its invoices.
    pub async fn get(&self, batch_id: i64) -> Result<BatchView, AppError> {
        let batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| AppError::not_found("BillingBatch", batch_id))?;
        let invoices = self
            .store
            .find_invoices(&InvoiceCriteria::batch(batch_id))
            .await?;

        Ok(BatchView { batch, invoices })
    }

    pub async fn list(&self, filter: &BatchFilter) -> Result<Page<BillingBatch>, AppError> {
        self.store.list_batches(filter).await
    }

    /// Batch plus the state of its most recent job.
    pub async fn get_status(&self, batch_id: i64) -> Result<BatchStatusResponse, AppError> {
        let batch = self.get(batch_id).await?;
        let job_info = self
            .queue
            .latest_for_batch(batch_id)
            .await?
            .as_ref()
            .map(JobInfo::from);

        Ok(BatchStatusResponse { batch, job_info })
    }

    /// Re-queue a batch that ended in `ERROR`.
    ///
    /// # Errors
    ///
    /// - `NotFound`: Batch does not exist
    /// - `InvalidStateTransition`: Batch is not in `ERROR` (nothing changes)
    pub async fn retry(&self, batch_id: i64) -> Result<RetryResponse, AppError> {
        let batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| AppError::not_found("BillingBatch", batch_id))?;

        let rejected = |status: BatchStatus| AppError::InvalidStateTransition {
            entity: "BillingBatch",
            from: status.to_string(),
            to: BatchStatus::PendingProcessing.to_string(),
        };

        if !batch.status.can_retry() {
            return Err(rejected(batch.status));
        }

        // Conditional reset: a concurrent retry may have won the race
        let batch = match self.store.reset_batch_for_retry(batch_id).await? {
            Some(batch) => batch,
            None => {
                let current = self
                    .store
                    .get_batch(batch_id)
                    .await?
                    .map_or(batch.status, |b| b.status);
                return Err(rejected(current));
            }
        };

        let key = retry_job_key(batch_id, Utc::now());
        let job = self
            .queue
            .enqueue(
                &key,
                &BatchJobPayload {
                    batch_id,
                    pending_ids: batch.pending_ids.clone(),
                },
                &self.job_options,
            )
            .await?;

        tracing::info!("Batch {} queued for retry as job {}", batch_id, job.job_key);

        Ok(RetryResponse {
            message: format!("Batch {} has been queued for retry", batch_id),
            job_id: job.job_key,
        })
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, AppError> {
        self.queue.stats().await
    }

    /// Preview of the next number for a receipt book. Reserves nothing.
    pub async fn next_invoice_number(
        &self,
        receipt_book: &str,
    ) -> Result<NextInvoiceNumberResponse, AppError> {
        let next_number =
            invoice_numbers::next_invoice_number(self.store.as_ref(), receipt_book).await?;

        Ok(NextInvoiceNumberResponse {
            receipt_book: receipt_book.to_string(),
            next_number,
        })
    }

    pub async fn list_receipt_books(&self) -> Result<Vec<String>, AppError> {
        self.store.list_receipt_books().await
    }
}
