//! Batch processor - turns the pendings of a batch into invoices.
//!
//! # Process
//!
//! Everything below runs inside ONE unit of work:
//!
//! 1. Lock the batch row (a batch that is already `PROCESSED` is left alone)
//! 2. Re-validate the pendings with row locks
//! 3. Lock the receipt book and read the last issued number
//! 4. For each valid pending, in order: allocate a number, create the
//!    invoice, mark the pending and its service `INVOICED`, report progress
//! 5. Stamp the batch `PROCESSED` with its totals and commit
//!
//! # Errors
//!
//! Any failure rolls the unit back, so no invoice, pending or service change
//! survives, and the batch is then marked `ERROR` with the failure detail.
//! The error is returned as `BatchProcessing` so the caller (sync request or
//! queue worker) can surface it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use crate::{
    error::AppError,
    models::{
        billing_batch::{BatchOutcome, BatchStatus, BatchSummary},
        billing_pending::PendingStatus,
        invoice::NewInvoice,
        service::ServiceStatus,
    },
    services::{
        invoice_numbers::{InvoiceSequence, generate_cae},
        pending_validator,
    },
    store::{BatchCompletion, BillingStore, UnitOfWork},
};

/// Receives progress (0-100) while a batch is being processed.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, percent: u8);
}

/// Reporter for callers that do not track progress.
pub struct NoProgress;

#[async_trait]
impl ProgressReporter for NoProgress {
    async fn report(&self, _percent: u8) {}
}

/// Share of `total` items done after `done` of them, rounded to the nearest percent.
pub fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100 + total / 2) / total).min(100) as u8
}

pub struct BatchProcessor {
    store: Arc<dyn BillingStore>,
}

impl BatchProcessor {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Process a batch as a single all-or-nothing unit.
    ///
    /// # Arguments
    ///
    /// * `batch_id` - Batch to process
    /// * `pending_ids` - Pendings requested for the batch (re-validated here)
    /// * `progress` - Receives progress after each invoice
    ///
    /// # Returns
    ///
    /// What was invoiced and what was rejected.
    ///
    /// # Errors
    ///
    /// - `NotFound`: The batch does not exist (nothing is written)
    /// - `BatchProcessing`: Processing failed; the batch is now `ERROR`
    pub async fn process(
        &self,
        batch_id: i64,
        pending_ids: &[i64],
        progress: &dyn ProgressReporter,
    ) -> Result<BatchOutcome, AppError> {
        let mut uow = self.store.begin().await?;

        let result = self
            .process_in_unit(uow.as_mut(), batch_id, pending_ids, progress)
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(AppError::NotFound { entity, id }) if entity == "BillingBatch" => {
                uow.rollback().await?;
                return Err(AppError::NotFound { entity, id });
            }
            Err(err) => {
                if let Err(rollback_err) = uow.rollback().await {
                    tracing::error!("Rollback of batch {} failed: {}", batch_id, rollback_err);
                }
                return Err(self.record_failure(batch_id, err).await);
            }
        };

        // Commit all changes atomically
        if let Err(err) = uow.commit().await {
            return Err(self.record_failure(batch_id, err).await);
        }

        tracing::info!(
            batch_id,
            total_invoices = outcome.summary.total_invoices,
            total_amount = %outcome.summary.total_amount,
            "Batch processed"
        );
        Ok(outcome)
    }

    async fn process_in_unit(
        &self,
        uow: &mut dyn UnitOfWork,
        batch_id: i64,
        pending_ids: &[i64],
        progress: &dyn ProgressReporter,
    ) -> Result<BatchOutcome, AppError> {
        // Lock the batch so duplicate jobs for it run one after the other
        let batch = uow
            .lock_batch(batch_id)
            .await?
            .ok_or_else(|| AppError::not_found("BillingBatch", batch_id))?;

        if batch.status == BatchStatus::Processed {
            tracing::info!("Batch {} already processed, skipping", batch_id);
            return Ok(BatchOutcome {
                batch_id,
                summary: BatchSummary {
                    total_invoices: i64::from(batch.total_invoices),
                    total_amount: batch.total_amount,
                    successful_pendings: Vec::new(),
                    failed_pendings: Vec::new(),
                },
                already_processed: true,
            });
        }

        // Re-validate: pendings may have been cancelled or invoiced since submission
        let found = uow.lock_pendings(pending_ids).await?;
        let validation = pending_validator::partition(pending_ids, found);

        if validation.valid.is_empty() {
            return Err(AppError::BusinessRule(
                "No valid pendings to process".to_string(),
            ));
        }

        // Serialize numbering for this receipt book until commit
        uow.lock_receipt_book(&batch.receipt_book).await?;
        let last_number = uow.last_invoice_number(&batch.receipt_book).await?;
        let mut sequence =
            InvoiceSequence::starting_after(&batch.receipt_book, last_number.as_deref());

        let total = validation.valid.len();
        let mut total_amount = Decimal::ZERO;
        let mut successful = Vec::with_capacity(total);

        for (index, item) in validation.valid.iter().enumerate() {
            let invoice = uow
                .insert_invoice(&NewInvoice {
                    invoice_number: sequence.allocate(),
                    receipt_book: batch.receipt_book.clone(),
                    cae: generate_cae(),
                    issue_date: batch.issue_date,
                    amount: item.service.amount,
                    batch_id,
                    pending_id: item.pending_id,
                })
                .await?;

            uow.set_pending_status(item.pending_id, PendingStatus::Invoiced)
                .await?;
            uow.set_service_status(item.service.id, ServiceStatus::Invoiced)
                .await?;

            total_amount += invoice.amount;
            successful.push(item.pending_id);
            progress.report(progress_percent(index + 1, total)).await;
        }

        let total_amount = total_amount.round_dp(2);
        uow.complete_batch(
            batch_id,
            BatchCompletion {
                total_invoices: total as i32,
                total_amount,
                completed_at: Utc::now(),
            },
        )
        .await?;

        Ok(BatchOutcome {
            batch_id,
            summary: BatchSummary {
                total_invoices: total as i64,
                total_amount,
                successful_pendings: successful,
                failed_pendings: validation.invalid,
            },
            already_processed: false,
        })
    }

    /// Mark the batch `ERROR` after a rollback and wrap the cause.
    async fn record_failure(&self, batch_id: i64, err: AppError) -> AppError {
        let detail = err.to_string();
        tracing::error!("Batch {} failed: {}", batch_id, detail);

        if let Err(mark_err) = self
            .store
            .mark_batch_error(batch_id, &detail, Utc::now())
            .await
        {
            tracing::error!("Could not mark batch {} as ERROR: {}", batch_id, mark_err);
        }

        AppError::BatchProcessing {
            message: format!("Failed to process billing batch {}", batch_id),
            detail: Some(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_rounded_and_bounded() {
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(3, 3), 100);
        assert_eq!(progress_percent(0, 0), 100);
    }
}
