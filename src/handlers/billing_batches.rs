//! Billing batch HTTP handlers.
//!
//! This module implements the batch API:
//! - POST /api/v1/billing-batches - Submit a batch for background processing
//! - POST /api/v1/billing-batches/sync - Submit and process inline
//! - GET /api/v1/billing-batches - List batches
//! - GET /api/v1/billing-batches/queue/stats - Job counts per state
//! - GET /api/v1/billing-batches/receipt-books - Receipt books in use
//! - GET /api/v1/billing-batches/next-invoice-number/{receipt_book} - Number preview
//! - GET /api/v1/billing-batches/{id} - Batch with its invoices
//! - GET /api/v1/billing-batches/{id}/status - Batch plus job progress
//! - POST /api/v1/billing-batches/{id}/retry - Re-queue a failed batch

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use crate::{
    app::AppState,
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        billing_batch::{
            BatchCreationResult, BatchFilter, BatchStatusResponse, BatchView, BillingBatch,
            CreateBatchRequest, NextInvoiceNumberResponse, RetryResponse,
        },
        pagination::Page,
    },
    queue::QueueStats,
};

/// Submit a billing batch for asynchronous processing.
///
/// # Request Body
///
/// ```json
/// {
///   "issue_date": "2024-02-01",
///   "receipt_book": "A-0001",
///   "pending_ids": [1, 2, 3]
/// }
/// ```
///
/// # Response
///
/// - **Success (202 Accepted)**: Batch in `PENDING_PROCESSING`, no invoices yet,
///   rejected pendings in `summary.failed_pendings` and the job handle in
///   `queue_info`
/// - **Error (400)**: `empty_batch` when no pending is valid, `invalid_request`
///   for a bad receipt book
///
/// ```json
/// {
///   "batch": { "id": 7, "status": "PENDING_PROCESSING", "invoices": [], ... },
///   "summary": {
///     "total_invoices": 0,
///     "total_amount": "0",
///     "successful_pendings": 2,
///     "failed_pendings": [{ "id": 3, "reason": "Billing pending not found" }]
///   },
///   "queue_info": {
///     "job_id": "batch-7",
///     "status": "queued",
///     "message": "Batch 7 has been queued for processing. ..."
///   }
/// }
/// ```
pub async fn submit_batch(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateBatchRequest>,
) -> Result<(StatusCode, Json<BatchCreationResult>), AppError> {
    tracing::info!(
        "Batch submission for {} ({} pendings) by key {}",
        request.receipt_book,
        request.pending_ids.len(),
        auth.key_fingerprint
    );
    let result = state.batches.submit(request).await?;

    Ok((StatusCode::ACCEPTED, Json(result)))
}

/// Submit a billing batch and process it before responding.
///
/// # Response
///
/// - **Success (201 Created)**: Batch in `PROCESSED` with its invoices
/// - **Error (400)**: As for the asynchronous submission
/// - **Error (500)**: `batch_processing_error`; nothing was written except the
///   batch itself, which is left in `ERROR` and can be retried
pub async fn submit_batch_sync(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateBatchRequest>,
) -> Result<(StatusCode, Json<BatchCreationResult>), AppError> {
    tracing::info!(
        "Synchronous batch submission for {} by key {}",
        request.receipt_book,
        auth.key_fingerprint
    );
    let result = state.batches.submit_sync(request).await?;

    Ok((StatusCode::CREATED, Json(result)))
}

/// List batches, newest first.
///
/// Query parameters: `status`, `receipt_book`, `date_from`, `date_to` (issue
/// date, inclusive), `page`, `limit`.
pub async fn list_batches(
    State(state): State<AppState>,
    Query(filter): Query<BatchFilter>,
) -> Result<Json<Page<BillingBatch>>, AppError> {
    Ok(Json(state.batches.list(&filter).await?))
}

pub async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStats>, AppError> {
    Ok(Json(state.batches.queue_stats().await?))
}

pub async fn list_receipt_books(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.batches.list_receipt_books().await?))
}

/// Number the next invoice of `receipt_book` would get. Reserves nothing.
pub async fn next_invoice_number(
    State(state): State<AppState>,
    Path(receipt_book): Path<String>,
) -> Result<Json<NextInvoiceNumberResponse>, AppError> {
    Ok(Json(state.batches.next_invoice_number(&receipt_book).await?))
}

pub async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BatchView>, AppError> {
    Ok(Json(state.batches.get(id).await?))
}

/// Batch with its invoices plus the most recent job for it.
///
/// `job_info` is `null` when no job was ever queued (synchronous batches).
///
/// ```json
/// {
///   "batch": { "id": 7, "status": "IN_PROCESS", ... },
///   "job_info": {
///     "job_id": "batch-7",
///     "status": "active",
///     "progress": 40,
///     "attempts_made": 1,
///     "failed_reason": null
///   }
/// }
/// ```
pub async fn get_batch_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BatchStatusResponse>, AppError> {
    Ok(Json(state.batches.get_status(id).await?))
}

/// Re-queue a batch in `ERROR`.
///
/// # Response
///
/// - **Success (200 OK)**: `{ "message": ..., "job_id": "batch-7-retry-..." }`
/// - **Error (400)**: `invalid_state_transition` unless the batch is in `ERROR`
/// - **Error (404)**: Batch not found
pub async fn retry_batch(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<RetryResponse>, AppError> {
    tracing::info!("Retry of batch {} requested by key {}", id, auth.key_fingerprint);
    Ok(Json(state.batches.retry(id).await?))
}
