//! Billing batch data models and API request/response types.
//!
//! # State Machine
//!
//! ```text
//! PENDING_PROCESSING → IN_PROCESS → PROCESSED
//!                                 ↘ ERROR → (retry) → PENDING_PROCESSING
//! ```
//!
//! The synchronous path goes straight from `PENDING_PROCESSING` to
//! `PROCESSED` or `ERROR`.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    models::{invoice::InvoiceDetail, pagination::PageParams, service::RejectedItem},
    queue::JobInfo,
};

/// Maximum length of a receipt book identifier.
pub const RECEIPT_BOOK_MAX_LEN: usize = 50;

/// Lifecycle status of a billing batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "batch_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    PendingProcessing,
    InProcess,
    Processed,
    Error,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::PendingProcessing => "PENDING_PROCESSING",
            BatchStatus::InProcess => "IN_PROCESS",
            BatchStatus::Processed => "PROCESSED",
            BatchStatus::Error => "ERROR",
        }
    }

    /// Only failed batches may be re-queued.
    pub fn can_retry(&self) -> bool {
        matches!(self, BatchStatus::Error)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a billing batch record from the database.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct BillingBatch {
    pub id: i64,
    pub issue_date: NaiveDate,
    pub receipt_book: String,
    pub status: BatchStatus,

    /// Set while the batch is in `ERROR`
    pub error_message: Option<String>,

    /// Pending ids as originally requested (re-validated on every attempt)
    pub pending_ids: Vec<i64>,

    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,

    pub total_invoices: i32,
    pub total_amount: Decimal,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert a batch.
#[derive(Debug, Clone)]
pub struct NewBillingBatch {
    pub issue_date: NaiveDate,
    pub receipt_book: String,
    pub pending_ids: Vec<i64>,
}

/// Request body for submitting a batch.
///
/// # JSON Example
///
/// ```json
/// {
///   "issue_date": "2024-01-31",
///   "receipt_book": "A-0001",
///   "pending_ids": [1, 2, 3]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBatchRequest {
    pub issue_date: NaiveDate,
    pub receipt_book: String,

    #[serde(default)]
    pub pending_ids: Vec<i64>,
}

/// Query parameters for listing batches.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchFilter {
    pub status: Option<BatchStatus>,
    pub receipt_book: Option<String>,

    /// Filters on issue date
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,

    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl BatchFilter {
    pub fn page_params(&self) -> PageParams {
        PageParams::new(self.page, self.limit)
    }

    pub fn matches(&self, batch: &BillingBatch) -> bool {
        self.status.is_none_or(|s| batch.status == s)
            && self
                .receipt_book
                .as_deref()
                .is_none_or(|rb| batch.receipt_book == rb)
            && self.date_from.is_none_or(|d| batch.issue_date >= d)
            && self.date_to.is_none_or(|d| batch.issue_date <= d)
    }
}

/// A batch together with the invoices it produced.
#[derive(Debug, Clone, Serialize)]
pub struct BatchView {
    #[serde(flatten)]
    pub batch: BillingBatch,

    pub invoices: Vec<InvoiceDetail>,
}

/// Per-submission accounting of what was invoiced and what was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_invoices: i64,
    pub total_amount: Decimal,
    pub successful_pendings: Vec<i64>,
    pub failed_pendings: Vec<RejectedItem>,
}

/// Queue handle returned by asynchronous submission.
#[derive(Debug, Clone, Serialize)]
pub struct QueueInfo {
    pub job_id: String,
    pub status: String,
    pub message: String,
}

/// Response body for batch submission (both variants).
#[derive(Debug, Serialize)]
pub struct BatchCreationResult {
    pub batch: BatchView,
    pub summary: BatchSummary,

    /// Present only for asynchronous submissions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_info: Option<QueueInfo>,
}

/// Response body for `GET /api/v1/billing-batches/{id}/status`.
#[derive(Debug, Serialize)]
pub struct BatchStatusResponse {
    pub batch: BatchView,
    pub job_info: Option<JobInfo>,
}

/// Response body for `POST /api/v1/billing-batches/{id}/retry`.
#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub message: String,
    pub job_id: String,
}

/// Response body for the invoice number preview.
#[derive(Debug, Serialize)]
pub struct NextInvoiceNumberResponse {
    pub receipt_book: String,
    pub next_number: String,
}

/// What one processing run did to a batch; stored as the job result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub batch_id: i64,

    #[serde(flatten)]
    pub summary: BatchSummary,

    /// True when the batch had already been processed by an earlier job
    #[serde(default)]
    pub already_processed: bool,
}
