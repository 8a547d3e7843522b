//! ERP export data models.
//!
//! The accounting system integration is simulated; these types describe the
//! payload that would be sent and the history kept about each export.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::pagination::PageParams;

/// Status of one ERP export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErpSyncStatus {
    Pending,
    Sent,
    Confirmed,
    Error,
}

impl ErpSyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErpSyncStatus::Pending => "PENDING",
            ErpSyncStatus::Sent => "SENT",
            ErpSyncStatus::Confirmed => "CONFIRMED",
            ErpSyncStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for ErpSyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the journal entry generated for an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountingEntry {
    pub account_code: String,
    pub account_name: String,
    pub debit: Decimal,
    pub credit: Decimal,
}

/// Invoice in the shape the accounting system expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErpInvoiceData {
    pub invoice_number: String,
    pub cae: String,
    pub issue_date: NaiveDate,
    pub amount: Decimal,
    pub customer_id: Option<i64>,
    pub service_date: Option<NaiveDate>,
    pub receipt_book: String,
    pub batch_id: i64,
    pub accounting_entries: Vec<AccountingEntry>,
}

/// One entry of the export history.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRecord {
    pub sync_id: String,
    pub status: ErpSyncStatus,
    pub timestamp: DateTime<Utc>,
    pub invoice_ids: Vec<i64>,
    pub total_amount: Decimal,
    pub error_message: Option<String>,
}

/// Request body for syncing or previewing invoices.
#[derive(Debug, Deserialize)]
pub struct SyncInvoicesRequest {
    pub invoice_ids: Vec<i64>,
}

/// Request body for syncing a whole batch.
#[derive(Debug, Deserialize)]
pub struct SyncBatchRequest {
    pub batch_id: i64,
}

#[derive(Debug, Serialize)]
pub struct ErpSyncSummary {
    pub total_invoices: usize,
    pub total_amount: Decimal,
    pub success: bool,
    pub message: String,
}

/// Response body for an export attempt or an export detail.
#[derive(Debug, Serialize)]
pub struct ErpSyncResponse {
    pub sync_id: String,
    pub status: ErpSyncStatus,
    pub timestamp: DateTime<Utc>,
    pub data: Vec<ErpInvoiceData>,
    pub summary: ErpSyncSummary,
}

/// One row of the export history listing.
#[derive(Debug, Serialize)]
pub struct SyncHistoryItem {
    pub sync_id: String,
    pub status: ErpSyncStatus,
    pub timestamp: DateTime<Utc>,
    pub invoice_count: usize,
    pub total_amount: Decimal,
    pub error_message: Option<String>,
}

impl From<SyncRecord> for SyncHistoryItem {
    fn from(record: SyncRecord) -> Self {
        Self {
            sync_id: record.sync_id,
            status: record.status,
            timestamp: record.timestamp,
            invoice_count: record.invoice_ids.len(),
            total_amount: record.total_amount,
            error_message: record.error_message,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConfirmSyncResponse {
    pub sync_id: String,
    pub status: ErpSyncStatus,
}

/// Query parameters for the export history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncHistoryFilter {
    pub status: Option<ErpSyncStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl SyncHistoryFilter {
    pub fn page_params(&self) -> PageParams {
        PageParams::new(self.page, self.limit)
    }

    /// Date bounds are inclusive whole days.
    pub fn matches(&self, record: &SyncRecord) -> bool {
        let day = record.timestamp.date_naive();
        self.status.is_none_or(|s| record.status == s)
            && self.date_from.is_none_or(|d| day >= d)
            && self.date_to.is_none_or(|d| day <= d)
    }
}
