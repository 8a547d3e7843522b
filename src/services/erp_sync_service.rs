//! ERP export simulation.
//!
//! # Architecture
//!
//! - [`SyncLog`]: append-only history with its own monotonic id counter,
//!   owned by the service instance that was handed it at construction
//! - [`ErpSimulator`]: stands in for the accounting system (latency plus a
//!   configurable failure rate)
//! - [`ErpSyncService`]: builds the ERP payload from stored invoices and
//!   records every attempt in the log

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{Datelike, Utc};
use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};
use tokio::sync::Mutex;

use crate::{
    error::AppError,
    models::{
        erp::{
            AccountingEntry, ConfirmSyncResponse, ErpInvoiceData, ErpSyncResponse, ErpSyncStatus,
            ErpSyncSummary, SyncHistoryFilter, SyncHistoryItem, SyncRecord,
        },
        invoice::{InvoiceCriteria, InvoiceDetail},
        pagination::Page,
    },
    store::BillingStore,
};

/// Gross-to-net divisor for 21% VAT.
const VAT_DIVISOR: Decimal = Decimal::from_parts(121, 0, 0, false, 2);

fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Receivable, sales and VAT lines for a gross amount.
pub fn accounting_entries(amount: Decimal) -> Vec<AccountingEntry> {
    let net = amount / VAT_DIVISOR;
    vec![
        AccountingEntry {
            account_code: "1.1.3.01".to_string(),
            account_name: "Cuentas por Cobrar".to_string(),
            debit: amount,
            credit: Decimal::ZERO,
        },
        AccountingEntry {
            account_code: "4.1.1.01".to_string(),
            account_name: "Ventas de Servicios".to_string(),
            debit: Decimal::ZERO,
            credit: round_money(net),
        },
        AccountingEntry {
            account_code: "2.1.5.01".to_string(),
            account_name: "IVA Débito Fiscal".to_string(),
            debit: Decimal::ZERO,
            credit: round_money(amount - net),
        },
    ]
}

fn to_erp_format(invoice: &InvoiceDetail) -> ErpInvoiceData {
    ErpInvoiceData {
        invoice_number: invoice.invoice_number.clone(),
        cae: invoice.cae.clone(),
        issue_date: invoice.issue_date,
        amount: invoice.amount,
        customer_id: invoice.customer_id,
        service_date: invoice.service_date,
        receipt_book: invoice.receipt_book.clone(),
        batch_id: invoice.batch_id,
        accounting_entries: accounting_entries(invoice.amount),
    }
}

/// Append-only export history.
#[derive(Default)]
pub struct SyncLog {
    records: Mutex<Vec<SyncRecord>>,
    counter: AtomicU64,
}

impl SyncLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// `SYNC-{year}-{counter:06}`; the counter never repeats within a log.
    fn next_sync_id(&self, year: i32) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("SYNC-{}-{:06}", year, n)
    }

    async fn append(&self, record: SyncRecord) {
        self.records.lock().await.push(record);
    }

    async fn find(&self, sync_id: &str) -> Option<SyncRecord> {
        self.records
            .lock()
            .await
            .iter()
            .find(|r| r.sync_id == sync_id)
            .cloned()
    }

    /// Move a record from `SENT` to `CONFIRMED`.
    async fn confirm(&self, sync_id: &str) -> Result<SyncRecord, AppError> {
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|r| r.sync_id == sync_id)
            .ok_or_else(|| AppError::not_found("SyncHistory", sync_id))?;

        if record.status != ErpSyncStatus::Sent {
            return Err(AppError::ErpSync(format!(
                "Cannot confirm sync with status '{}'. Only 'SENT' syncs can be confirmed.",
                record.status
            )));
        }
        record.status = ErpSyncStatus::Confirmed;
        Ok(record.clone())
    }

    /// Matching records, newest first.
    async fn query(&self, filter: &SyncHistoryFilter) -> Vec<SyncRecord> {
        let mut matching: Vec<SyncRecord> = self
            .records
            .lock()
            .await
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching
    }
}

/// Simulated accounting system endpoint.
#[derive(Debug, Clone)]
pub struct ErpSimulator {
    failure_rate: f64,
    latency: Duration,
}

impl ErpSimulator {
    pub fn new(failure_rate: f64, latency: Duration) -> Self {
        Self {
            failure_rate,
            latency,
        }
    }

    /// Never fails and answers immediately.
    pub fn reliable() -> Self {
        Self::new(0.0, Duration::ZERO)
    }

    async fn send(&self, invoices: &[ErpInvoiceData]) -> Result<(), String> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if rand::rng().random::<f64>() < self.failure_rate {
            return Err("Simulated ERP connection timeout".to_string());
        }

        tracing::info!("Simulated ERP received {} invoices", invoices.len());
        Ok(())
    }
}

pub struct ErpSyncService {
    store: Arc<dyn BillingStore>,
    log: Arc<SyncLog>,
    erp: ErpSimulator,
}

impl ErpSyncService {
    pub fn new(store: Arc<dyn BillingStore>, log: Arc<SyncLog>, erp: ErpSimulator) -> Self {
        Self { store, log, erp }
    }

    async fn load_invoices(&self, invoice_ids: &[i64]) -> Result<Vec<InvoiceDetail>, AppError> {
        let invoices = self
            .store
            .find_invoices(&InvoiceCriteria::ids(invoice_ids))
            .await?;

        if invoices.is_empty() {
            let ids: Vec<String> = invoice_ids.iter().map(i64::to_string).collect();
            return Err(AppError::not_found("Invoices", ids.join(", ")));
        }
        Ok(invoices)
    }

    /// ERP payload for the given invoices, without sending anything.
    pub async fn preview(&self, invoice_ids: &[i64]) -> Result<Vec<ErpInvoiceData>, AppError> {
        let invoices = self.load_invoices(invoice_ids).await?;
        Ok(invoices.iter().map(to_erp_format).collect())
    }

    /// Send invoices to the ERP and record the attempt.
    ///
    /// A simulated ERP failure is not an error for the caller: it is recorded
    /// with status `ERROR` and reported in the response.
    ///
    /// # Errors
    ///
    /// - `NotFound`: None of the ids exist
    pub async fn sync_invoices(&self, invoice_ids: &[i64]) -> Result<ErpSyncResponse, AppError> {
        tracing::info!("Starting ERP sync for {} invoices", invoice_ids.len());

        let invoices = self.load_invoices(invoice_ids).await?;
        let data: Vec<ErpInvoiceData> = invoices.iter().map(to_erp_format).collect();
        let total_amount = round_money(data.iter().map(|d| d.amount).sum());

        let result = self.erp.send(&data).await;

        let timestamp = Utc::now();
        let sync_id = self.log.next_sync_id(timestamp.year());
        let (status, error_message) = match &result {
            Ok(()) => (ErpSyncStatus::Sent, None),
            Err(reason) => (ErpSyncStatus::Error, Some(reason.clone())),
        };

        self.log
            .append(SyncRecord {
                sync_id: sync_id.clone(),
                status,
                timestamp,
                invoice_ids: invoices.iter().map(|i| i.id).collect(),
                total_amount,
                error_message: error_message.clone(),
            })
            .await;

        tracing::info!("ERP sync {} finished with status {}", sync_id, status);

        Ok(ErpSyncResponse {
            sync_id,
            status,
            timestamp,
            summary: ErpSyncSummary {
                total_invoices: data.len(),
                total_amount,
                success: result.is_ok(),
                message: match error_message {
                    None => "Data successfully sent to ERP system".to_string(),
                    Some(reason) => format!("Sync failed: {}", reason),
                },
            },
            data,
        })
    }

    /// Sync every invoice of a batch.
    ///
    /// # Errors
    ///
    /// - `NotFound`: Batch doesn't exist
    /// - `ErpSync`: Batch has no invoices
    pub async fn sync_batch(&self, batch_id: i64) -> Result<ErpSyncResponse, AppError> {
        self.store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| AppError::not_found("BillingBatch", batch_id))?;

        let invoices = self
            .store
            .find_invoices(&InvoiceCriteria::batch(batch_id))
            .await?;
        if invoices.is_empty() {
            return Err(AppError::ErpSync(
                "Batch has no invoices to sync".to_string(),
            ));
        }

        let ids: Vec<i64> = invoices.iter().map(|i| i.id).collect();
        self.sync_invoices(&ids).await
    }

    pub async fn history(&self, filter: &SyncHistoryFilter) -> Page<SyncHistoryItem> {
        let records = self.log.query(filter).await;
        let page = Page::from_vec(records, filter.page_params());
        Page {
            data: page.data.into_iter().map(Into::into).collect(),
            total: page.total,
            page: page.page,
            limit: page.limit,
            total_pages: page.total_pages,
        }
    }

    /// A past export with its payload rebuilt from the current invoices.
    pub async fn detail(&self, sync_id: &str) -> Result<ErpSyncResponse, AppError> {
        let record = self
            .log
            .find(sync_id)
            .await
            .ok_or_else(|| AppError::not_found("SyncHistory", sync_id))?;

        let invoices = self
            .store
            .find_invoices(&InvoiceCriteria::ids(&record.invoice_ids))
            .await?;
        let data: Vec<ErpInvoiceData> = invoices.iter().map(to_erp_format).collect();
        let success = record.status != ErpSyncStatus::Error;

        Ok(ErpSyncResponse {
            sync_id: record.sync_id,
            status: record.status,
            timestamp: record.timestamp,
            summary: ErpSyncSummary {
                total_invoices: data.len(),
                total_amount: record.total_amount,
                success,
                message: if success {
                    "Data successfully sent to ERP system".to_string()
                } else {
                    record
                        .error_message
                        .unwrap_or_else(|| "Sync failed".to_string())
                },
            },
            data,
        })
    }

    /// Acknowledge that the ERP booked a `SENT` export.
    pub async fn confirm(&self, sync_id: &str) -> Result<ConfirmSyncResponse, AppError> {
        let record = self.log.confirm(sync_id).await?;
        tracing::info!("Sync {} confirmed", sync_id);

        Ok(ConfirmSyncResponse {
            sync_id: record.sync_id,
            status: record.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_split_vat_out_of_gross_amount() {
        let entries = accounting_entries(Decimal::new(12100, 2));
        assert_eq!(entries[0].debit, Decimal::new(12100, 2));
        assert_eq!(entries[1].credit, Decimal::new(10000, 2));
        assert_eq!(entries[2].credit, Decimal::new(2100, 2));
    }

    #[test]
    fn entries_round_half_away_from_zero() {
        // 100 / 1.21 = 82.6446..., VAT 17.3553...
        let entries = accounting_entries(Decimal::new(10000, 2));
        assert_eq!(entries[1].credit, Decimal::new(8264, 2));
        assert_eq!(entries[2].credit, Decimal::new(1736, 2));
    }

    #[test]
    fn sync_ids_are_monotonic_per_log() {
        let log = SyncLog::new();
        assert_eq!(log.next_sync_id(2024), "SYNC-2024-000001");
        assert_eq!(log.next_sync_id(2024), "SYNC-2024-000002");

        let other = SyncLog::new();
        assert_eq!(other.next_sync_id(2024), "SYNC-2024-000001");
    }
}
