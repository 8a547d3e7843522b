//! Invoice data models.
//!
//! Invoices are append-only. Each one carries a number of the form
//! `{receipt_book}-{8-digit sequence}` that is unique across the store.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{billing_pending::CustomerTotal, pagination::PageParams};

/// Represents an invoice record from the database.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct Invoice {
    pub id: i64,
    pub invoice_number: String,
    pub receipt_book: String,

    /// Simulated 14-character authorization code
    pub cae: String,

    pub issue_date: NaiveDate,
    pub amount: Decimal,
    pub batch_id: i64,
    pub pending_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Fields required to insert an invoice.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub invoice_number: String,
    pub receipt_book: String,
    pub cae: String,
    pub issue_date: NaiveDate,
    pub amount: Decimal,
    pub batch_id: i64,
    pub pending_id: i64,
}

/// Invoice joined with the customer and service it bills.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct InvoiceDetail {
    pub id: i64,
    pub invoice_number: String,
    pub receipt_book: String,
    pub cae: String,
    pub issue_date: NaiveDate,
    pub amount: Decimal,
    pub batch_id: i64,
    pub pending_id: i64,
    pub created_at: DateTime<Utc>,
    pub service_id: Option<i64>,
    pub customer_id: Option<i64>,
    pub service_date: Option<NaiveDate>,
}

/// Query parameters for listing invoices.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceFilter {
    pub batch_id: Option<i64>,
    pub customer_id: Option<i64>,

    /// Partial, case-insensitive match on the invoice number
    pub invoice_number: Option<String>,

    /// Filters on issue date
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,

    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,

    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl InvoiceFilter {
    pub fn page_params(&self) -> PageParams {
        PageParams::new(self.page, self.limit)
    }

    pub fn matches(&self, invoice: &InvoiceDetail) -> bool {
        self.batch_id.is_none_or(|b| invoice.batch_id == b)
            && self.customer_id.is_none_or(|c| invoice.customer_id == Some(c))
            && self.invoice_number.as_deref().is_none_or(|n| {
                invoice
                    .invoice_number
                    .to_lowercase()
                    .contains(&n.to_lowercase())
            })
            && self.date_from.is_none_or(|d| invoice.issue_date >= d)
            && self.date_to.is_none_or(|d| invoice.issue_date <= d)
            && self.min_amount.is_none_or(|a| invoice.amount >= a)
            && self.max_amount.is_none_or(|a| invoice.amount <= a)
    }
}

/// Unpaginated invoice selection used by grouping queries.
#[derive(Debug, Clone, Default)]
pub struct InvoiceCriteria {
    pub ids: Option<Vec<i64>>,
    pub batch_id: Option<i64>,
    pub customer_id: Option<i64>,
}

impl InvoiceCriteria {
    pub fn ids(ids: &[i64]) -> Self {
        Self {
            ids: Some(ids.to_vec()),
            ..Default::default()
        }
    }

    pub fn batch(batch_id: i64) -> Self {
        Self {
            batch_id: Some(batch_id),
            ..Default::default()
        }
    }

    pub fn customer(customer_id: i64) -> Self {
        Self {
            customer_id: Some(customer_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, invoice: &InvoiceDetail) -> bool {
        self.ids.as_ref().is_none_or(|ids| ids.contains(&invoice.id))
            && self.batch_id.is_none_or(|b| invoice.batch_id == b)
            && self.customer_id.is_none_or(|c| invoice.customer_id == Some(c))
    }
}

/// Count and amount for one `YYYY-MM` month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthTotal {
    pub month: String,
    pub count: i64,
    pub total_amount: Decimal,
}

/// Response body for `GET /api/v1/invoices/statistics`.
#[derive(Debug, Serialize)]
pub struct InvoiceStatistics {
    pub total_invoices: i64,
    pub total_amount: Decimal,
    pub average_amount: Decimal,
    pub by_month: Vec<MonthTotal>,
    pub by_customer: Vec<CustomerTotal>,
}
