//! Billing pending data models.
//!
//! A billing pending marks a service as ready to invoice. It is created by
//! "send to billing", consumed by batch processing, and can be cancelled while
//! still `PENDING`.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{pagination::PageParams, service::Service};

/// Lifecycle status of a billing pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "pending_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingStatus {
    Pending,
    Invoiced,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingStatus::Pending => "PENDING",
            PendingStatus::Invoiced => "INVOICED",
        }
    }
}

impl fmt::Display for PendingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a billing pending record from the database.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct BillingPending {
    pub id: i64,

    /// Service to invoice (unique: one pending per service)
    pub service_id: i64,

    pub status: PendingStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A pending together with its linked service.
///
/// The service is optional because the validator must cope with a dangling link.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingWithService {
    #[serde(flatten)]
    pub pending: BillingPending,

    pub service: Option<Service>,
}

/// Query parameters for listing pendings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PendingFilter {
    pub status: Option<PendingStatus>,
    pub customer_id: Option<i64>,

    /// Filters on the linked service's date
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,

    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PendingFilter {
    pub fn page_params(&self) -> PageParams {
        PageParams::new(self.page, self.limit)
    }

    pub fn matches(&self, item: &PendingWithService) -> bool {
        let service = item.service.as_ref();
        self.status.is_none_or(|s| item.pending.status == s)
            && self
                .customer_id
                .is_none_or(|c| service.is_some_and(|svc| svc.customer_id == c))
            && self
                .date_from
                .is_none_or(|d| service.is_some_and(|svc| svc.service_date >= d))
            && self
                .date_to
                .is_none_or(|d| service.is_some_and(|svc| svc.service_date <= d))
    }
}

/// Per-customer count and amount.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerTotal {
    pub customer_id: i64,
    pub count: i64,
    pub total_amount: Decimal,
}

/// Summary of everything still waiting to be invoiced.
#[derive(Debug, Serialize)]
pub struct PendingSummary {
    pub total_pending: i64,
    pub total_amount: Decimal,
    pub by_customer: Vec<CustomerTotal>,
}
