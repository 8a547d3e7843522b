//! Service data models and API request/response types.
//!
//! A service is a unit of work rendered to a customer. It moves forward through
//! `CREATED → SENT_TO_BILL → INVOICED` and can only be edited or deleted while
//! still `CREATED`.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{billing_pending::BillingPending, pagination::PageParams};

/// Lifecycle status of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "service_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Created,
    SentToBill,
    Invoiced,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Created => "CREATED",
            ServiceStatus::SentToBill => "SENT_TO_BILL",
            ServiceStatus::Invoiced => "INVOICED",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a service record from the database.
///
/// # Database Table
///
/// Maps to the `services` table. Amounts are `NUMERIC(12,2)` and always positive.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct Service {
    pub id: i64,

    /// Date the service was rendered
    pub service_date: NaiveDate,

    pub customer_id: i64,

    /// Amount to bill, two decimal places
    pub amount: Decimal,

    pub status: ServiceStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert a service.
#[derive(Debug, Clone)]
pub struct NewService {
    pub service_date: NaiveDate,
    pub customer_id: i64,
    pub amount: Decimal,
}

/// Request body for creating a service.
///
/// # JSON Example
///
/// ```json
/// {
///   "service_date": "2024-01-15",
///   "customer_id": 1001,
///   "amount": "1500.50"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub service_date: NaiveDate,
    pub customer_id: i64,
    pub amount: Decimal,
}

/// Request body for updating a service. Absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateServiceRequest {
    pub service_date: Option<NaiveDate>,
    pub customer_id: Option<i64>,
    pub amount: Option<Decimal>,
}

/// Query parameters for listing services.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceFilter {
    pub customer_id: Option<i64>,
    pub status: Option<ServiceStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ServiceFilter {
    pub fn page_params(&self) -> PageParams {
        PageParams::new(self.page, self.limit)
    }

    /// In-memory equivalent of the SQL `WHERE` clause.
    pub fn matches(&self, service: &Service) -> bool {
        self.customer_id.is_none_or(|c| service.customer_id == c)
            && self.status.is_none_or(|s| service.status == s)
            && self.date_from.is_none_or(|d| service.service_date >= d)
            && self.date_to.is_none_or(|d| service.service_date <= d)
    }
}

/// Request body for `POST /api/v1/services/send-to-billing`.
#[derive(Debug, Deserialize)]
pub struct SendToBillingRequest {
    pub service_ids: Vec<i64>,
}

/// A requested id that was not accepted, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedItem {
    pub id: i64,
    pub reason: String,
}

impl RejectedItem {
    pub fn new(id: i64, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }
}

/// Result of sending services to billing.
#[derive(Debug, Serialize)]
pub struct SendToBillingResponse {
    /// Services that now have a billing pending
    pub success: Vec<i64>,

    /// Services that were skipped, with the reason
    pub failed: Vec<RejectedItem>,

    /// Pendings created by this call
    pub pendings: Vec<BillingPending>,
}
