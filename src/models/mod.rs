//! Data models representing database entities and API payloads.
//!
//! Entity structs map to database tables; request/filter/response structs
//! describe the JSON exchanged over HTTP.

/// Billing batch model and submission payloads
pub mod billing_batch;
/// Billing pending model
pub mod billing_pending;
/// ERP export payloads and history
pub mod erp;
/// Invoice model
pub mod invoice;
/// Page request and envelope
pub mod pagination;
/// Service model
pub mod service;
