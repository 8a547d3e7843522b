//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They own validation, units of work and state transitions; handlers only
//! translate between HTTP and these functions.

pub mod batch_processor;
pub mod billing_batch_service;
pub mod billing_pending_service;
pub mod erp_sync_service;
pub mod invoice_numbers;
pub mod invoice_service;
pub mod pending_validator;
pub mod service_records;
