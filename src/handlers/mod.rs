//! HTTP request handlers (route handlers).
//!
//! Each handler extracts request data (JSON body, path, query), delegates to
//! a service and returns JSON. Errors are rendered by [`crate::error::AppError`].

/// Billing batch submission, status and retry
pub mod billing_batches;

/// Billing pending administration
pub mod billing_pendings;

/// ERP export simulation
pub mod erp_sync;

/// Health check endpoint
pub mod health;

/// Invoice queries
pub mod invoices;

/// Service administration
pub mod services;
