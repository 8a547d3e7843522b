//! Billing batch administration service.
//!
//! Services are sent to billing as pendings, pendings are grouped into
//! batches, and each batch is processed (by a background worker or inline)
//! into gapless, per-receipt-book numbered invoices.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum
//! - **Storage**: PostgreSQL with sqlx, or an in-memory store for local runs and tests
//! - **Job Queue**: `batch_jobs` table reserved with `FOR UPDATE SKIP LOCKED`
//! - **Authentication**: API key with SHA-256 hashing

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod queue;
pub mod services;
pub mod store;
