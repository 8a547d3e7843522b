//! Invoice query handlers. Invoices are read-only over HTTP; they are only
//! ever created by batch processing.

use axum::{
    Json,
    extract::{Path, Query, State},
};

use crate::{
    app::AppState,
    error::AppError,
    models::{
        invoice::{InvoiceDetail, InvoiceFilter, InvoiceStatistics},
        pagination::Page,
    },
    services::invoice_service,
};

/// List invoices, newest first.
///
/// Query parameters: `batch_id`, `customer_id`, `invoice_number` (partial,
/// case-insensitive), `date_from`, `date_to`, `min_amount`, `max_amount`,
/// `page`, `limit`.
pub async fn list_invoices(
    State(state): State<AppState>,
    Query(filter): Query<InvoiceFilter>,
) -> Result<Json<Page<InvoiceDetail>>, AppError> {
    Ok(Json(
        invoice_service::list_invoices(state.store.as_ref(), &filter).await?,
    ))
}

/// Totals overall, per month and per customer.
pub async fn invoice_statistics(
    State(state): State<AppState>,
) -> Result<Json<InvoiceStatistics>, AppError> {
    Ok(Json(invoice_service::statistics(state.store.as_ref()).await?))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<InvoiceDetail>, AppError> {
    Ok(Json(
        invoice_service::get_invoice(state.store.as_ref(), id).await?,
    ))
}

pub async fn get_invoice_by_number(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> Result<Json<InvoiceDetail>, AppError> {
    Ok(Json(
        invoice_service::get_by_number(state.store.as_ref(), &number).await?,
    ))
}

pub async fn invoices_by_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<i64>,
) -> Result<Json<Vec<InvoiceDetail>>, AppError> {
    Ok(Json(
        invoice_service::by_batch(state.store.as_ref(), batch_id).await?,
    ))
}

pub async fn invoices_by_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<i64>,
) -> Result<Json<Vec<InvoiceDetail>>, AppError> {
    Ok(Json(
        invoice_service::by_customer(state.store.as_ref(), customer_id).await?,
    ))
}
