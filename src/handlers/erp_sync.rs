//! ERP export HTTP handlers.
//!
//! - POST /api/v1/erp-sync/preview - Payload preview, nothing is sent
//! - POST /api/v1/erp-sync/invoices - Export invoices
//! - POST /api/v1/erp-sync/batch - Export every invoice of a batch
//! - GET /api/v1/erp-sync/history - Export history
//! - GET /api/v1/erp-sync/history/{sync_id} - One export
//! - POST /api/v1/erp-sync/history/{sync_id}/confirm - Confirm a SENT export

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};

use crate::{
    app::AppState,
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        erp::{
            ConfirmSyncResponse, ErpInvoiceData, ErpSyncResponse, SyncBatchRequest,
            SyncHistoryFilter, SyncHistoryItem, SyncInvoicesRequest,
        },
        pagination::Page,
    },
};

pub async fn preview(
    State(state): State<AppState>,
    Json(request): Json<SyncInvoicesRequest>,
) -> Result<Json<Vec<ErpInvoiceData>>, AppError> {
    Ok(Json(state.erp.preview(&request.invoice_ids).await?))
}

/// Export invoices to the ERP.
///
/// A simulated ERP failure still answers 200: the response carries
/// `"status": "ERROR"` and `summary.success = false`, and the attempt is kept
/// in the history.
///
/// # Request Body
///
/// ```json
/// { "invoice_ids": [1, 2, 3] }
/// ```
pub async fn sync_invoices(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<SyncInvoicesRequest>,
) -> Result<Json<ErpSyncResponse>, AppError> {
    let response = state.erp.sync_invoices(&request.invoice_ids).await?;
    tracing::info!("ERP sync {} requested by key {}", response.sync_id, auth.key_fingerprint);

    Ok(Json(response))
}

/// Export every invoice of a batch.
///
/// Fails with 503 `erp_sync_error` when the batch has no invoices.
pub async fn sync_batch(
    State(state): State<AppState>,
    Json(request): Json<SyncBatchRequest>,
) -> Result<Json<ErpSyncResponse>, AppError> {
    Ok(Json(state.erp.sync_batch(request.batch_id).await?))
}

pub async fn history(
    State(state): State<AppState>,
    Query(filter): Query<SyncHistoryFilter>,
) -> Json<Page<SyncHistoryItem>> {
    Json(state.erp.history(&filter).await)
}

pub async fn sync_detail(
    State(state): State<AppState>,
    Path(sync_id): Path<String>,
) -> Result<Json<ErpSyncResponse>, AppError> {
    Ok(Json(state.erp.detail(&sync_id).await?))
}

/// Mark a `SENT` export as `CONFIRMED`.
pub async fn confirm_sync(
    State(state): State<AppState>,
    Path(sync_id): Path<String>,
) -> Result<Json<ConfirmSyncResponse>, AppError> {
    Ok(Json(state.erp.confirm(&sync_id).await?))
}
