//! Billing pending HTTP handlers.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use crate::{
    app::AppState,
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        billing_pending::{PendingFilter, PendingSummary, PendingWithService},
        pagination::Page,
    },
    services::billing_pending_service,
};

/// `GET /api/v1/billing-pendings`
///
/// Query parameters: `status`, `customer_id`, `date_from`, `date_to`, `page`, `limit`.
pub async fn list_pendings(
    State(state): State<AppState>,
    Query(filter): Query<PendingFilter>,
) -> Result<Json<Page<PendingWithService>>, AppError> {
    Ok(Json(
        billing_pending_service::list_pendings(state.store.as_ref(), &filter).await?,
    ))
}

/// `GET /api/v1/billing-pendings/summary`
pub async fn pending_summary(
    State(state): State<AppState>,
) -> Result<Json<PendingSummary>, AppError> {
    Ok(Json(
        billing_pending_service::summary(state.store.as_ref()).await?,
    ))
}

/// `GET /api/v1/billing-pendings/available`
pub async fn available_pendings(
    State(state): State<AppState>,
) -> Result<Json<Vec<PendingWithService>>, AppError> {
    Ok(Json(
        billing_pending_service::available_pendings(state.store.as_ref()).await?,
    ))
}

/// `GET /api/v1/billing-pendings/{id}`
pub async fn get_pending(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PendingWithService>, AppError> {
    Ok(Json(
        billing_pending_service::get_pending(state.store.as_ref(), id).await?,
    ))
}

/// `DELETE /api/v1/billing-pendings/{id}`
///
/// Puts the service back in `CREATED`. Fails with 409 once invoiced.
pub async fn cancel_pending(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    billing_pending_service::cancel_pending(state.store.as_ref(), id).await?;
    tracing::info!("Billing pending {} cancelled by key {}", id, auth.key_fingerprint);

    Ok(StatusCode::NO_CONTENT)
}
