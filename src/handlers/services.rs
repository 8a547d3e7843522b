//! Service administration HTTP handlers.
//!
//! - POST /api/v1/services - Create a service
//! - GET /api/v1/services - List services
//! - GET /api/v1/services/{id} - Get a service
//! - PATCH /api/v1/services/{id} - Update a CREATED service
//! - DELETE /api/v1/services/{id} - Delete a CREATED service
//! - POST /api/v1/services/send-to-billing - Create billing pendings

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
        pagination::Page,
        service::{
            CreateServiceRequest, SendToBillingRequest, SendToBillingResponse, Service,
            ServiceFilter, UpdateServiceRequest,
        },
    },
    services::service_records,
};

/// Create a new service in status `CREATED`.
///
/// # Request Body
///
/// ```json
/// {
///   "service_date": "2024-01-15",
///   "customer_id": 42,
///   "amount": "1500.00"
/// }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: The created service
/// - **Error (400)**: Non-positive customer id or amount
pub async fn create_service(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateServiceRequest>,
) -> Result<(StatusCode, Json<Service>), AppError> {
    let service = service_records::create_service(state.store.as_ref(), request).await?;
    tracing::info!("Service {} created by key {}", service.id, auth.key_fingerprint);

    Ok((StatusCode::CREATED, Json(service)))
}

/// List services, newest first.
///
/// Query parameters: `customer_id`, `status`, `date_from`, `date_to` (service
/// date, inclusive), `page`, `limit`.
pub async fn list_services(
    State(state): State<AppState>,
    Query(filter): Query<ServiceFilter>,
) -> Result<Json<Page<Service>>, AppError> {
    Ok(Json(state.store.list_services(&filter).await?))
}

pub async fn get_service(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Service>, AppError> {
    Ok(Json(
        service_records::get_service(state.store.as_ref(), id).await?,
    ))
}

/// Update a service. Only services in status `CREATED` can change.
///
/// # Response
///
/// - **Success (200 OK)**: The updated service
/// - **Error (400)**: Service is no longer `CREATED`, or invalid values
/// - **Error (404)**: Service not found
pub async fn update_service(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateServiceRequest>,
) -> Result<Json<Service>, AppError> {
    Ok(Json(
        service_records::update_service(state.store.as_ref(), id, request).await?,
    ))
}

/// Delete a service. Only services in status `CREATED` can be deleted.
///
/// Returns 204 No Content on success.
pub async fn delete_service(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    service_records::delete_service(state.store.as_ref(), id).await?;
    tracing::info!("Service {} deleted by key {}", id, auth.key_fingerprint);

    Ok(StatusCode::NO_CONTENT)
}

/// Create one billing pending per eligible service.
///
/// Every service is handled independently: failures are reported per id
/// and never abort the others.
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "success": [1, 2],
///   "failed": [{ "id": 3, "reason": "Service not found" }],
///   "pendings": [ ... ]
/// }
/// ```
pub async fn send_to_billing(
    State(state): State<AppState>,
    Json(request): Json<SendToBillingRequest>,
) -> Result<Json<SendToBillingResponse>, AppError> {
    Ok(Json(
        service_records::send_to_billing(state.store.as_ref(), &request.service_ids).await?,
    ))
}
