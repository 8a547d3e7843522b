//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Application-wide error type.
///
/// Each variant maps to a specific HTTP status code and error code.
///
/// # Error Categories
///
/// - **Database Errors**: Any sqlx::Error from store or queue operations
/// - **Authentication Errors**: Invalid or missing API keys
/// - **Resource Errors**: Requested entity not found
/// - **Workflow Errors**: Empty batches, forbidden state transitions, failed processing
/// - **Validation Errors**: Invalid request data
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// API key is missing or not accepted.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Requested entity does not exist.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("{entity} with identifier '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// A batch was submitted with no pending ids, or none of them were valid.
    ///
    /// Returns HTTP 400 Bad Request. Raised before any row is written.
    #[error("Cannot create a billing batch without any pending items")]
    EmptyBatch,

    /// The entity is not in a state that allows the requested transition.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Cannot move {entity} from '{from}' to '{to}'")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// Operation violates a business rule (e.g., editing an invoiced service).
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("{0}")]
    BusinessRule(String),

    /// Operation conflicts with existing state (e.g., cancelling an invoiced pending).
    ///
    /// Returns HTTP 409 Conflict.
    #[error("{0}")]
    Conflict(String),

    /// Batch processing failed and was rolled back.
    ///
    /// Returns HTTP 500 with the underlying detail exposed to the caller.
    #[error("{message}")]
    BatchProcessing {
        message: String,
        detail: Option<String>,
    },

    /// Simulated ERP export failed or was not allowed.
    ///
    /// Returns HTTP 503 Service Unavailable.
    #[error("ERP sync error: {0}")]
    ErpSync(String),

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("{0}")]
    InvalidRequest(String),

    /// Unexpected internal failure (e.g., payload serialization).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        AppError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message",
///     "details": "Optional detail (batch processing only)"
///   }
/// }
/// ```
///
/// # Status Code Mapping
///
/// - `InvalidApiKey` → 401 Unauthorized
/// - `NotFound` → 404 Not Found
/// - `EmptyBatch`, `InvalidStateTransition`, `BusinessRule`, `InvalidRequest` → 400 Bad Request
/// - `Conflict` → 409 Conflict
/// - `ErpSync` → 503 Service Unavailable
/// - `BatchProcessing` → 500 Internal Server Error (with details)
/// - `Database`, `Internal` → 500 Internal Server Error (hides details from client)
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut details = None;

        // Map each error variant to (HTTP status, error code, message)
        let (status, code, message) = match self {
            AppError::InvalidApiKey => (
                StatusCode::UNAUTHORIZED,
                "invalid_api_key",
                self.to_string(),
            ),
            AppError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            AppError::EmptyBatch => (StatusCode::BAD_REQUEST, "empty_batch", self.to_string()),
            AppError::InvalidStateTransition { .. } => (
                StatusCode::BAD_REQUEST,
                "invalid_state_transition",
                self.to_string(),
            ),
            AppError::BusinessRule(ref msg) => {
                (StatusCode::BAD_REQUEST, "business_error", msg.clone())
            }
            AppError::Conflict(ref msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            AppError::BatchProcessing {
                ref message,
                ref detail,
            } => {
                details = detail.clone();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "batch_processing_error",
                    message.clone(),
                )
            }
            AppError::ErpSync(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "erp_sync_error",
                self.to_string(),
            ),
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::Database(ref err) => {
                tracing::error!("Database error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let mut error = json!({
            "code": code,
            "message": message
        });
        if let Some(details) = details {
            error["details"] = json!(details);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_entity_and_id() {
        let err = AppError::not_found("BillingBatch", 42);
        assert_eq!(err.to_string(), "BillingBatch with identifier '42' not found");
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        let cases = [
            (AppError::EmptyBatch, StatusCode::BAD_REQUEST),
            (AppError::not_found("Invoice", 1), StatusCode::NOT_FOUND),
            (
                AppError::InvalidStateTransition {
                    entity: "BillingBatch",
                    from: "PROCESSED".into(),
                    to: "PENDING_PROCESSING".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (AppError::Conflict("taken".into()), StatusCode::CONFLICT),
            (
                AppError::BatchProcessing {
                    message: "boom".into(),
                    detail: None,
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (AppError::ErpSync("down".into()), StatusCode::SERVICE_UNAVAILABLE),
            (AppError::InvalidApiKey, StatusCode::UNAUTHORIZED),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
