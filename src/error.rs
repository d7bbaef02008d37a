// =============================================================================
// ERROR MODULE
// =============================================================================
// The HTTP boundary error. Core modules return their own typed errors
// (OrderError, ReviewError, StoreError); handlers convert them with `?` and
// this module decides the status code and the JSON body.
//
// ERROR HANDLING PHILOSOPHY:
// - Client mistakes (4xx) carry a useful message
// - Server-side failures (5xx) get a generic message; details go to the log
// =============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;
use crate::orders::OrderError;
use crate::reservation::RestoreFailure;
use crate::reviews::ReviewError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    // -------------------------------------------------------------------------
    // CORE ERRORS
    // -------------------------------------------------------------------------
    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Review(#[from] ReviewError),

    #[error(transparent)]
    Store(#[from] StoreError),

    // -------------------------------------------------------------------------
    // REQUEST ERRORS
    // -------------------------------------------------------------------------
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // -------------------------------------------------------------------------
    // INTERNAL ERRORS
    // -------------------------------------------------------------------------
    #[error("Internal error: {0}")]
    Internal(String),
}

const GENERIC_STORAGE_MESSAGE: &str = "A storage error occurred";

impl AppError {
    /// Status code, machine-readable code, client-facing message.
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Order(e) => match e {
                OrderError::EmptyCart | OrderError::Validation(_) | OrderError::InvalidStatus(_) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
                }
                OrderError::InsufficientStock { .. } => {
                    (StatusCode::BAD_REQUEST, "INSUFFICIENT_STOCK", e.to_string())
                }
                OrderError::InvalidTransition { .. } => {
                    (StatusCode::BAD_REQUEST, "INVALID_TRANSITION", e.to_string())
                }
                OrderError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string()),
                OrderError::PartiallyCompensated { .. } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "COMPENSATION_FAILED",
                    "The operation failed and stock could not be fully restored".to_string(),
                ),
                OrderError::Storage(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "UPSTREAM_ERROR",
                    GENERIC_STORAGE_MESSAGE.to_string(),
                ),
            },

            AppError::Review(e) => match e {
                ReviewError::Validation(_) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
                }
                ReviewError::NotDelivered | ReviewError::ProductNotInOrder => {
                    (StatusCode::BAD_REQUEST, "NOT_ELIGIBLE", e.to_string())
                }
                ReviewError::OrderNotFound | ReviewError::ReviewNotFound => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string())
                }
                ReviewError::AlreadyReviewed => (StatusCode::CONFLICT, "CONFLICT", e.to_string()),
                ReviewError::Storage(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "UPSTREAM_ERROR",
                    GENERIC_STORAGE_MESSAGE.to_string(),
                ),
            },

            AppError::Store(StoreError::NotFound(what)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", format!("{what} not found"))
            }
            AppError::Store(StoreError::Conflict(what)) => {
                (StatusCode::CONFLICT, "CONFLICT", format!("{what} already exists"))
            }
            AppError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "UPSTREAM_ERROR",
                GENERIC_STORAGE_MESSAGE.to_string(),
            ),

            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = self.parts();

        // Log the full error; the body only carries the public message.
        if status.is_server_error() {
            tracing::error!(error_code, error = %self, "Request failed");
        } else {
            tracing::warn!(error_code, error = %self, "Request rejected");
        }

        let body = match &self {
            AppError::Order(OrderError::PartiallyCompensated { failures, .. }) => {
                for failure in failures {
                    tracing::error!(
                        product_id = %failure.product_id,
                        quantity = failure.quantity,
                        reason = %failure.reason,
                        "Stock left unrestored"
                    );
                }
                ErrorResponse::with_details(error_code, message, unrestored_details(failures))
            }
            _ => ErrorResponse::new(error_code, message),
        };

        (status, Json(body)).into_response()
    }
}

/// "Stock not restored for: <product> x<quantity>, ..."
fn unrestored_details(failures: &[RestoreFailure]) -> String {
    let lines: Vec<String> = failures
        .iter()
        .map(|f| format!("{} x{}", f.product_id, f.quantity))
        .collect();
    format!("Stock not restored for: {}", lines.join(", "))
}

pub type AppResult<T> = Result<T, AppError>;
