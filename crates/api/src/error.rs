//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use reservation::ReservationError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed path, header or body.
    BadRequest(String),
    /// The caller did not identify itself.
    Unauthorized(String),
    /// Error raised by the reservation workflow.
    Reservation(ReservationError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Reservation(err) => reservation_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn reservation_error_to_response(err: ReservationError) -> (StatusCode, String) {
    let status = match &err {
        ReservationError::Validation(_)
        | ReservationError::InvalidPayload(_)
        | ReservationError::Signature => StatusCode::BAD_REQUEST,
        ReservationError::NotFound { .. } => StatusCode::NOT_FOUND,
        ReservationError::Conflict(_) => StatusCode::CONFLICT,
        ReservationError::Gateway(_) => StatusCode::BAD_GATEWAY,
        ReservationError::QueueDelivery(_) | ReservationError::Store(_) => {
            tracing::error!(error = %err, "internal server error");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            );
        }
    };
    (status, err.to_string())
}

impl From<ReservationError> for ApiError {
    fn from(err: ReservationError) -> Self {
        ApiError::Reservation(err)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Reservation(ReservationError::Validation(err))
    }
}
