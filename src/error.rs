use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("pickup code already issued")]
    DuplicateOtp { code: String },

    #[error("invalid code")]
    InvalidOtp,

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::StateConflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::Authorization(msg) => (StatusCode::FORBIDDEN, json!({ "error": msg })),
            // The conflict response carries the existing code unchanged so a
            // retried issue request can still hand it to the buyer.
            AppError::DuplicateOtp { code } => (
                StatusCode::CONFLICT,
                json!({ "error": "pickup code already issued", "otp": code }),
            ),
            // Never reveals the expected code; a consumed code gets the same
            // message as a mismatch.
            AppError::InvalidOtp => (StatusCode::UNAUTHORIZED, json!({ "error": "invalid code" })),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg })),
        };

        (status, Json(body)).into_response()
    }
}
