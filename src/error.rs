// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
///
/// The client contract is deliberately flat: every business-rule failure
/// (bad input, missing entity, duplicate action, non-owner) answers with a
/// 404 and `{ "success": false, "error": "<message>" }`. Only the
/// authentication gates differ (401/403), and unexpected failures are 500.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 404 - malformed body or identifier
    Validation(String),

    // 404 - entity absent
    NotFound(String),

    // 404 - duplicate/idempotency violation (already liked, already following, ...)
    Conflict(String),

    // 404 - actor is not the resource's owner
    Unauthorized(String),

    // 401 - missing/invalid/expired token
    AuthError(String),

    // 403 - token subject does not match the path parameter
    Forbidden(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into the JSON error envelope with the matching status.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::Validation(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::Unauthorized(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
        };
        let body = Json(json!({
            "success": false,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError::InternalServerError`.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_failures_map_to_404() {
        for err in [
            AppError::Validation("Invalid identifier.".into()),
            AppError::NotFound("Post not found.".into()),
            AppError::Conflict("You already like this post.".into()),
            AppError::Unauthorized("Unauthorized.".into()),
        ] {
            let response = err.into_response();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    #[test]
    fn auth_failures_keep_their_statuses() {
        assert_eq!(
            AppError::AuthError("Invalid token.".into())
                .into_response()
                .status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Forbidden("Unauthorized".into())
                .into_response()
                .status(),
            StatusCode::FORBIDDEN
        );
    }
}
