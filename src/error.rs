use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("ride is in a terminal state")]
    Terminal,

    #[error("request body too large")]
    BodyTooLarge,

    #[error("unsupported media type")]
    UnsupportedMediaType,

    #[error("service over capacity")]
    OverCapacity,

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::InvalidTransition(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Terminal => (StatusCode::CONFLICT, self.to_string()),
            AppError::BodyTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            AppError::UnsupportedMediaType => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, self.to_string())
            }
            AppError::OverCapacity => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            // broker and database details stay in the logs, not in API bodies
            AppError::PublishFailed(_) | AppError::Broker(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            AppError::Database(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "database error".to_string())
            }
            AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::MissingJsonContentType(_) => AppError::UnsupportedMediaType,
            JsonRejection::BytesRejection(_) => AppError::BodyTooLarge,
            other => AppError::Validation(format!("invalid JSON: {other}")),
        }
    }
}

/// Json extractor that rejects with the crate's `{"error": ...}` body shape.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct AppJson<T>(pub T);
