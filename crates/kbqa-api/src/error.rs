//! API error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use kbqa_core::KbqaError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    #[schema(example = "BAD_REQUEST")]
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn internal_error() -> Self {
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    /// The generation service failed after retries
    Generation(String),
    /// The embedding backend is unavailable
    Embedding(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ApiError::bad_request(msg)),
            AppError::Generation(msg) => (
                StatusCode::BAD_GATEWAY,
                ApiError::new("GENERATION_FAILED", msg),
            ),
            AppError::Embedding(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiError::new("EMBEDDING_UNAVAILABLE", msg),
            ),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, ApiError::internal_error())
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<KbqaError> for AppError {
    fn from(err: KbqaError) -> Self {
        // Provider details stay in the logs, clients get the user-safe text
        match &err {
            KbqaError::ValidationError(msg) => AppError::BadRequest(msg.clone()),
            KbqaError::GenerationError(detail) => {
                tracing::error!("Generation failed: {}", detail);
                AppError::Generation(err.user_message())
            }
            KbqaError::EmbeddingError(detail) => {
                tracing::error!("Embedding failed: {}", detail);
                AppError::Embedding(err.user_message())
            }
            _ => AppError::Internal(err.to_string()),
        }
    }
}
