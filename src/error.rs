use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::auth::credentials::CredentialError;
use crate::auth::session::SessionError;
use crate::store::StoreError;
use crate::uploads::IMAGE_TOO_LARGE;

const TRY_AGAIN: &str = "Something went wrong. Please try again.";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("You must be logged in")]
    Unauthenticated,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Credential error: {0}")]
    Credentials(#[from] CredentialError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Map a store failure on a post to its user-facing form.
    pub fn for_post(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::not_found("Post not found"),
            other => other.into(),
        }
    }

    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthenticated | AppError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Store(StoreError::NotFound) => {
                (StatusCode::NOT_FOUND, "Not found".to_string())
            }
            AppError::Store(StoreError::Conflict(msg)) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Store(StoreError::Validation(e)) => {
                tracing::warn!("Validation failed: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid input".to_string())
            }
            AppError::Session(SessionError::Unauthorized) => {
                (StatusCode::UNAUTHORIZED, "You must be logged in".to_string())
            }
            other => {
                tracing::error!("{}", other);
                (StatusCode::INTERNAL_SERVER_ERROR, TRY_AGAIN.to_string())
            }
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        tracing::debug!("Rejected multipart body: {}", err);
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return Self::validation(IMAGE_TOO_LARGE);
        }
        Self::Validation(err.body_text())
    }
}

// Extractor rejections keep axum's wording but use the JSON error body

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!("Rejected JSON body: {}", rejection);
        Self::Validation(rejection.body_text())
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        tracing::debug!("Rejected multipart request: {}", rejection);
        Self::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        tracing::debug!("Rejected path: {}", rejection);
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
