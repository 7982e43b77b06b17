//! HTTP-facing error type.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::{leads::LeadError, path_guard::Rejection};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Path(#[from] Rejection),

    #[error("{0}")]
    Validation(String),

    #[error("path too long")]
    PathTooLong,

    #[error("file exceeds max size")]
    TooLarge,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Path(rejection) => rejection_status(*rejection),
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::PathTooLong => StatusCode::URI_TOO_LONG,
            Self::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The single status mapping shared by every file endpoint.
pub fn rejection_status(rejection: Rejection) -> StatusCode {
    match rejection {
        Rejection::MalformedInput | Rejection::TraversalAttempt => StatusCode::FORBIDDEN,
        Rejection::NotFound => StatusCode::NOT_FOUND,
        Rejection::DisallowedType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
    }
}

impl From<LeadError> for ApiError {
    fn from(err: LeadError) -> Self {
        match err {
            LeadError::Invalid(msg) => Self::Validation(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }
        let error = match &self {
            // storage paths stay out of client responses
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        (status, Json(ErrorResponse { ok: false, error })).into_response()
    }
}
