//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

/// Error returned by handlers, rendered as `{"detail": message}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed: {}", self.message);
        }
        (self.status, Json(json!({ "detail": self.message }))).into_response()
    }
}

impl From<voxgate_core::Error> for ApiError {
    fn from(err: voxgate_core::Error) -> Self {
        use voxgate_core::Error;

        match err {
            Error::SynthesisFailure(message) => {
                ApiError::internal(format!("TTS generation failed: {message}"))
            }
            err if err.is_validation() => ApiError::bad_request(err.to_string()),
            err => ApiError::internal(err.to_string()),
        }
    }
}
