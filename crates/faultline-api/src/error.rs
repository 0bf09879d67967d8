//! API error types and HTTP response mapping.
//!
//! All error responses share one JSON shape: `{ "ok": false, "error": … }`,
//! with 4xx status for validation failures and 5xx otherwise.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use faultline_engine::Error as EngineError;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Always false for errors.
    pub ok: bool,
    /// Human-readable message.
    pub error: String,
}

/// HTTP API error.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Returns an error response for invalid input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Returns an error response for unavailable collaborators.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }

    /// Returns an internal error response.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the human-readable error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        if error.is_validation() {
            Self::bad_request(error.to_string())
        } else {
            match error {
                EngineError::Resource { .. } => Self::service_unavailable(error.to_string()),
                _ => Self::internal(error.to_string()),
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                ok: false,
                error: self.message,
            }),
        )
            .into_response()
    }
}
