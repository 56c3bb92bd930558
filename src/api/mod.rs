//! Web API module for Kiln
//!
//! Provides REST and WebSocket endpoints for:
//! - Build admission, status and cancellation
//! - Live build event streams
//! - Health and queue occupancy
//! - OpenAPI document

pub mod builds;
pub mod docs;
pub mod events;
pub mod health;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use kiln_core::ErrorKind;
use serde::{Deserialize, Serialize};

pub use builds::builds_routes;
pub use docs::docs_routes;
pub use events::events_routes;
pub use health::health_routes;

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// `BAD_REQUEST` or `INTERNAL_ERROR`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_type: None,
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> ApiResponse<T> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message.into()),
            error_type: Some(kind.as_str().to_string()),
        }
    }
}

/// Error half of a handler result
#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::BadRequest,
            message: message.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<kiln_core::Error> for ApiError {
    fn from(e: kiln_core::Error) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ApiResponse::<()>::error(self.kind, self.message);
        (status, Json(body)).into_response()
    }
}

/// Handler result type
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;
