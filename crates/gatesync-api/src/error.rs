//! API error responses.
//!
//! Every error renders as `{ "errorCode": <int>, "message": <string> }`.
//! Internal failures are logged and answered with a generic message.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use gatesync_report::ReportError;
use gatesync_state::StoreError;

pub const API_ERR_BAD_BLOCK: i64 = 1;
pub const API_ERR_INTERNAL: i64 = 2;
pub const API_ERR_INVALID_PARAMETERS: i64 = 3;
pub const API_ERR_NOT_FOUND: i64 = 4;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i64,
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    error_code: i64,
    message: &'a str,
}

impl ApiError {
    pub fn new(status: StatusCode, code: i64, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, API_ERR_NOT_FOUND, message)
    }

    pub fn internal(cause: &dyn std::fmt::Display) -> Self {
        error!(error = %cause, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, API_ERR_INTERNAL, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error_code: self.code,
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::internal(&e)
    }
}

impl From<ReportError> for ApiError {
    fn from(e: ReportError) -> Self {
        match e {
            ReportError::Validation(message) => {
                Self::new(StatusCode::BAD_REQUEST, API_ERR_INVALID_PARAMETERS, message)
            }
            ReportError::NotFound(id) => Self::not_found(format!("deployment not found: {id}")),
            other => Self::internal(&other),
        }
    }
}
