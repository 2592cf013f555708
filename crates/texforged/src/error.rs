//! HTTP error mapping for build outcomes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use texforge_core::{BuildResponse, CompileError};

/// Request outcomes that are not a finished build.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("build timed out after {timeout_ms}ms")]
    TimedOut {
        timeout_ms: u64,
        response: Box<BuildResponse>,
    },

    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("internal error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::TimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
            ApiError::RuntimeUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::TimedOut { .. } => "timed_out",
            ApiError::RuntimeUnavailable(_) => "runtime_unavailable",
            ApiError::Internal => "internal_error",
        }
    }
}

/// Internal details stay in the logs; callers get a generic message.
impl From<CompileError> for ApiError {
    fn from(err: CompileError) -> Self {
        match err {
            CompileError::InvalidRequest(msg) => ApiError::InvalidRequest(msg),
            other => {
                tracing::error!(error = %other, "compile request failed");
                ApiError::Internal
            }
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
    /// Partial output captured before a timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<&'a BuildResponse>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (timeout_ms, response) = match &self {
            ApiError::TimedOut {
                timeout_ms,
                response,
            } => (Some(*timeout_ms), Some(response.as_ref())),
            _ => (None, None),
        };
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
            timeout_ms,
            response,
        };
        (self.status(), Json(body)).into_response()
    }
}
