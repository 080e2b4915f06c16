use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use neon_types::EvalError;

#[derive(Debug)]
/// HTTP-facing error with the engine taxonomy mapped onto status codes.
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            detail: detail.into(),
        }
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            detail: detail.into(),
        }
    }

    pub fn unprocessable(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            detail: detail.into(),
        }
    }
}

impl From<EvalError> for ApiError {
    fn from(error: EvalError) -> Self {
        let status = match &error {
            EvalError::NotFound(_) => StatusCode::NOT_FOUND,
            EvalError::Conflict(_) => StatusCode::CONFLICT,
            EvalError::Invalid(_) | EvalError::AgentLoad(_) | EvalError::AgentSignature(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EvalError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            EvalError::Forbidden(_) => StatusCode::FORBIDDEN,
            EvalError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            detail: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, detail = %self.detail, "request failed");
        }
        let body = Json(json!({
            "error": self
                .status
                .canonical_reason()
                .unwrap_or("error"),
            "detail": self.detail,
        }));
        (self.status, body).into_response()
    }
}
