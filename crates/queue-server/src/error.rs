//! Maps `QueueError`/`RejectionReason` onto HTTP responses.
//!
//! No queue logic lives here — this is a pure translation layer, mirroring
//! the `AppError`/`IntoResponse` split the wider pack's server-shaped crates
//! use so handlers can propagate with `?` instead of matching on errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use queue_core::{Categorizable, ErrorCategory, QueueError, RejectionReason};
use serde_json::json;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_PAYLOAD", message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<RejectionReason> for AppError {
    fn from(reason: RejectionReason) -> Self {
        let (status, code) = match reason {
            RejectionReason::InvalidTier => (StatusCode::BAD_REQUEST, "INVALID_TIER"),
            RejectionReason::InvalidPayload => (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD"),
            RejectionReason::QueueFull => (StatusCode::TOO_MANY_REQUESTS, "QUEUE_FULL"),
            RejectionReason::QuotaExceeded => (StatusCode::TOO_MANY_REQUESTS, "QUOTA_EXCEEDED"),
        };
        Self::new(status, code, reason.to_string())
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        if let QueueError::Rejected(reason) = err {
            return reason.into();
        }

        let status = match err.category() {
            ErrorCategory::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Conflict => StatusCode::CONFLICT,
            ErrorCategory::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCategory::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let code = match &err {
            QueueError::JobNotFound(_) => "JOB_NOT_FOUND",
            QueueError::IllegalTransition(_) => "ILLEGAL_TRANSITION",
            QueueError::Store(_) if err.category() == ErrorCategory::Unavailable => "STORE_UNAVAILABLE",
            QueueError::Store(_) => "STORE_ERROR",
            QueueError::Codec(_) => "CODEC_ERROR",
            QueueError::Rejected(_) => unreachable!("handled above"),
        };
        Self::new(status, code, err.to_string())
    }
}
