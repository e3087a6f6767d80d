use crate::service::attachment_service::AttachmentError;
use axum::http::StatusCode;

#[derive(Debug, Clone)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message: message.into(),
        }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code,
            message: message.into(),
        }
    }

    /// Storage, bus or attachment store outage. Callers may retry.
    pub fn unavailable(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code,
            message: message.into(),
        }
    }

    pub fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code,
            message: message.into(),
        }
    }

    /// Same idempotency key, different canonical payload. Never overwrites.
    pub fn idempotency_conflict(key: &str) -> Self {
        Self::conflict(
            "IDEMPOTENCY_CONFLICT",
            format!("idempotency key {key} already used with a different payload"),
        )
    }

    pub fn attachment_mismatch(url: &str) -> Self {
        Self::bad_request(
            "ATTACHMENT_HASH_MISMATCH",
            format!("declared hash for {url} does not match stored object"),
        )
    }
}

impl From<AttachmentError> for AppError {
    fn from(value: AttachmentError) -> Self {
        match value {
            AttachmentError::NotFound(url) => Self::bad_request(
                "ATTACHMENT_NOT_FOUND",
                format!("attachment {url} is not retrievable"),
            ),
            AttachmentError::Unavailable(reason) => {
                Self::unavailable("DOWNSTREAM_UNAVAILABLE", reason)
            }
        }
    }
}
