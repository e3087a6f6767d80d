use axum::http::StatusCode;
use ledger_events::errors::HandlerError;
use seal_scoring::errors::ScoringError;

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
}

impl From<ScoringError> for AppError {
    fn from(value: ScoringError) -> Self {
        match &value {
            // Retried, then dead-lettered; never scored with a guessed version.
            ScoringError::MissingRuleSetVersion { .. } => {
                Self::unavailable("RULE_SET_VERSION_MISSING", value.to_string())
            }
            ScoringError::InvalidPolicy(_) => {
                Self::internal("INVALID_SCORING_POLICY", value.to_string())
            }
        }
    }
}

impl From<AppError> for HandlerError {
    fn from(value: AppError) -> Self {
        if value.status.is_server_error() {
            HandlerError::transient(value.code, value.message)
        } else {
            HandlerError::permanent(value.code, value.message)
        }
    }
}
