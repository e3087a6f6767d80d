use audit_rules::errors::RuleCatalogError;
use axum::http::StatusCode;
use ledger_events::errors::HandlerError;

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

    /// Catalog failure seen while evaluating a movement. The event must be
    /// retried, never settled with a default verdict.
    pub fn rule_evaluation(err: RuleCatalogError) -> Self {
        Self::unavailable("RULE_EVALUATION_FAILURE", err.to_string())
    }
}

impl From<RuleCatalogError> for AppError {
    fn from(value: RuleCatalogError) -> Self {
        match &value {
            RuleCatalogError::EmptyRuleSet
            | RuleCatalogError::DuplicateRuleId(_)
            | RuleCatalogError::InvalidRule { .. } => {
                Self::bad_request("INVALID_RULE_SET", value.to_string())
            }
            RuleCatalogError::VersionNotFound(_) => {
                Self::not_found("RULE_SET_VERSION_NOT_FOUND", value.to_string())
            }
            RuleCatalogError::VersionConflict(_) => {
                Self::conflict("RULE_SET_VERSION_CONFLICT", value.to_string())
            }
            RuleCatalogError::NoActiveVersion => {
                Self::not_found("NO_ACTIVE_RULE_SET", value.to_string())
            }
            RuleCatalogError::Serialization(_) => {
                Self::internal("SERIALIZATION_ERROR", value.to_string())
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
