use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScoringError {
    #[error("audit {audit_id} carries no rule set version")]
    MissingRuleSetVersion { audit_id: String },

    #[error("invalid scoring policy: {0}")]
    InvalidPolicy(String),
}
