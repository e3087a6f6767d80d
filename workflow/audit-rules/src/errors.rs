use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuleCatalogError {
    #[error("rule set must contain at least one rule")]
    EmptyRuleSet,

    #[error("duplicate rule id {0}")]
    DuplicateRuleId(String),

    #[error("invalid rule {rule_id}: {reason}")]
    InvalidRule { rule_id: String, reason: String },

    #[error("rule set version {0} not found")]
    VersionNotFound(u64),

    #[error("rule set version {0} already exists with different content")]
    VersionConflict(u64),

    #[error("no active rule set version")]
    NoActiveVersion,

    #[error("rule set serialization failed: {0}")]
    Serialization(String),
}
