use ledger_events::models::{AuditResult, Evidence, MovementType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Blocking,
    Warning,
}

/// Closed set of checks a rule can perform over a movement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    RequiredAttachmentTypes {
        types: Vec<String>,
    },
    MinAttachmentCount {
        min: usize,
    },
    QuantityRange {
        min: Option<Decimal>,
        max: Option<Decimal>,
    },
    GeolocationRequired,
    GeofenceRegion {
        min_lat: f64,
        max_lat: f64,
        min_lon: f64,
        max_lon: f64,
    },
    AllowedMovementTypes {
        types: Vec<MovementType>,
    },
    AllowedUnits {
        units: Vec<String>,
    },
    MaxReportingDelay {
        max_hours: i64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub rule_id: String,
    #[serde(default = "default_rule_version")]
    pub version: u32,
    pub description: String,
    pub severity: Severity,
    pub predicate: RuleKind,
}

fn default_rule_version() -> u32 {
    1
}

/// Immutable, numbered snapshot of rules. Rules are kept sorted by id so
/// evidence comes out in a stable order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleSetVersion {
    pub version: u64,
    pub rules: Vec<Rule>,
    pub content_hash: String,
    pub description: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleVerdict {
    Satisfied,
    Violated { severity: Severity, detail: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    pub result: AuditResult,
    pub evidence: Vec<Evidence>,
    pub rule_set_version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Activation {
    pub version: u64,
    pub activated_at: i64,
    pub deactivated_at: Option<i64>,
}
