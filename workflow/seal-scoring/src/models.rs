use ledger_events::models::{AuditResult, CertificationStatus, CertificationTier};
use serde::{Deserialize, Serialize};

/// Points per audit result, tier thresholds and the history window.
/// Deployment configuration, not business logic baked into the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoringPolicy {
    pub approved_points: u32,
    pub needs_review_points: u32,
    pub rejected_points: u32,
    /// Most recent audits considered; 0 means the whole history.
    pub window: usize,
    pub bronze_threshold: u32,
    pub silver_threshold: u32,
    pub gold_threshold: u32,
    pub diamond_threshold: u32,
    pub validity_days: i64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            approved_points: 100,
            needs_review_points: 60,
            rejected_points: 0,
            window: 50,
            bronze_threshold: 70,
            silver_threshold: 80,
            gold_threshold: 90,
            diamond_threshold: 95,
            validity_days: 180,
        }
    }
}

/// Latest known outcome of one audit, as seen by scoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditOutcome {
    pub audit_id: String,
    pub movement_id: String,
    pub result: AuditResult,
    pub rule_set_version: u64,
    pub revision: u32,
    pub processed_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreOutcome {
    pub score: u32,
    pub tier: CertificationTier,
    pub status: CertificationStatus,
    pub audits_considered: usize,
    pub pending_reviews: usize,
    pub valid_until: Option<i64>,
}
