use ledger_events::events::AuditCompleted;
use ledger_events::models::{AuditResult, Evidence};
use serde::{Deserialize, Serialize};

/// Verdict for one movement. Written once by the engine and at most once
/// more by a reviewer, which bumps `revision` from 0 to 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub audit_id: String,
    pub movement_id: String,
    pub producer_id: String,
    pub rule_set_version: u64,
    pub result: AuditResult,
    pub evidence: Vec<Evidence>,
    pub processed_at: i64,
    pub reviewer_id: Option<String>,
    pub review_notes: Option<String>,
    pub reviewed_at: Option<i64>,
    #[serde(default)]
    pub revision: u32,
}

impl AuditRecord {
    pub fn completed_event(&self) -> AuditCompleted {
        AuditCompleted {
            audit_id: self.audit_id.clone(),
            movement_id: self.movement_id.clone(),
            producer_id: self.producer_id.clone(),
            result: self.result,
            rule_set_version: self.rule_set_version,
            evidence: self.evidence.clone(),
            revision: self.revision,
            processed_at: self.processed_at,
            reviewer_id: self.reviewer_id.clone(),
            reviewed_at: self.reviewed_at,
        }
    }

    pub fn is_reviewable(&self) -> bool {
        self.result == AuditResult::NeedsReview && self.revision == 0
    }
}
