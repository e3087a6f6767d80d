use ledger_events::events::{AuditCompleted, TierChanged};
use ledger_events::models::{CertificationStatus, CertificationTier};
use seal_scoring::models::{AuditOutcome, ScoreOutcome};
use serde::{Deserialize, Serialize};

/// Live certification state of one producer. `version` is the CAS token:
/// every committed recomputation bumps it by one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeloVerde {
    pub producer_id: String,
    pub tier: CertificationTier,
    pub score: u32,
    pub status: CertificationStatus,
    pub last_updated: i64,
    pub valid_until: Option<i64>,
    pub audits_considered: usize,
    pub pending_reviews: usize,
    pub version: u64,
}

impl SeloVerde {
    pub fn from_score(producer_id: &str, score: &ScoreOutcome, version: u64, now: i64) -> Self {
        Self {
            producer_id: producer_id.to_string(),
            tier: score.tier,
            score: score.score,
            status: score.status,
            last_updated: now,
            valid_until: score.valid_until,
            audits_considered: score.audits_considered,
            pending_reviews: score.pending_reviews,
            version,
        }
    }
}

/// Append-only row of the tier trail. `seq` counts rows per producer from 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierChange {
    pub change_id: String,
    pub producer_id: String,
    pub seq: u64,
    pub previous_tier: CertificationTier,
    pub new_tier: CertificationTier,
    pub score: u32,
    pub status: CertificationStatus,
    pub reason: String,
    pub created_at: i64,
}

impl TierChange {
    pub fn change_id_for(producer_id: &str, seq: u64) -> String {
        format!("{producer_id}:tier:{seq}")
    }

    pub fn is_reassessment(&self) -> bool {
        self.previous_tier == self.new_tier
    }

    pub fn changed_event(&self) -> TierChanged {
        TierChanged {
            change_id: self.change_id.clone(),
            producer_id: self.producer_id.clone(),
            previous_tier: self.previous_tier,
            new_tier: self.new_tier,
            score: self.score,
            status: self.status,
            reason: self.reason.clone(),
            changed_at: self.created_at,
        }
    }
}

pub fn outcome_from_event(event: &AuditCompleted) -> AuditOutcome {
    AuditOutcome {
        audit_id: event.audit_id.clone(),
        movement_id: event.movement_id.clone(),
        result: event.result,
        rule_set_version: event.rule_set_version,
        revision: event.revision,
        processed_at: event.processed_at,
    }
}

/// What triggered a recomputation. Only manual recalculations may log a
/// reassessment row for an unchanged tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    AuditCompleted {
        audit_id: String,
        revision: u32,
        reason: String,
    },
    Manual {
        reason: String,
    },
}

impl Trigger {
    pub fn reason(&self) -> &str {
        match self {
            Self::AuditCompleted { reason, .. } | Self::Manual { reason } => reason,
        }
    }

    /// The audit revision this trigger folds in, recorded with the commit.
    pub fn applied_revision(&self) -> Option<(&str, u32)> {
        match self {
            Self::AuditCompleted {
                audit_id, revision, ..
            } => Some((audit_id, *revision)),
            Self::Manual { .. } => None,
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual { .. })
    }
}
