use ledger_events::models::{AuditResult, CertificationStatus, CertificationTier};

use crate::errors::ScoringError;
use crate::models::{AuditOutcome, ScoreOutcome, ScoringPolicy};

const DAY_MS: i64 = 86_400_000;

pub fn validate_policy(policy: &ScoringPolicy) -> Result<(), ScoringError> {
    let thresholds = [
        policy.bronze_threshold,
        policy.silver_threshold,
        policy.gold_threshold,
        policy.diamond_threshold,
    ];
    if thresholds.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ScoringError::InvalidPolicy(
            "tier thresholds must be strictly ascending".to_string(),
        ));
    }
    let max_points = policy
        .approved_points
        .max(policy.needs_review_points)
        .max(policy.rejected_points);
    if policy.bronze_threshold == 0 || policy.bronze_threshold > max_points {
        return Err(ScoringError::InvalidPolicy(format!(
            "bronze threshold must be between 1 and {max_points}"
        )));
    }
    if policy.validity_days <= 0 {
        return Err(ScoringError::InvalidPolicy(
            "validity_days must be positive".to_string(),
        ));
    }
    Ok(())
}

pub fn tier_for_score(score: u32, policy: &ScoringPolicy) -> CertificationTier {
    if score >= policy.diamond_threshold {
        CertificationTier::Diamond
    } else if score >= policy.gold_threshold {
        CertificationTier::Gold
    } else if score >= policy.silver_threshold {
        CertificationTier::Silver
    } else if score >= policy.bronze_threshold {
        CertificationTier::Bronze
    } else {
        CertificationTier::None
    }
}

pub fn points_for(result: AuditResult, policy: &ScoringPolicy) -> u32 {
    match result {
        AuditResult::Approved => policy.approved_points,
        AuditResult::NeedsReview => policy.needs_review_points,
        AuditResult::Rejected => policy.rejected_points,
    }
}

/// Score, tier and status as a pure function of audit history.
///
/// The input order does not matter: outcomes are ordered by processing time
/// (audit id breaks ties) before the window is applied. The score is the
/// rounded mean of per-result points over the window.
pub fn compute_score(
    history: &[AuditOutcome],
    policy: &ScoringPolicy,
) -> Result<ScoreOutcome, ScoringError> {
    validate_policy(policy)?;

    let mut ordered = history.iter().collect::<Vec<_>>();
    ordered.sort_by(|a, b| {
        a.processed_at
            .cmp(&b.processed_at)
            .then_with(|| a.audit_id.cmp(&b.audit_id))
    });
    let start = match policy.window {
        0 => 0,
        n => ordered.len().saturating_sub(n),
    };
    let window = &ordered[start..];

    if let Some(missing) = window.iter().find(|o| o.rule_set_version == 0) {
        return Err(ScoringError::MissingRuleSetVersion {
            audit_id: missing.audit_id.clone(),
        });
    }

    let Some(latest) = window.last() else {
        return Ok(ScoreOutcome {
            score: 0,
            tier: CertificationTier::None,
            status: CertificationStatus::Suspended,
            audits_considered: 0,
            pending_reviews: 0,
            valid_until: None,
        });
    };

    let total: u64 = window
        .iter()
        .map(|o| u64::from(points_for(o.result, policy)))
        .sum();
    let count = window.len() as u64;
    let score = ((total + count / 2) / count) as u32;
    let tier = tier_for_score(score, policy);
    let pending_reviews = window
        .iter()
        .filter(|o| o.result == AuditResult::NeedsReview)
        .count();

    let status = if tier > CertificationTier::None {
        CertificationStatus::Active
    } else if pending_reviews > 0 {
        CertificationStatus::Suspended
    } else {
        CertificationStatus::Revoked
    };
    let valid_until = (tier > CertificationTier::None).then(|| {
        latest
            .processed_at
            .saturating_add(policy.validity_days.saturating_mul(DAY_MS))
    });

    Ok(ScoreOutcome {
        score,
        tier,
        status,
        audits_considered: window.len(),
        pending_reviews,
        valid_until,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str, result: AuditResult, at: i64) -> AuditOutcome {
        AuditOutcome {
            audit_id: id.to_string(),
            movement_id: format!("mov-{id}"),
            result,
            rule_set_version: 1,
            revision: 0,
            processed_at: at,
        }
    }

    #[test]
    fn thresholds_map_to_tiers() {
        let policy = ScoringPolicy::default();
        assert_eq!(tier_for_score(0, &policy), CertificationTier::None);
        assert_eq!(tier_for_score(69, &policy), CertificationTier::None);
        assert_eq!(tier_for_score(70, &policy), CertificationTier::Bronze);
        assert_eq!(tier_for_score(80, &policy), CertificationTier::Silver);
        assert_eq!(tier_for_score(90, &policy), CertificationTier::Gold);
        assert_eq!(tier_for_score(95, &policy), CertificationTier::Diamond);
        assert_eq!(tier_for_score(100, &policy), CertificationTier::Diamond);
    }

    #[test]
    fn score_is_rounded_mean() {
        let history = vec![
            outcome("a", AuditResult::Approved, 1),
            outcome("b", AuditResult::Approved, 2),
            outcome("c", AuditResult::NeedsReview, 3),
        ];
        let result = compute_score(&history, &ScoringPolicy::default()).unwrap();
        // (100 + 100 + 60) / 3 = 86.67
        assert_eq!(result.score, 87);
        assert_eq!(result.tier, CertificationTier::Silver);
        assert_eq!(result.status, CertificationStatus::Active);
        assert_eq!(result.pending_reviews, 1);
    }

    #[test]
    fn empty_history_is_suspended_without_tier() {
        let result = compute_score(&[], &ScoringPolicy::default()).unwrap();
        assert_eq!(result.tier, CertificationTier::None);
        assert_eq!(result.status, CertificationStatus::Suspended);
        assert_eq!(result.valid_until, None);
    }

    #[test]
    fn failing_history_is_revoked_unless_reviews_pending() {
        let rejected = vec![outcome("a", AuditResult::Rejected, 1)];
        let result = compute_score(&rejected, &ScoringPolicy::default()).unwrap();
        assert_eq!(result.status, CertificationStatus::Revoked);

        let pending = vec![
            outcome("a", AuditResult::Rejected, 1),
            outcome("b", AuditResult::NeedsReview, 2),
        ];
        let result = compute_score(&pending, &ScoringPolicy::default()).unwrap();
        assert_eq!(result.score, 30);
        assert_eq!(result.status, CertificationStatus::Suspended);
    }

    #[test]
    fn window_keeps_most_recent_audits() {
        let policy = ScoringPolicy {
            window: 2,
            ..ScoringPolicy::default()
        };
        let history = vec![
            outcome("old", AuditResult::Rejected, 1),
            outcome("new-1", AuditResult::Approved, 5),
            outcome("new-2", AuditResult::Approved, 6),
        ];
        let result = compute_score(&history, &policy).unwrap();
        assert_eq!(result.score, 100);
        assert_eq!(result.audits_considered, 2);
    }

    #[test]
    fn input_order_does_not_change_result() {
        let mut history = vec![
            outcome("a", AuditResult::Approved, 3),
            outcome("b", AuditResult::Rejected, 1),
            outcome("c", AuditResult::NeedsReview, 2),
        ];
        let policy = ScoringPolicy {
            window: 2,
            ..ScoringPolicy::default()
        };
        let first = compute_score(&history, &policy).unwrap();
        history.reverse();
        assert_eq!(compute_score(&history, &policy).unwrap(), first);
    }

    #[test]
    fn validity_runs_from_latest_audit() {
        let history = vec![outcome("a", AuditResult::Approved, 1_000)];
        let result = compute_score(&history, &ScoringPolicy::default()).unwrap();
        assert_eq!(result.valid_until, Some(1_000 + 180 * DAY_MS));
    }

    #[test]
    fn huge_validity_saturates_instead_of_overflowing() {
        let policy = ScoringPolicy {
            validity_days: i64::MAX,
            ..ScoringPolicy::default()
        };
        let history = vec![outcome("a", AuditResult::Approved, 1_000)];
        let result = compute_score(&history, &policy).unwrap();
        assert_eq!(result.valid_until, Some(i64::MAX));
    }

    #[test]
    fn missing_rule_set_version_fails_loud() {
        let mut bad = outcome("a", AuditResult::Approved, 1);
        bad.rule_set_version = 0;
        assert_eq!(
            compute_score(&[bad], &ScoringPolicy::default()),
            Err(ScoringError::MissingRuleSetVersion {
                audit_id: "a".to_string()
            })
        );
    }

    #[test]
    fn non_ascending_thresholds_are_rejected() {
        let policy = ScoringPolicy {
            silver_threshold: 60,
            ..ScoringPolicy::default()
        };
        assert!(matches!(
            compute_score(&[], &policy),
            Err(ScoringError::InvalidPolicy(_))
        ));
    }
}
