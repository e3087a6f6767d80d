use std::collections::HashSet;

use ledger_events::models::{AuditResult, Evidence, Movement};
use rust_decimal::Decimal;

use crate::errors::RuleCatalogError;
use crate::models::{Evaluation, Rule, RuleKind, RuleSetVersion, RuleVerdict, Severity};

/// Evaluates every rule of `rule_set` against `movement`.
///
/// Pure: the same movement and rule set always produce the same result and
/// the same evidence, in rule-id order.
pub fn evaluate_movement(movement: &Movement, rule_set: &RuleSetVersion) -> Evaluation {
    let mut evidence = Vec::new();
    let mut severities = Vec::new();
    for rule in &rule_set.rules {
        if let RuleVerdict::Violated { severity, detail } = evaluate_rule(rule, movement) {
            severities.push(severity);
            evidence.push(Evidence {
                rule_id: rule.rule_id.clone(),
                detail,
            });
        }
    }
    Evaluation {
        result: aggregate(&severities),
        evidence,
        rule_set_version: rule_set.version,
    }
}

/// Blocking dominates warning dominates clean.
pub fn aggregate(violations: &[Severity]) -> AuditResult {
    if violations.contains(&Severity::Blocking) {
        AuditResult::Rejected
    } else if violations.contains(&Severity::Warning) {
        AuditResult::NeedsReview
    } else {
        AuditResult::Approved
    }
}

pub fn evaluate_rule(rule: &Rule, movement: &Movement) -> RuleVerdict {
    match check(&rule.predicate, movement) {
        None => RuleVerdict::Satisfied,
        Some(detail) => RuleVerdict::Violated {
            severity: rule.severity,
            detail,
        },
    }
}

fn check(predicate: &RuleKind, movement: &Movement) -> Option<String> {
    match predicate {
        RuleKind::RequiredAttachmentTypes { types } => {
            let missing = types
                .iter()
                .filter(|t| !movement.has_attachment_kind(t))
                .map(String::as_str)
                .collect::<Vec<_>>();
            (!missing.is_empty()).then(|| format!("missing {}", missing.join(", ")))
        }
        RuleKind::MinAttachmentCount { min } => (movement.attachments.len() < *min).then(|| {
            format!(
                "{} attachment(s) provided, at least {min} required",
                movement.attachments.len()
            )
        }),
        RuleKind::QuantityRange { min, max } => {
            let q = movement.quantity;
            if let Some(min) = min.filter(|m| q < *m) {
                return Some(format!("quantity {q} {} below minimum {min}", movement.unit));
            }
            if let Some(max) = max.filter(|m| q > *m) {
                return Some(format!("quantity {q} {} above maximum {max}", movement.unit));
            }
            None
        }
        RuleKind::GeolocationRequired => match movement.geo {
            None => Some("geolocation missing".to_string()),
            Some(geo) if !geo.is_valid() => Some(format!(
                "geolocation out of range ({}, {})",
                geo.lat, geo.lon
            )),
            Some(_) => None,
        },
        RuleKind::GeofenceRegion {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        } => match movement.geo {
            None => Some("geolocation missing for geofence check".to_string()),
            Some(geo)
                if geo.lat < *min_lat
                    || geo.lat > *max_lat
                    || geo.lon < *min_lon
                    || geo.lon > *max_lon =>
            {
                Some(format!(
                    "location ({}, {}) outside permitted region",
                    geo.lat, geo.lon
                ))
            }
            Some(_) => None,
        },
        RuleKind::AllowedMovementTypes { types } => (!types.contains(&movement.movement_type))
            .then(|| {
                format!(
                    "movement type {} not permitted",
                    movement.movement_type.as_str()
                )
            }),
        RuleKind::AllowedUnits { units } => (!units
            .iter()
            .any(|u| u.eq_ignore_ascii_case(&movement.unit)))
        .then(|| format!("unit {} not permitted", movement.unit)),
        RuleKind::MaxReportingDelay { max_hours } => {
            let delay_ms = movement.recorded_at - movement.occurred_at.timestamp_millis();
            if delay_ms < 0 {
                return Some("movement timestamp is in the future".to_string());
            }
            let hours = delay_ms / 3_600_000;
            (hours > *max_hours)
                .then(|| format!("reported {hours}h after occurrence, limit {max_hours}h"))
        }
    }
}

pub fn validate_rules(rules: &[Rule]) -> Result<(), RuleCatalogError> {
    if rules.is_empty() {
        return Err(RuleCatalogError::EmptyRuleSet);
    }
    let mut seen = HashSet::new();
    for rule in rules {
        if rule.rule_id.trim().is_empty() {
            return Err(invalid(rule, "rule_id is required"));
        }
        if !seen.insert(rule.rule_id.as_str()) {
            return Err(RuleCatalogError::DuplicateRuleId(rule.rule_id.clone()));
        }
        validate_predicate(rule)?;
    }
    Ok(())
}

fn validate_predicate(rule: &Rule) -> Result<(), RuleCatalogError> {
    match &rule.predicate {
        RuleKind::RequiredAttachmentTypes { types } if types.iter().all(|t| t.trim().is_empty()) => {
            Err(invalid(rule, "at least one attachment type is required"))
        }
        RuleKind::MinAttachmentCount { min } if *min == 0 => {
            Err(invalid(rule, "min must be at least 1"))
        }
        RuleKind::QuantityRange { min: None, max: None } => {
            Err(invalid(rule, "at least one bound is required"))
        }
        RuleKind::QuantityRange {
            min: Some(min),
            max: Some(max),
        } if min > max => Err(invalid(rule, "min exceeds max")),
        RuleKind::QuantityRange { min: Some(min), .. } if *min < Decimal::ZERO => {
            Err(invalid(rule, "min cannot be negative"))
        }
        RuleKind::GeofenceRegion {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        } if !(-90.0..=90.0).contains(min_lat)
            || !(-90.0..=90.0).contains(max_lat)
            || !(-180.0..=180.0).contains(min_lon)
            || !(-180.0..=180.0).contains(max_lon)
            || min_lat > max_lat
            || min_lon > max_lon =>
        {
            Err(invalid(rule, "geofence bounds are invalid"))
        }
        RuleKind::AllowedMovementTypes { types } if types.is_empty() => {
            Err(invalid(rule, "at least one movement type is required"))
        }
        RuleKind::AllowedUnits { units } if units.is_empty() => {
            Err(invalid(rule, "at least one unit is required"))
        }
        RuleKind::MaxReportingDelay { max_hours } if *max_hours <= 0 => {
            Err(invalid(rule, "max_hours must be positive"))
        }
        _ => Ok(()),
    }
}

fn invalid(rule: &Rule, reason: &str) -> RuleCatalogError {
    RuleCatalogError::InvalidRule {
        rule_id: rule.rule_id.clone(),
        reason: reason.to_string(),
    }
}
