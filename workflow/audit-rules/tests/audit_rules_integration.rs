use audit_rules::catalog::RuleCatalog;
use audit_rules::errors::RuleCatalogError;
use audit_rules::handler::{aggregate, evaluate_movement, validate_rules};
use audit_rules::models::{Rule, RuleKind, Severity};
use chrono::{TimeZone, Utc};
use ledger_events::models::{AttachmentRef, AuditResult, GeoPoint, Movement, MovementType};
use rust_decimal::Decimal;

fn movement(attachments: Vec<AttachmentRef>) -> Movement {
    let occurred_at = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
    Movement {
        movement_id: "mov-1".to_string(),
        producer_id: "producer-P".to_string(),
        commodity_id: "soy-lot-9".to_string(),
        movement_type: MovementType::Transport,
        quantity: Decimal::new(500, 0),
        unit: "kg".to_string(),
        occurred_at,
        geo: Some(GeoPoint {
            lat: -12.5,
            lon: -55.7,
        }),
        attachments,
        recorded_at: occurred_at.timestamp_millis() + 3_600_000,
    }
}

fn certificate() -> AttachmentRef {
    AttachmentRef {
        kind: "certificate".to_string(),
        url: "https://files.example.org/cert.pdf".to_string(),
        content_hash: "ab".repeat(32),
    }
}

fn rule(id: &str, severity: Severity, predicate: RuleKind) -> Rule {
    Rule {
        rule_id: id.to_string(),
        version: 1,
        description: format!("{id} check"),
        severity,
        predicate,
    }
}

fn standard_rules() -> Vec<Rule> {
    vec![
        rule(
            "R-ATTACH",
            Severity::Blocking,
            RuleKind::RequiredAttachmentTypes {
                types: vec!["certificate".to_string()],
            },
        ),
        rule(
            "R-QTY",
            Severity::Warning,
            RuleKind::QuantityRange {
                min: Some(Decimal::ZERO),
                max: Some(Decimal::new(10_000, 0)),
            },
        ),
        rule("R-GEO", Severity::Warning, RuleKind::GeolocationRequired),
    ]
}

#[test]
fn missing_certificate_rejects_with_single_evidence() {
    let mut catalog = RuleCatalog::default();
    let (version, _) = catalog.publish(standard_rules(), None, 0).unwrap();

    let evaluation = evaluate_movement(&movement(vec![]), &version);
    assert_eq!(evaluation.result, AuditResult::Rejected);
    assert_eq!(evaluation.rule_set_version, 1);
    assert_eq!(evaluation.evidence.len(), 1);
    assert_eq!(evaluation.evidence[0].rule_id, "R-ATTACH");
    assert_eq!(evaluation.evidence[0].detail, "missing certificate");
}

#[test]
fn clean_movement_is_approved_with_empty_evidence() {
    let mut catalog = RuleCatalog::default();
    let (version, _) = catalog.publish(standard_rules(), None, 0).unwrap();

    let evaluation = evaluate_movement(&movement(vec![certificate()]), &version);
    assert_eq!(evaluation.result, AuditResult::Approved);
    assert!(evaluation.evidence.is_empty());
}

#[test]
fn only_warnings_need_review() {
    let mut catalog = RuleCatalog::default();
    let (version, _) = catalog.publish(standard_rules(), None, 0).unwrap();
    let mut m = movement(vec![certificate()]);
    m.geo = None;
    m.quantity = Decimal::new(20_000, 0);

    let evaluation = evaluate_movement(&m, &version);
    assert_eq!(evaluation.result, AuditResult::NeedsReview);
    let ids = evaluation
        .evidence
        .iter()
        .map(|e| e.rule_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, ["R-GEO", "R-QTY"]);
}

#[test]
fn blocking_overrides_any_number_of_warnings() {
    assert_eq!(
        aggregate(&[
            Severity::Warning,
            Severity::Warning,
            Severity::Blocking,
            Severity::Warning
        ]),
        AuditResult::Rejected
    );
    assert_eq!(aggregate(&[Severity::Warning]), AuditResult::NeedsReview);
    assert_eq!(aggregate(&[]), AuditResult::Approved);
}

#[test]
fn evaluation_is_deterministic_across_retries() {
    let mut catalog = RuleCatalog::default();
    let (version, _) = catalog.publish(standard_rules(), None, 0).unwrap();
    let mut m = movement(vec![]);
    m.geo = None;

    let first = evaluate_movement(&m, &version);
    for _ in 0..10 {
        assert_eq!(evaluate_movement(&m, &version), first);
    }
}

#[test]
fn pinned_version_is_unaffected_by_later_activation() {
    let mut catalog = RuleCatalog::default();
    let (v1, _) = catalog.publish(standard_rules(), None, 0).unwrap();
    catalog.activate(v1.version, 10).unwrap();
    let pinned = catalog.active().unwrap();

    let relaxed = vec![rule("R-GEO", Severity::Warning, RuleKind::GeolocationRequired)];
    let (v2, _) = catalog.publish(relaxed, None, 20).unwrap();
    catalog.activate(v2.version, 30).unwrap();

    let evaluation = evaluate_movement(&movement(vec![]), &pinned);
    assert_eq!(evaluation.rule_set_version, 1);
    assert_eq!(evaluation.result, AuditResult::Rejected);
    assert_eq!(catalog.active().unwrap().version, 2);
}

#[test]
fn reporting_delay_and_movement_type_rules() {
    let rules = vec![
        rule(
            "R-DELAY",
            Severity::Warning,
            RuleKind::MaxReportingDelay { max_hours: 24 },
        ),
        rule(
            "R-TYPE",
            Severity::Blocking,
            RuleKind::AllowedMovementTypes {
                types: vec![MovementType::Production, MovementType::Storage],
            },
        ),
    ];
    let mut catalog = RuleCatalog::default();
    let (version, _) = catalog.publish(rules, None, 0).unwrap();

    let mut late = movement(vec![]);
    late.movement_type = MovementType::Storage;
    late.recorded_at += 48 * 3_600_000;
    let evaluation = evaluate_movement(&late, &version);
    assert_eq!(evaluation.result, AuditResult::NeedsReview);
    assert_eq!(evaluation.evidence[0].rule_id, "R-DELAY");

    let evaluation = evaluate_movement(&movement(vec![]), &version);
    assert_eq!(evaluation.result, AuditResult::Rejected);
    assert_eq!(
        evaluation.evidence[0].detail,
        "movement type TRANSPORT not permitted"
    );
}

#[test]
fn geofence_flags_points_outside_region() {
    let rules = vec![rule(
        "R-FENCE",
        Severity::Blocking,
        RuleKind::GeofenceRegion {
            min_lat: -20.0,
            max_lat: -5.0,
            min_lon: -60.0,
            max_lon: -45.0,
        },
    )];
    let mut catalog = RuleCatalog::default();
    let (version, _) = catalog.publish(rules, None, 0).unwrap();

    assert_eq!(
        evaluate_movement(&movement(vec![]), &version).result,
        AuditResult::Approved
    );
    let mut outside = movement(vec![]);
    outside.geo = Some(GeoPoint { lat: 10.0, lon: -50.0 });
    assert_eq!(
        evaluate_movement(&outside, &version).result,
        AuditResult::Rejected
    );
}

#[test]
fn invalid_rule_sets_are_refused() {
    assert_eq!(validate_rules(&[]), Err(RuleCatalogError::EmptyRuleSet));

    let dup = vec![
        rule("R-1", Severity::Warning, RuleKind::GeolocationRequired),
        rule("R-1", Severity::Warning, RuleKind::GeolocationRequired),
    ];
    assert_eq!(
        validate_rules(&dup),
        Err(RuleCatalogError::DuplicateRuleId("R-1".to_string()))
    );

    let inverted = vec![rule(
        "R-Q",
        Severity::Warning,
        RuleKind::QuantityRange {
            min: Some(Decimal::new(10, 0)),
            max: Some(Decimal::new(1, 0)),
        },
    )];
    assert!(matches!(
        validate_rules(&inverted),
        Err(RuleCatalogError::InvalidRule { .. })
    ));
}

#[test]
fn rule_sets_round_trip_through_json_config() {
    let raw = r#"[
        {"rule_id": "R-ATTACH", "description": "certificate required", "severity": "BLOCKING",
         "predicate": {"kind": "required_attachment_types", "types": ["certificate"]}},
        {"rule_id": "R-QTY", "description": "quantity range", "severity": "WARNING",
         "predicate": {"kind": "quantity_range", "min": "0", "max": "10000"}}
    ]"#;
    let rules: Vec<Rule> = serde_json::from_str(raw).unwrap();
    assert_eq!(rules[0].version, 1);
    assert!(validate_rules(&rules).is_ok());
}
