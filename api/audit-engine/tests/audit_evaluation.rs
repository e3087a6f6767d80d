use audit_engine::app::{AppState, build_router};
use audit_engine::config::environment::AppConfig;
use audit_engine::module::audit::crud::audit_id_for;
use audit_engine::module::audit::schema::{
    AuditResponse, DeadLettersResponse, ListAuditsResponse, ReplayDeadLetterResponse,
    ReviseAuditRequest,
};
use audit_engine::module::rule_catalog::schema::{ActivationResponse, RuleSetResponse};
use audit_engine::service::evaluation_service::drain_pending;
use audit_engine::service::internal_auth_service::sign_internal_payload;
use axum::Router;
use axum::body::{Body, to_bytes};
use chrono::{TimeZone, Utc};
use http::Request;
use ledger_events::bus::{EventBus, InMemoryBus};
use ledger_events::events::{AUDIT_COMPLETED_TOPIC, AuditCompleted, MovementRecorded};
use ledger_events::models::{AttachmentRef, AuditResult, GeoPoint, Movement, MovementType};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::util::ServiceExt;

fn test_config() -> AppConfig {
    AppConfig {
        rust_env: "test".to_string(),
        api_host: "127.0.0.1".to_string(),
        api_port: 0,
        redis_url: None,
        bus_stream_prefix: "test".to_string(),
        bus_partitions: 4,
        worker_enabled: false,
        worker_poll_ms: 10,
        worker_max_attempts: 2,
        worker_backoff_base_ms: 1,
        worker_backoff_max_ms: 2,
        worker_lease_seconds: 5,
        outbox_relay_interval_ms: 10,
        outbox_batch_size: 50,
        rule_catalog_path: None,
        internal_auth_enabled: false,
        internal_auth_secret: None,
    }
}

struct Harness {
    state: AppState,
    bus: Arc<InMemoryBus>,
}

impl Harness {
    fn new() -> Self {
        let bus = Arc::new(InMemoryBus::new(4));
        let state = AppState::new(test_config(), None).with_bus(bus.clone());
        Self { state, bus }
    }

    fn app(&self) -> Router {
        build_router(self.state.clone())
    }

    async fn record(&self, movement: &Movement) {
        let envelope = MovementRecorded {
            movement: movement.clone(),
        }
        .envelope()
        .unwrap();
        self.bus.publish(&envelope).await.unwrap();
    }

    fn completed(&self) -> Vec<AuditCompleted> {
        self.bus
            .published(AUDIT_COMPLETED_TOPIC)
            .iter()
            .map(|e| e.decode().unwrap())
            .collect()
    }
}

fn rules_body(activate: bool) -> Value {
    json!({
        "description": "baseline",
        "activate": activate,
        "rules": [
            {"rule_id": "R-ATTACH", "description": "certificate required", "severity": "BLOCKING",
             "predicate": {"kind": "required_attachment_types", "types": ["certificate"]}},
            {"rule_id": "R-GEO", "description": "geolocation required", "severity": "WARNING",
             "predicate": {"kind": "geolocation_required"}}
        ]
    })
}

fn movement(id: &str, producer: &str, with_certificate: bool, with_geo: bool) -> Movement {
    let occurred_at = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
    Movement {
        movement_id: id.to_string(),
        producer_id: producer.to_string(),
        commodity_id: "K1".to_string(),
        movement_type: MovementType::Production,
        quantity: Decimal::new(500, 0),
        unit: "kg".to_string(),
        occurred_at,
        geo: with_geo.then_some(GeoPoint {
            lat: -12.5,
            lon: -55.7,
        }),
        attachments: if with_certificate {
            vec![AttachmentRef {
                kind: "certificate".to_string(),
                url: "https://objects.local/cert.pdf".to_string(),
                content_hash: "a".repeat(64),
            }]
        } else {
            Vec::new()
        },
        recorded_at: occurred_at.timestamp_millis() + 60_000,
    }
}

async fn send<T: serde::de::DeserializeOwned>(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (http::StatusCode, T) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn missing_certificate_is_rejected_with_evidence() {
    let h = Harness::new();
    let (status, published) =
        send::<RuleSetResponse>(h.app(), "POST", "/v1/rules/versions", Some(rules_body(true))).await;
    assert_eq!(status, http::StatusCode::CREATED);
    assert!(published.active);

    h.record(&movement("m-1", "P", false, true)).await;
    assert_eq!(drain_pending(&h.state).await.unwrap(), 1);

    let (status, found) = send::<AuditResponse>(h.app(), "GET", "/v1/audits/movement/m-1", None).await;
    assert_eq!(status, http::StatusCode::OK);
    let audit = found.audit.unwrap();
    assert_eq!(audit.result, AuditResult::Rejected);
    assert_eq!(audit.rule_set_version, 1);
    assert_eq!(audit.evidence.len(), 1);
    assert_eq!(audit.evidence[0].rule_id, "R-ATTACH");
    assert_eq!(audit.evidence[0].detail, "missing certificate");

    let completed = h.completed();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].audit_id, audit.audit_id);
    assert_eq!(completed[0].revision, 0);
    assert_eq!(completed[0].rule_set_version, 1);
}

#[tokio::test]
async fn redelivered_movement_keeps_a_single_audit() {
    let h = Harness::new();
    let _ = send::<RuleSetResponse>(h.app(), "POST", "/v1/rules/versions", Some(rules_body(true))).await;

    let m = movement("m-2", "P", true, true);
    h.record(&m).await;
    h.record(&m).await;
    assert_eq!(drain_pending(&h.state).await.unwrap(), 2);

    let (_, listed) = send::<ListAuditsResponse>(h.app(), "GET", "/v1/audits/producer/P", None).await;
    assert_eq!(listed.audits.len(), 1);
    assert_eq!(listed.audits[0].audit_id, audit_id_for("m-2"));
    assert_eq!(listed.audits[0].result, AuditResult::Approved);
    assert!(listed.audits[0].evidence.is_empty());
    assert_eq!(h.completed().len(), 1);
}

#[tokio::test]
async fn missing_rule_set_dead_letters_then_replays() {
    let h = Harness::new();
    h.record(&movement("m-3", "P", true, true)).await;
    assert_eq!(drain_pending(&h.state).await.unwrap(), 1);

    let (status, _) = send::<AuditResponse>(h.app(), "GET", "/v1/audits/movement/m-3", None).await;
    assert_eq!(status, http::StatusCode::NOT_FOUND);
    assert!(h.completed().is_empty());

    let (_, letters) = send::<DeadLettersResponse>(h.app(), "GET", "/v1/audits/dead-letters", None).await;
    assert_eq!(letters.dead_letters.len(), 1);
    assert_eq!(letters.dead_letters[0].error_code, "RULE_EVALUATION_FAILURE");
    assert_eq!(letters.dead_letters[0].attempts, 2);

    let _ = send::<RuleSetResponse>(h.app(), "POST", "/v1/rules/versions", Some(rules_body(true))).await;
    let (status, replay) = send::<ReplayDeadLetterResponse>(
        h.app(),
        "POST",
        "/v1/audits/dead-letters/m-3/replay",
        None,
    )
    .await;
    assert_eq!(status, http::StatusCode::OK);
    assert!(replay.requeued);

    drain_pending(&h.state).await.unwrap();
    let (status, found) = send::<AuditResponse>(h.app(), "GET", "/v1/audits/movement/m-3", None).await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(found.audit.unwrap().result, AuditResult::Approved);

    let (status, _) = send::<ReplayDeadLetterResponse>(
        h.app(),
        "POST",
        "/v1/audits/dead-letters/m-3/replay",
        None,
    )
    .await;
    assert_eq!(status, http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn needs_review_is_revised_exactly_once() {
    let h = Harness::new();
    let _ = send::<RuleSetResponse>(h.app(), "POST", "/v1/rules/versions", Some(rules_body(true))).await;
    h.record(&movement("m-4", "P", true, false)).await;
    drain_pending(&h.state).await.unwrap();

    let (_, pending) = send::<ListAuditsResponse>(h.app(), "GET", "/v1/audits/pending-review", None).await;
    assert_eq!(pending.audits.len(), 1);
    let audit_id = pending.audits[0].audit_id.clone();
    assert_eq!(pending.audits[0].evidence[0].rule_id, "R-GEO");

    let uri = format!("/v1/audits/{audit_id}/revision");
    let (status, revised) = send::<AuditResponse>(
        h.app(),
        "POST",
        &uri,
        Some(json!({"reviewer_id": "rev-1", "approved": true, "notes": "field visit ok"})),
    )
    .await;
    assert_eq!(status, http::StatusCode::OK);
    let revised = revised.audit.unwrap();
    assert_eq!(revised.result, AuditResult::Approved);
    assert_eq!(revised.reviewer_id.as_deref(), Some("rev-1"));
    assert_eq!(revised.review_notes.as_deref(), Some("field visit ok"));
    assert_eq!(revised.revision, 1);
    assert!(revised.reviewed_at.is_some());

    let (status, second) = send::<AuditResponse>(
        h.app(),
        "POST",
        &uri,
        Some(json!({"reviewer_id": "rev-2", "approved": false})),
    )
    .await;
    assert_eq!(status, http::StatusCode::CONFLICT);
    assert_eq!(second.error_code.as_deref(), Some("INVALID_TRANSITION"));

    let completed = h.completed();
    assert_eq!(completed.len(), 2);
    assert_eq!(completed[1].result, AuditResult::Approved);
    assert_eq!(completed[1].revision, 1);
    assert_eq!(completed[1].processed_at, completed[0].processed_at);

    let (_, pending) = send::<ListAuditsResponse>(h.app(), "GET", "/v1/audits/pending-review", None).await;
    assert!(pending.audits.is_empty());
}

#[tokio::test]
async fn terminal_audits_refuse_revision() {
    let h = Harness::new();
    let _ = send::<RuleSetResponse>(h.app(), "POST", "/v1/rules/versions", Some(rules_body(true))).await;
    h.record(&movement("m-5", "P", false, true)).await;
    drain_pending(&h.state).await.unwrap();

    let uri = format!("/v1/audits/{}/revision", audit_id_for("m-5"));
    let (status, body) = send::<AuditResponse>(
        h.app(),
        "POST",
        &uri,
        Some(json!({"reviewer_id": "rev-1", "approved": true})),
    )
    .await;
    assert_eq!(status, http::StatusCode::CONFLICT);
    assert_eq!(body.error_code.as_deref(), Some("INVALID_TRANSITION"));

    let (status, body) = send::<AuditResponse>(
        h.app(),
        "POST",
        "/v1/audits/aud-unknown/revision",
        Some(json!({"reviewer_id": "rev-1", "approved": true})),
    )
    .await;
    assert_eq!(status, http::StatusCode::NOT_FOUND);
    assert_eq!(body.error_code.as_deref(), Some("AUDIT_NOT_FOUND"));
}

#[tokio::test]
async fn audits_stay_pinned_to_the_version_they_used() {
    let h = Harness::new();
    let _ = send::<RuleSetResponse>(h.app(), "POST", "/v1/rules/versions", Some(rules_body(true))).await;
    h.record(&movement("m-6", "P", false, true)).await;
    drain_pending(&h.state).await.unwrap();

    let relaxed = json!({
        "activate": true,
        "rules": [
            {"rule_id": "R-GEO", "description": "geolocation required", "severity": "WARNING",
             "predicate": {"kind": "geolocation_required"}}
        ]
    });
    let (_, v2) = send::<RuleSetResponse>(h.app(), "POST", "/v1/rules/versions", Some(relaxed)).await;
    assert_eq!(v2.rule_set.unwrap().version, 2);

    h.record(&movement("m-7", "P", false, true)).await;
    drain_pending(&h.state).await.unwrap();

    let (_, first) = send::<AuditResponse>(h.app(), "GET", "/v1/audits/movement/m-6", None).await;
    let (_, second) = send::<AuditResponse>(h.app(), "GET", "/v1/audits/movement/m-7", None).await;
    let first = first.audit.unwrap();
    let second = second.audit.unwrap();
    assert_eq!((first.rule_set_version, first.result), (1, AuditResult::Rejected));
    assert_eq!((second.rule_set_version, second.result), (2, AuditResult::Approved));

    let (_, rejected) =
        send::<ListAuditsResponse>(h.app(), "GET", "/v1/audits/producer/P?result=REPROVADO", None).await;
    assert_eq!(rejected.audits.len(), 1);
    assert_eq!(rejected.audits[0].movement_id, "m-6");

    let (status, bad) =
        send::<ListAuditsResponse>(h.app(), "GET", "/v1/audits/producer/P?result=MAYBE", None).await;
    assert_eq!(status, http::StatusCode::BAD_REQUEST);
    assert_eq!(bad.error_code.as_deref(), Some("INVALID_RESULT_FILTER"));
}

#[tokio::test]
async fn rule_catalog_endpoints_track_versions_and_activation() {
    let h = Harness::new();
    let (status, none) = send::<RuleSetResponse>(h.app(), "GET", "/v1/rules/active", None).await;
    assert_eq!(status, http::StatusCode::NOT_FOUND);
    assert_eq!(none.error_code.as_deref(), Some("NO_ACTIVE_RULE_SET"));

    let (status, first) =
        send::<RuleSetResponse>(h.app(), "POST", "/v1/rules/versions", Some(rules_body(false))).await;
    assert_eq!(status, http::StatusCode::CREATED);
    assert!(!first.active);
    let (status, same) =
        send::<RuleSetResponse>(h.app(), "POST", "/v1/rules/versions", Some(rules_body(false))).await;
    assert_eq!(status, http::StatusCode::OK);
    assert!(!same.created);
    assert_eq!(same.rule_set.unwrap().version, 1);

    let (status, activation) =
        send::<ActivationResponse>(h.app(), "POST", "/v1/rules/versions/1/activate", None).await;
    assert_eq!(status, http::StatusCode::OK);
    let activated_at = activation.activation.unwrap().activated_at;

    let (_, at) = send::<RuleSetResponse>(
        h.app(),
        "GET",
        &format!("/v1/rules/active/at/{activated_at}"),
        None,
    )
    .await;
    assert_eq!(at.rule_set.unwrap().version, 1);
    let (status, _) = send::<RuleSetResponse>(
        h.app(),
        "GET",
        &format!("/v1/rules/active/at/{}", activated_at - 1),
        None,
    )
    .await;
    assert_eq!(status, http::StatusCode::NOT_FOUND);

    let (status, missing) =
        send::<ActivationResponse>(h.app(), "POST", "/v1/rules/versions/9/activate", None).await;
    assert_eq!(status, http::StatusCode::NOT_FOUND);
    assert_eq!(missing.error_code.as_deref(), Some("RULE_SET_VERSION_NOT_FOUND"));

    let (status, invalid) = send::<RuleSetResponse>(
        h.app(),
        "POST",
        "/v1/rules/versions",
        Some(json!({"rules": []})),
    )
    .await;
    assert_eq!(status, http::StatusCode::BAD_REQUEST);
    assert_eq!(invalid.error_code.as_deref(), Some("INVALID_RULE_SET"));
}

async fn signed_revision(
    app: Router,
    uri: &str,
    body: &str,
    signature: &str,
) -> (http::StatusCode, AuditResponse) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-internal-signature", signature)
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn revision_signature_is_checked_byte_for_byte() {
    let mut config = test_config();
    config.internal_auth_enabled = true;
    config.internal_auth_secret = Some("reviewer-secret".to_string());
    let bus = Arc::new(InMemoryBus::new(4));
    let h = Harness {
        state: AppState::new(config, None).with_bus(bus.clone()),
        bus,
    };
    let _ = send::<RuleSetResponse>(h.app(), "POST", "/v1/rules/versions", Some(rules_body(true))).await;
    h.record(&movement("m-sig", "P", true, false)).await;
    drain_pending(&h.state).await.unwrap();
    let audit_id = audit_id_for("m-sig");
    let uri = format!("/v1/audits/{audit_id}/revision");

    let req = ReviseAuditRequest {
        reviewer_id: "rev-1".to_string(),
        approved: true,
        notes: None,
    };
    let body = serde_json::to_string(&req).unwrap();
    let signature = sign_internal_payload(&body, "reviewer-secret").unwrap();
    let mut flipped = hex::decode(&signature).unwrap();
    flipped[0] ^= 0x80;

    let (status, rejected) = signed_revision(h.app(), &uri, &body, &hex::encode(flipped)).await;
    assert_eq!(status, http::StatusCode::UNAUTHORIZED);
    assert_eq!(rejected.error_code.as_deref(), Some("AUTH_INVALID_SIGNATURE"));

    let (status, rejected) = signed_revision(h.app(), &uri, &body, "not-a-hex-signature").await;
    assert_eq!(status, http::StatusCode::UNAUTHORIZED);
    assert_eq!(rejected.error_code.as_deref(), Some("AUTH_INVALID_SIGNATURE"));
    assert_eq!(h.completed().len(), 1);

    let (status, accepted) = signed_revision(h.app(), &uri, &body, &signature).await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(accepted.audit.unwrap().result, AuditResult::Approved);
}
