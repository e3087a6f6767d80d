//! Ingestion, audit and scoring wired on one in-memory bus.

use axum::Router;
use axum::body::{Body, to_bytes};
use certification_scoring::module::certification::schema::{
    CertificationResponse, TierHistoryResponse,
};
use http::Request;
use ledger_events::bus::InMemoryBus;
use ledger_events::events::{AUDIT_COMPLETED_TOPIC, MOVEMENT_RECORDED_TOPIC, TIER_CHANGED_TOPIC};
use ledger_events::models::{AuditResult, CertificationTier};
use movement_ingestion::module::movement::schema::CreateMovementResponse;
use movement_ingestion::service::attachment_service::InMemoryAttachmentStore;
use seal_scoring::models::ScoringPolicy;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::util::ServiceExt;

const CERT_URL: &str = "https://objects.local/p/certificate.pdf";

fn ingestion_config() -> movement_ingestion::config::environment::AppConfig {
    movement_ingestion::config::environment::AppConfig {
        rust_env: "test".to_string(),
        api_host: "127.0.0.1".to_string(),
        api_port: 0,
        redis_url: None,
        bus_stream_prefix: "test".to_string(),
        bus_partitions: 4,
        idempotency_ttl_seconds: 3600,
        idempotency_gc_interval_seconds: 60,
        worker_enabled: false,
        worker_backoff_base_ms: 1,
        worker_backoff_max_ms: 2,
        outbox_relay_interval_ms: 10,
        outbox_batch_size: 50,
        attachment_verify_enabled: true,
        attachment_max_count: 3,
        attachment_allowed_types: vec!["certificate".to_string()],
        movement_types: Vec::new(),
        downstream_timeout_ms: 1_000,
        internal_auth_enabled: false,
        internal_auth_secret: None,
    }
}

fn audit_config() -> audit_engine::config::environment::AppConfig {
    audit_engine::config::environment::AppConfig {
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

fn scoring_config() -> certification_scoring::config::environment::AppConfig {
    certification_scoring::config::environment::AppConfig {
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
        scoring_policy: ScoringPolicy::default(),
        log_reassessments: false,
        scoring_max_cas_retries: 5,
        internal_auth_enabled: false,
        internal_auth_secret: None,
    }
}

struct Pipeline {
    bus: Arc<InMemoryBus>,
    objects: Arc<InMemoryAttachmentStore>,
    ingestion: movement_ingestion::app::AppState,
    audit: audit_engine::app::AppState,
    scoring: certification_scoring::app::AppState,
}

impl Pipeline {
    fn new() -> Self {
        let bus = Arc::new(InMemoryBus::new(4));
        let objects = Arc::new(InMemoryAttachmentStore::default());
        Self {
            ingestion: movement_ingestion::app::AppState::new(ingestion_config(), None)
                .with_bus(bus.clone())
                .with_attachment_store(objects.clone()),
            audit: audit_engine::app::AppState::new(audit_config(), None).with_bus(bus.clone()),
            scoring: certification_scoring::app::AppState::new(scoring_config(), None)
                .with_bus(bus.clone()),
            bus,
            objects,
        }
    }

    fn ingestion_app(&self) -> Router {
        movement_ingestion::app::build_router(self.ingestion.clone())
    }

    fn audit_app(&self) -> Router {
        audit_engine::app::build_router(self.audit.clone())
    }

    fn scoring_app(&self) -> Router {
        certification_scoring::app::build_router(self.scoring.clone())
    }

    /// Runs audit then scoring until both consumer groups are caught up.
    async fn settle(&self) {
        audit_engine::service::evaluation_service::drain_pending(&self.audit)
            .await
            .unwrap();
        certification_scoring::service::scoring_service::drain_pending(&self.scoring)
            .await
            .unwrap();
    }
}

async fn send<T: serde::de::DeserializeOwned>(
    app: Router,
    method: &str,
    uri: &str,
    key: Option<&str>,
    body: Option<Value>,
) -> (http::StatusCode, T) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("Idempotency-Key", key);
    }
    let request = builder
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn movement(attachments: Value) -> Value {
    json!({
        "producer_id": "P",
        "commodity_id": "soy",
        "movement_type": "PRODUCTION",
        "quantity": 500,
        "unit": "kg",
        "timestamp": "2026-03-01T10:00:00Z",
        "geo": {"lat": -12.5, "lon": -55.7},
        "attachments": attachments
    })
}

#[tokio::test]
async fn rejected_movement_keeps_bronze_and_resubmission_is_idempotent() {
    let p = Pipeline::new();
    let (status, _) = send::<Value>(
        p.audit_app(),
        "POST",
        "/v1/rules/versions",
        None,
        Some(json!({
            "description": "baseline",
            "activate": true,
            "rules": [
                {"rule_id": "R-ATTACH", "description": "certificate required", "severity": "BLOCKING",
                 "predicate": {"kind": "required_attachment_types", "types": ["certificate"]}},
                {"rule_id": "R-GEO", "description": "geolocation required", "severity": "WARNING",
                 "predicate": {"kind": "geolocation_required"}}
            ]
        })),
    )
    .await;
    assert_eq!(status, http::StatusCode::CREATED);

    let digest = p.objects.put(CERT_URL, b"certificate bytes");
    let certified = json!([{"kind": "certificate", "url": CERT_URL, "content_hash": digest}]);
    for i in 0..7 {
        let key = format!("approved-{i}");
        let (status, _) = send::<CreateMovementResponse>(
            p.ingestion_app(),
            "POST",
            "/v1/movements",
            Some(&key),
            Some(movement(certified.clone())),
        )
        .await;
        assert_eq!(status, http::StatusCode::OK);
        p.settle().await;
    }
    for i in 0..2 {
        let key = format!("rejected-{i}");
        send::<CreateMovementResponse>(
            p.ingestion_app(),
            "POST",
            "/v1/movements",
            Some(&key),
            Some(movement(json!([]))),
        )
        .await;
        p.settle().await;
    }

    let (_, before) =
        send::<CertificationResponse>(p.scoring_app(), "GET", "/v1/certifications/P", None, None)
            .await;
    let before = before.certification.unwrap();
    assert_eq!(before.tier, CertificationTier::Bronze);
    let (_, history) = send::<TierHistoryResponse>(
        p.scoring_app(),
        "GET",
        "/v1/certifications/P/history",
        None,
        None,
    )
    .await;
    let trail_len = history.changes.len();
    assert_eq!(history.changes.last().unwrap().new_tier, CertificationTier::Bronze);

    let (status, first) = send::<CreateMovementResponse>(
        p.ingestion_app(),
        "POST",
        "/v1/movements",
        Some("K1"),
        Some(movement(json!([]))),
    )
    .await;
    assert_eq!(status, http::StatusCode::OK);
    p.settle().await;

    let (status, audit) = send::<Value>(
        p.audit_app(),
        "GET",
        &format!("/v1/audits/movement/{}", first.movement_id),
        None,
        None,
    )
    .await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(audit["audit"]["result"], json!(AuditResult::Rejected.as_str()));
    assert_eq!(
        audit["audit"]["evidence"],
        json!([{"rule_id": "R-ATTACH", "detail": "missing certificate"}])
    );

    let (_, after) =
        send::<CertificationResponse>(p.scoring_app(), "GET", "/v1/certifications/P", None, None)
            .await;
    let after = after.certification.unwrap();
    assert_eq!(after.score, 70);
    assert_eq!(after.tier, CertificationTier::Bronze);
    let (_, history) = send::<TierHistoryResponse>(
        p.scoring_app(),
        "GET",
        "/v1/certifications/P/history",
        None,
        None,
    )
    .await;
    assert_eq!(history.changes.len(), trail_len);

    let (status, second) = send::<CreateMovementResponse>(
        p.ingestion_app(),
        "POST",
        "/v1/movements",
        Some("K1"),
        Some(movement(json!([]))),
    )
    .await;
    assert_eq!(status, http::StatusCode::OK);
    assert!(second.idempotent);
    assert_eq!(second.movement_id, first.movement_id);
    p.settle().await;

    assert_eq!(p.bus.published(MOVEMENT_RECORDED_TOPIC).len(), 10);
    assert_eq!(p.bus.published(AUDIT_COMPLETED_TOPIC).len(), 10);
    assert_eq!(p.bus.published(TIER_CHANGED_TOPIC).len(), trail_len);
}
