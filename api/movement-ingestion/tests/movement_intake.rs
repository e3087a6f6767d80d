use axum::Router;
use axum::body::{Body, to_bytes};
use http::Request;
use ledger_events::bus::InMemoryBus;
use ledger_events::events::{MOVEMENT_RECORDED_TOPIC, MovementRecorded};
use ledger_events::models::MovementType;
use movement_ingestion::app::{AppState, build_router};
use movement_ingestion::config::environment::AppConfig;
use movement_ingestion::module::movement::schema::{
    CreateMovementResponse, GetMovementResponse, HealthResponse, ListMovementsResponse,
};
use movement_ingestion::service::attachment_service::InMemoryAttachmentStore;
use movement_ingestion::service::outbox_service;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

const CERT_URL: &str = "https://objects.local/k1/certificate.pdf";

fn test_config() -> AppConfig {
    AppConfig {
        rust_env: "test".to_string(),
        api_host: "127.0.0.1".to_string(),
        api_port: 0,
        redis_url: None,
        bus_stream_prefix: "test".to_string(),
        bus_partitions: 4,
        idempotency_ttl_seconds: 3600,
        idempotency_gc_interval_seconds: 60,
        worker_enabled: false,
        worker_backoff_base_ms: 10,
        worker_backoff_max_ms: 50,
        outbox_relay_interval_ms: 20,
        outbox_batch_size: 50,
        attachment_verify_enabled: true,
        attachment_max_count: 3,
        attachment_allowed_types: vec!["certificate".to_string(), "invoice".to_string()],
        movement_types: Vec::new(),
        downstream_timeout_ms: 1_000,
        internal_auth_enabled: false,
        internal_auth_secret: None,
    }
}

struct Harness {
    state: AppState,
    bus: Arc<InMemoryBus>,
    objects: Arc<InMemoryAttachmentStore>,
}

impl Harness {
    fn new(config: AppConfig) -> Self {
        let bus = Arc::new(InMemoryBus::new(config.bus_partitions));
        let objects = Arc::new(InMemoryAttachmentStore::default());
        let state = AppState::new(config, None)
            .with_bus(bus.clone())
            .with_attachment_store(objects.clone());
        Self {
            state,
            bus,
            objects,
        }
    }

    fn app(&self) -> Router {
        build_router(self.state.clone())
    }
}

fn movement_body(producer: &str, quantity: Value) -> Value {
    json!({
        "producer_id": producer,
        "commodity_id": "K1",
        "movement_type": "PRODUCTION",
        "quantity": quantity,
        "unit": "kg",
        "timestamp": "2026-03-01T10:00:00Z",
        "geo": {"lat": -12.5, "lon": -55.7}
    })
}

async fn post_movement(app: Router, key: Option<&str>, body: &Value) -> (http::StatusCode, CreateMovementResponse) {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/movements")
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("Idempotency-Key", key);
    }
    let response = app
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get_json<T: serde::de::DeserializeOwned>(app: Router, uri: &str) -> (http::StatusCode, T) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn accepts_movement_and_publishes_it_once() {
    let h = Harness::new(test_config());
    let (status, body) = post_movement(h.app(), Some("key-accept"), &movement_body("P1", json!("500"))).await;

    assert_eq!(status, http::StatusCode::OK);
    assert!(body.accepted);
    assert!(!body.idempotent);
    assert!(!body.movement_id.is_empty());

    let events = h.bus.published(MOVEMENT_RECORDED_TOPIC);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_id, body.movement_id);
    assert_eq!(events[0].partition_key, "P1");
    let payload: MovementRecorded = events[0].decode().unwrap();
    assert_eq!(payload.movement.movement_type, MovementType::Production);
    assert_eq!(payload.movement.quantity.to_string(), "500");
}

#[tokio::test]
async fn same_key_and_payload_returns_original_movement() {
    let h = Harness::new(test_config());
    let body = movement_body("P2", json!(500));
    let first = post_movement(h.app(), Some("key-replay"), &body).await;
    let second = post_movement(h.app(), Some("key-replay"), &body).await;

    assert_eq!(second.0, http::StatusCode::OK);
    assert_eq!(first.1.movement_id, second.1.movement_id);
    assert_eq!(first.1.recorded_at, second.1.recorded_at);
    assert!(second.1.idempotent);
    assert_eq!(h.bus.published(MOVEMENT_RECORDED_TOPIC).len(), 1);
}

#[tokio::test]
async fn equivalent_quantity_spelling_is_the_same_payload() {
    let h = Harness::new(test_config());
    let first = post_movement(h.app(), Some("key-scale"), &movement_body("P3", json!("500.00"))).await;
    let second = post_movement(h.app(), Some("key-scale"), &movement_body("P3", json!("500"))).await;

    assert_eq!(second.0, http::StatusCode::OK);
    assert_eq!(first.1.movement_id, second.1.movement_id);
}

#[tokio::test]
async fn same_key_with_different_payload_is_a_conflict() {
    let h = Harness::new(test_config());
    let _ = post_movement(h.app(), Some("key-conflict"), &movement_body("P4", json!(500))).await;
    let (status, body) =
        post_movement(h.app(), Some("key-conflict"), &movement_body("P4", json!(501))).await;

    assert_eq!(status, http::StatusCode::CONFLICT);
    assert!(!body.accepted);
    assert_eq!(body.error_code.as_deref(), Some("IDEMPOTENCY_CONFLICT"));
    assert_eq!(h.bus.published(MOVEMENT_RECORDED_TOPIC).len(), 1);
}

#[tokio::test]
async fn body_idempotency_key_is_honoured_without_header() {
    let h = Harness::new(test_config());
    let mut body = movement_body("P5", json!(10));
    body["idempotencyKey"] = json!("body-key");
    let first = post_movement(h.app(), None, &body).await;
    let second = post_movement(h.app(), None, &body).await;

    assert_eq!(first.1.movement_id, second.1.movement_id);
    assert!(second.1.idempotent);
}

#[tokio::test]
async fn requests_without_key_create_distinct_movements() {
    let h = Harness::new(test_config());
    let body = movement_body("P6", json!(10));
    let first = post_movement(h.app(), None, &body).await;
    let second = post_movement(h.app(), None, &body).await;

    assert_ne!(first.1.movement_id, second.1.movement_id);
    assert_eq!(h.bus.published(MOVEMENT_RECORDED_TOPIC).len(), 2);
}

#[tokio::test]
async fn rejects_invalid_payloads_without_recording() {
    let h = Harness::new(test_config());
    let cases = [
        (movement_body("P7", json!(0)), "INVALID_QUANTITY"),
        (movement_body("", json!(1)), "INVALID_PRODUCER_ID"),
        (
            {
                let mut b = movement_body("P7", json!(1));
                b["movement_type"] = json!("TELEPORT");
                b
            },
            "INVALID_MOVEMENT_TYPE",
        ),
        (
            {
                let mut b = movement_body("P7", json!(1));
                b["timestamp"] = json!("yesterday");
                b
            },
            "INVALID_TIMESTAMP",
        ),
        (
            {
                let mut b = movement_body("P7", json!(1));
                b["geo"] = json!({"lat": 91.0, "lon": 0.0});
                b
            },
            "INVALID_GEOLOCATION",
        ),
        (
            {
                let mut b = movement_body("P7", json!(1));
                b["attachments"] = json!([{"kind": "photo", "url": CERT_URL, "content_hash": "ab".repeat(32)}]);
                b
            },
            "INVALID_ATTACHMENT_TYPE",
        ),
        (
            {
                let mut b = movement_body("P7", json!(1));
                b["attachments"] = json!([{"kind": "certificate", "url": CERT_URL, "content_hash": "xyz"}]);
                b
            },
            "INVALID_ATTACHMENT_HASH",
        ),
    ];

    for (body, code) in cases {
        let (status, resp) = post_movement(h.app(), None, &body).await;
        assert_eq!(status, http::StatusCode::BAD_REQUEST, "{code}");
        assert_eq!(resp.error_code.as_deref(), Some(code));
    }
    assert!(h.bus.published(MOVEMENT_RECORDED_TOPIC).is_empty());
}

#[tokio::test]
async fn verifies_attachment_digests_against_object_store() {
    let h = Harness::new(test_config());
    let digest = h.objects.put(CERT_URL, b"certificate bytes");

    let mut good = movement_body("P8", json!(5));
    good["attachments"] = json!([{"tipo": "certificate", "url": CERT_URL, "hash": digest.to_uppercase()}]);
    let (status, _) = post_movement(h.app(), None, &good).await;
    assert_eq!(status, http::StatusCode::OK);

    let mut mismatch = movement_body("P8", json!(5));
    mismatch["attachments"] = json!([{"kind": "certificate", "url": CERT_URL, "content_hash": "0".repeat(64)}]);
    let (status, body) = post_movement(h.app(), None, &mismatch).await;
    assert_eq!(status, http::StatusCode::BAD_REQUEST);
    assert_eq!(body.error_code.as_deref(), Some("ATTACHMENT_HASH_MISMATCH"));

    let mut missing = movement_body("P8", json!(5));
    missing["attachments"] = json!([{"kind": "invoice", "url": "https://objects.local/none.pdf", "content_hash": "1".repeat(64)}]);
    let (_, body) = post_movement(h.app(), None, &missing).await;
    assert_eq!(body.error_code.as_deref(), Some("ATTACHMENT_NOT_FOUND"));
}

#[tokio::test]
async fn failed_publish_stays_in_outbox_until_relayed() {
    let h = Harness::new(test_config());
    h.bus.inject_publish_failures(1);

    let (status, body) = post_movement(h.app(), Some("key-outbox"), &movement_body("P9", json!(7))).await;
    assert_eq!(status, http::StatusCode::OK);
    assert!(h.bus.published(MOVEMENT_RECORDED_TOPIC).is_empty());

    let (_, health) = get_json::<HealthResponse>(h.app(), "/v1/movements/health").await;
    assert_eq!(health.outbox.pending, 1);

    tokio::time::sleep(Duration::from_millis(30)).await;
    let report = outbox_service::relay_now(&h.state).await;
    assert_eq!(report.published, 1);

    let events = h.bus.published(MOVEMENT_RECORDED_TOPIC);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_id, body.movement_id);
    let (_, health) = get_json::<HealthResponse>(h.app(), "/v1/movements/health").await;
    assert_eq!(health.outbox.pending, 0);
}

#[tokio::test]
async fn reads_movements_by_id_producer_and_commodity() {
    let h = Harness::new(test_config());
    let mut early = movement_body("P10", json!(1));
    early["timestamp"] = json!("2026-01-01T00:00:00Z");
    let mut late = movement_body("P10", json!(2));
    late["timestamp"] = json!("2026-02-01T00:00:00Z");
    late["commodity_id"] = json!("K2");
    let (_, first) = post_movement(h.app(), None, &early).await;
    let (_, second) = post_movement(h.app(), None, &late).await;

    let (status, found) =
        get_json::<GetMovementResponse>(h.app(), &format!("/v1/movements/{}", first.movement_id)).await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(found.movement.unwrap().commodity_id, "K1");

    let (status, missing) = get_json::<GetMovementResponse>(h.app(), "/v1/movements/unknown").await;
    assert_eq!(status, http::StatusCode::NOT_FOUND);
    assert_eq!(missing.error_code.as_deref(), Some("MOVEMENT_NOT_FOUND"));

    let (_, all) = get_json::<ListMovementsResponse>(h.app(), "/v1/movements/producer/P10").await;
    let ids = all.movements.iter().map(|m| m.movement_id.clone()).collect::<Vec<_>>();
    assert_eq!(ids, vec![second.movement_id.clone(), first.movement_id.clone()]);

    let (_, filtered) =
        get_json::<ListMovementsResponse>(h.app(), "/v1/movements/producer/P10?commodity_id=K1").await;
    assert_eq!(filtered.movements.len(), 1);

    let (_, ranged) = get_json::<ListMovementsResponse>(
        h.app(),
        "/v1/movements/producer/P10?from=2026-01-15T00:00:00Z&to=2026-03-01T00:00:00Z",
    )
    .await;
    assert_eq!(ranged.movements.len(), 1);
    assert_eq!(ranged.movements[0].movement_id, second.movement_id);

    let (_, by_commodity) = get_json::<ListMovementsResponse>(h.app(), "/v1/movements/commodity/K2").await;
    assert_eq!(by_commodity.movements.len(), 1);

    let (status, bad_range) =
        get_json::<ListMovementsResponse>(h.app(), "/v1/movements/producer/P10?from=soon").await;
    assert_eq!(status, http::StatusCode::BAD_REQUEST);
    assert_eq!(bad_range.error_code.as_deref(), Some("INVALID_RANGE"));
}

#[tokio::test]
async fn expired_idempotency_records_are_purged() {
    let h = Harness::new(test_config());
    let body = movement_body("P11", json!(3));
    let (_, first) = post_movement(h.app(), Some("key-expire"), &body).await;

    let later = ledger_events::now_millis() + 3_601_000;
    let purged =
        movement_ingestion::module::movement::crud::purge_expired_idempotency(&h.state, later).unwrap();
    assert_eq!(purged, 1);

    let (_, second) = post_movement(h.app(), Some("key-expire"), &body).await;
    assert_ne!(first.movement_id, second.movement_id);
    assert!(!second.idempotent);
}

#[tokio::test]
async fn unbounded_retention_keeps_records_without_overflow() {
    let mut config = test_config();
    config.idempotency_ttl_seconds = i64::MAX;
    let h = Harness::new(config);
    let body = movement_body("P12", json!(3));
    let (_, first) = post_movement(h.app(), Some("key-forever"), &body).await;

    let purged =
        movement_ingestion::module::movement::crud::purge_expired_idempotency(&h.state, i64::MAX)
            .unwrap();
    assert_eq!(purged, 0);

    let (_, second) = post_movement(h.app(), Some("key-forever"), &body).await;
    assert!(second.idempotent);
    assert_eq!(first.movement_id, second.movement_id);
}
