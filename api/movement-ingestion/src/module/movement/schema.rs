use ledger_events::models::Movement;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentInput {
    #[serde(alias = "tipo", alias = "type")]
    pub kind: String,
    pub url: String,
    #[serde(alias = "contentHash", alias = "hash")]
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoInput {
    #[serde(alias = "latitude")]
    pub lat: f64,
    #[serde(alias = "longitude")]
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMovementRequest {
    #[serde(alias = "producerId")]
    pub producer_id: String,
    #[serde(alias = "commodityId")]
    pub commodity_id: String,
    #[serde(alias = "type", alias = "tipo")]
    pub movement_type: String,
    #[serde(alias = "quantidade")]
    pub quantity: Decimal,
    #[serde(alias = "unidade")]
    pub unit: String,
    pub timestamp: String,
    #[serde(default, alias = "localizacao")]
    pub geo: Option<GeoInput>,
    #[serde(default, alias = "anexos")]
    pub attachments: Option<Vec<AttachmentInput>>,
    #[serde(default, alias = "idempotencyKey")]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateMovementResponse {
    pub accepted: bool,
    pub idempotent: bool,
    pub movement_id: String,
    pub producer_id: String,
    pub recorded_at: i64,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMovementResponse {
    pub found: bool,
    pub movement: Option<Movement>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListMovementsQuery {
    pub commodity_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMovementsResponse {
    pub found: bool,
    pub movements: Vec<Movement>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxStatsView {
    pub pending: u64,
    pub oldest_pending_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetricsView {
    pub movements_recorded: u64,
    pub idempotent_replays: u64,
    pub idempotency_conflicts: u64,
    pub validation_rejections: u64,
    pub events_published: u64,
    pub publish_failures: u64,
    pub idempotency_records_purged: u64,
    pub last_error_ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub redis_available: bool,
    pub worker_enabled: bool,
    pub attachment_verify_enabled: bool,
    pub outbox: OutboxStatsView,
    pub metrics: HealthMetricsView,
    pub error_code: Option<String>,
    pub reason: String,
}
