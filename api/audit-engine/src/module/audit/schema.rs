use super::model::AuditRecord;
use ledger_events::bus::DeadLetter;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviseAuditRequest {
    #[serde(alias = "reviewerId")]
    pub reviewer_id: String,
    #[serde(alias = "aprovado")]
    pub approved: bool,
    #[serde(default, alias = "observacoes")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResponse {
    pub found: bool,
    pub audit: Option<AuditRecord>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListAuditsQuery {
    pub result: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListAuditsResponse {
    pub found: bool,
    pub audits: Vec<AuditRecord>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLettersResponse {
    pub available: bool,
    pub dead_letters: Vec<DeadLetter>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayDeadLetterResponse {
    pub requeued: bool,
    pub event_id: String,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetricsView {
    pub audits_recorded: u64,
    pub duplicate_deliveries: u64,
    pub approved: u64,
    pub rejected: u64,
    pub needs_review: u64,
    pub revisions_applied: u64,
    pub evaluation_failures: u64,
    pub events_published: u64,
    pub publish_failures: u64,
    pub last_error_ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub redis_available: bool,
    pub worker_enabled: bool,
    pub active_rule_set_version: Option<u64>,
    pub outbox_pending: u64,
    pub consumer_pending: u64,
    pub dead_letters: u64,
    pub metrics: HealthMetricsView,
    pub error_code: Option<String>,
    pub reason: String,
}
