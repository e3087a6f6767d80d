use super::model::{SeloVerde, TierChange};
use crate::service::metrics_service::MetricsSnapshot;
use ledger_events::bus::DeadLetter;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecalculateRequest {
    #[serde(default, alias = "motivo")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificationResponse {
    pub found: bool,
    pub certification: Option<SeloVerde>,
    /// Set by recalculation when a tier trail row was appended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier_change: Option<TierChange>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierHistoryResponse {
    pub producer_id: String,
    pub changes: Vec<TierChange>,
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
    pub events_applied: u64,
    pub duplicate_events: u64,
    pub stale_revisions: u64,
    pub recalculations: u64,
    pub tier_changes: u64,
    pub cas_conflicts: u64,
    pub scoring_failures: u64,
    pub events_published: u64,
    pub publish_failures: u64,
    pub last_error_ts: i64,
}

impl From<MetricsSnapshot> for HealthMetricsView {
    fn from(m: MetricsSnapshot) -> Self {
        Self {
            events_applied: m.events_applied,
            duplicate_events: m.duplicate_events,
            stale_revisions: m.stale_revisions,
            recalculations: m.recalculations,
            tier_changes: m.tier_changes,
            cas_conflicts: m.cas_conflicts,
            scoring_failures: m.scoring_failures,
            events_published: m.events_published,
            publish_failures: m.publish_failures,
            last_error_ts: m.last_error_ts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub redis_available: bool,
    pub worker_enabled: bool,
    pub outbox_pending: u64,
    pub consumer_pending: u64,
    pub dead_letters: u64,
    pub metrics: HealthMetricsView,
    pub error_code: Option<String>,
    pub reason: String,
}
