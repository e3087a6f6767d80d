use crate::app::AppState;
use crate::module::certification::crud::apply_audit_completed;
use crate::module::certification::error::AppError;
use async_trait::async_trait;
use ledger_events::bus::DeadLetter;
use ledger_events::consumer::{ConsumerSettings, EventHandler, drain, spawn_consumers};
use ledger_events::errors::HandlerError;
use ledger_events::events::{AUDIT_COMPLETED_TOPIC, AuditCompleted, EventEnvelope};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

pub const SCORING_CONSUMER_GROUP: &str = "certification-scoring";

/// Consumer of `auditoria.completed`. Acknowledged only after the producer's
/// certification has been recomputed and committed.
pub struct AuditCompletedHandler {
    state: AppState,
}

impl AuditCompletedHandler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl EventHandler for AuditCompletedHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let event: AuditCompleted = envelope
            .decode()
            .map_err(|e| HandlerError::permanent("EVENT_DECODE_FAILED", e.to_string()))?;
        apply_audit_completed(&self.state, &envelope.event_id, &event)
            .await
            .map_err(|e| {
                // A lost CAS race on the event path is retried by the consumer.
                if e.code == "OPTIMISTIC_CONFLICT" {
                    HandlerError::transient(e.code, e.message)
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }
}

pub fn consumer_settings(state: &AppState) -> ConsumerSettings {
    ConsumerSettings {
        topic: AUDIT_COMPLETED_TOPIC.to_string(),
        group: SCORING_CONSUMER_GROUP.to_string(),
        max_attempts: state.config.worker_max_attempts,
        backoff_base_ms: state.config.worker_backoff_base_ms,
        backoff_max_ms: state.config.worker_backoff_max_ms,
        poll_interval_ms: state.config.worker_poll_ms,
        lease_seconds: state.config.worker_lease_seconds,
    }
}

pub async fn start_consumers(state: &AppState) -> Result<Vec<JoinHandle<()>>, String> {
    let settings = consumer_settings(state);
    state
        .bus
        .subscribe(&settings.topic, &settings.group)
        .await
        .map_err(|e| format!("subscribe {} failed: {e}", settings.topic))?;
    let holder = format!("{SCORING_CONSUMER_GROUP}-{}", Uuid::new_v4());
    info!(topic = %settings.topic, group = %settings.group, holder = %holder, "scoring consumers starting");
    let handler: Arc<dyn EventHandler> = Arc::new(AuditCompletedHandler::new(state.clone()));
    Ok(spawn_consumers(state.bus.clone(), handler, settings, holder))
}

/// Processes everything currently pending on `auditoria.completed`.
pub async fn drain_pending(state: &AppState) -> Result<usize, AppError> {
    let settings = consumer_settings(state);
    let handler = AuditCompletedHandler::new(state.clone());
    state
        .bus
        .subscribe(&settings.topic, &settings.group)
        .await
        .map_err(bus_unavailable)?;
    drain(state.bus.as_ref(), &handler, &settings)
        .await
        .map_err(bus_unavailable)
}

pub async fn dead_letters(state: &AppState) -> Result<Vec<DeadLetter>, AppError> {
    state
        .bus
        .dead_letters(AUDIT_COMPLETED_TOPIC, SCORING_CONSUMER_GROUP)
        .await
        .map_err(bus_unavailable)
}

pub async fn replay_dead_letter(state: &AppState, event_id: &str) -> Result<(), AppError> {
    let requeued = state
        .bus
        .requeue_dead_letter(AUDIT_COMPLETED_TOPIC, SCORING_CONSUMER_GROUP, event_id)
        .await
        .map_err(bus_unavailable)?;
    if !requeued {
        return Err(AppError::not_found(
            "DEAD_LETTER_NOT_FOUND",
            format!("no dead letter {event_id} for {SCORING_CONSUMER_GROUP}"),
        ));
    }
    info!(event_id = %event_id, group = SCORING_CONSUMER_GROUP, "dead letter requeued");
    Ok(())
}

fn bus_unavailable(e: impl std::fmt::Display) -> AppError {
    AppError::unavailable("DOWNSTREAM_UNAVAILABLE", format!("event bus: {e}"))
}
