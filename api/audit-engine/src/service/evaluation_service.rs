use crate::app::AppState;
use crate::module::audit::crud::evaluate_recorded_movement;
use crate::module::error::AppError;
use async_trait::async_trait;
use ledger_events::bus::DeadLetter;
use ledger_events::consumer::{ConsumerSettings, EventHandler, drain, spawn_consumers};
use ledger_events::errors::HandlerError;
use ledger_events::events::{EventEnvelope, MOVEMENT_RECORDED_TOPIC, MovementRecorded};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

pub const AUDIT_CONSUMER_GROUP: &str = "audit-engine";

/// Consumer of `movement.recorded`. Every delivery either leaves exactly one
/// audit for the movement or fails so the bus redelivers it.
pub struct MovementRecordedHandler {
    state: AppState,
}

impl MovementRecordedHandler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl EventHandler for MovementRecordedHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let event: MovementRecorded = envelope
            .decode()
            .map_err(|e| HandlerError::permanent("EVENT_DECODE_FAILED", e.to_string()))?;
        evaluate_recorded_movement(&self.state, &event.movement).await?;
        Ok(())
    }
}

pub fn consumer_settings(state: &AppState) -> ConsumerSettings {
    ConsumerSettings {
        topic: MOVEMENT_RECORDED_TOPIC.to_string(),
        group: AUDIT_CONSUMER_GROUP.to_string(),
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
    let holder = format!("{AUDIT_CONSUMER_GROUP}-{}", Uuid::new_v4());
    info!(topic = %settings.topic, group = %settings.group, holder = %holder, "audit consumers starting");
    let handler: Arc<dyn EventHandler> = Arc::new(MovementRecordedHandler::new(state.clone()));
    Ok(spawn_consumers(state.bus.clone(), handler, settings, holder))
}

/// Processes everything currently pending on `movement.recorded`.
pub async fn drain_pending(state: &AppState) -> Result<usize, AppError> {
    let settings = consumer_settings(state);
    let handler = MovementRecordedHandler::new(state.clone());
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
        .dead_letters(MOVEMENT_RECORDED_TOPIC, AUDIT_CONSUMER_GROUP)
        .await
        .map_err(bus_unavailable)
}

pub async fn replay_dead_letter(state: &AppState, event_id: &str) -> Result<(), AppError> {
    let requeued = state
        .bus
        .requeue_dead_letter(MOVEMENT_RECORDED_TOPIC, AUDIT_CONSUMER_GROUP, event_id)
        .await
        .map_err(bus_unavailable)?;
    if !requeued {
        return Err(AppError::not_found(
            "DEAD_LETTER_NOT_FOUND",
            format!("no dead letter {event_id} for {AUDIT_CONSUMER_GROUP}"),
        ));
    }
    info!(event_id = %event_id, group = AUDIT_CONSUMER_GROUP, "dead letter requeued");
    Ok(())
}

fn bus_unavailable(e: impl std::fmt::Display) -> AppError {
    AppError::unavailable("DOWNSTREAM_UNAVAILABLE", format!("event bus: {e}"))
}
