use crate::app::AppState;
use crate::module::movement::crud;
use crate::module::movement::error::AppError;
use crate::service::metrics_service;
use async_trait::async_trait;
use ledger_events::errors::BusError;
use ledger_events::now_millis;
use ledger_events::outbox::{OutboxEntry, OutboxSource, RelayReport, RelaySettings, relay_once};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Outbox view over the movement store.
pub struct MovementOutbox {
    state: AppState,
}

impl MovementOutbox {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl OutboxSource for MovementOutbox {
    async fn due_entries(&self, now: i64, limit: usize) -> Result<Vec<OutboxEntry>, BusError> {
        crud::outbox_due(&self.state, now, limit).map_err(to_bus_error)
    }

    async fn mark_published(&self, entry: &OutboxEntry) -> Result<(), BusError> {
        metrics_service::add_events_published(1);
        crud::outbox_mark_published(&self.state, entry)
            .await
            .map_err(to_bus_error)
    }

    async fn mark_failed(&self, entry: &OutboxEntry, error: &str) -> Result<(), BusError> {
        metrics_service::add_publish_failures(1);
        metrics_service::set_last_error_ts(now_millis());
        crud::outbox_mark_failed(&self.state, entry, error)
            .await
            .map_err(to_bus_error)
    }
}

pub fn relay_settings(state: &AppState) -> RelaySettings {
    RelaySettings {
        batch_size: state.config.outbox_batch_size,
        interval_ms: state.config.outbox_relay_interval_ms,
    }
}

/// One relay pass right after a commit. Failures stay in the outbox for the
/// background relay.
pub async fn relay_now(state: &AppState) -> RelayReport {
    let _gate = state.relay_gate.lock().await;
    let source = MovementOutbox::new(state.clone());
    match relay_once(&source, state.bus.as_ref(), &relay_settings(state)).await {
        Ok(report) => report,
        Err(e) => {
            warn!(error = %e, "inline outbox relay failed");
            RelayReport::default()
        }
    }
}

pub async fn run_relay(state: AppState) -> Result<(), String> {
    match crud::restore_outbox(&state).await {
        Ok(0) => {}
        Ok(restored) => info!(restored, "outbox entries restored"),
        Err(e) => warn!(error_code = e.code, reason = %e.message, "outbox restore failed"),
    }
    let source: Arc<dyn OutboxSource> = Arc::new(MovementOutbox::new(state.clone()));
    let settings = relay_settings(&state);
    let interval = Duration::from_millis(settings.interval_ms.max(10));
    info!(interval_ms = settings.interval_ms, "movement outbox relay started");
    loop {
        {
            let _gate = state.relay_gate.lock().await;
            if let Err(e) = relay_once(source.as_ref(), state.bus.as_ref(), &settings).await {
                warn!(error = %e, "outbox relay pass failed");
            }
        }
        sleep(interval).await;
    }
}

fn to_bus_error(err: AppError) -> BusError {
    BusError::Unavailable(format!("{}: {}", err.code, err.message))
}
