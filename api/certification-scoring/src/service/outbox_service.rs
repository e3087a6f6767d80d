use crate::app::AppState;
use crate::module::certification::crud;
use crate::module::certification::error::AppError;
use crate::service::metrics_service;
use async_trait::async_trait;
use ledger_events::errors::BusError;
use ledger_events::now_millis;
use ledger_events::outbox::{OutboxEntry, OutboxSource, RelayReport, RelaySettings, relay_once};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Outbox view over the certification store. Carries `selo.alterado`.
pub struct CertificationOutbox {
    state: AppState,
}

impl CertificationOutbox {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl OutboxSource for CertificationOutbox {
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

fn relay_settings(state: &AppState) -> RelaySettings {
    RelaySettings {
        batch_size: state.config.outbox_batch_size,
        interval_ms: state.config.outbox_relay_interval_ms,
    }
}

pub async fn relay_now(state: &AppState) -> RelayReport {
    let _gate = state.relay_gate.lock().await;
    let source = CertificationOutbox::new(state.clone());
    relay_once(&source, state.bus.as_ref(), &relay_settings(state))
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "inline outbox relay failed");
            RelayReport::default()
        })
}

pub async fn run_relay(state: AppState) -> Result<(), String> {
    match crud::restore_outbox(&state).await {
        Ok(0) => {}
        Ok(restored) => info!(restored, "certification outbox entries restored"),
        Err(e) => {
            warn!(error_code = e.code, reason = %e.message, "certification outbox restore failed")
        }
    }
    let interval = Duration::from_millis(state.config.outbox_relay_interval_ms.max(10));
    loop {
        let report = relay_now(&state).await;
        if report.failed > 0 {
            warn!(
                failed = report.failed,
                published = report.published,
                "certification outbox backlog"
            );
        }
        sleep(interval).await;
    }
}

fn to_bus_error(err: AppError) -> BusError {
    BusError::Unavailable(format!("{}: {}", err.code, err.message))
}
