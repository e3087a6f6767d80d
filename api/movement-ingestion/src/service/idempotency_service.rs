use crate::app::AppState;
use crate::module::movement::crud::purge_expired_idempotency;
use crate::service::metrics_service;
use ledger_events::now_millis;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub async fn run_gc(state: AppState) -> Result<(), String> {
    let interval = Duration::from_secs(state.config.idempotency_gc_interval_seconds.max(1) as u64);
    info!(
        ttl_seconds = state.config.idempotency_ttl_seconds,
        interval_seconds = state.config.idempotency_gc_interval_seconds,
        "idempotency gc started"
    );
    loop {
        sleep(interval).await;
        match purge_expired_idempotency(&state, now_millis()) {
            Ok(0) => debug!("no expired idempotency records"),
            Ok(purged) => {
                metrics_service::add_idempotency_purged(purged as u64);
                info!(purged, "expired idempotency records purged");
            }
            Err(e) => warn!(error_code = e.code, reason = %e.message, "idempotency gc failed"),
        }
    }
}
