use super::crud;
use super::error::AppError;
use super::schema::{
    CreateMovementRequest, CreateMovementResponse, GetMovementResponse, HealthMetricsView,
    HealthResponse, ListMovementsQuery, ListMovementsResponse, OutboxStatsView,
};
use crate::app::AppState;
use crate::service::internal_auth_service::verify_internal_signature;
use crate::service::metrics_service;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use ledger_events::now_millis;
use tracing::{error, info};

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

pub async fn create_movement(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateMovementRequest>,
) -> impl IntoResponse {
    if let Err(err) = verify_write_auth(&state, &headers, &req) {
        return error_create(err);
    }
    let header_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned);

    match crud::create_movement(&state, req, header_key).await {
        Ok(resp) => {
            info!(movement_id = %resp.movement_id, idempotent = resp.idempotent, "movement accepted");
            (StatusCode::OK, Json(resp))
        }
        Err(err) => error_create(err),
    }
}

pub async fn get_movement(
    State(state): State<AppState>,
    Path(movement_id): Path<String>,
) -> impl IntoResponse {
    match crud::get_movement(&state, &movement_id).await {
        Ok(resp) if resp.found => (StatusCode::OK, Json(resp)),
        Ok(resp) => (StatusCode::NOT_FOUND, Json(resp)),
        Err(err) => error_get(err),
    }
}

pub async fn list_by_producer(
    State(state): State<AppState>,
    Path(producer_id): Path<String>,
    Query(query): Query<ListMovementsQuery>,
) -> impl IntoResponse {
    match crud::list_movements_by_producer(&state, &producer_id, &query).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(error_code = err.code, reason = %err.message, producer_id = %producer_id, "producer movement listing failed");
            error_list(err)
        }
    }
}

pub async fn list_by_commodity(
    State(state): State<AppState>,
    Path(commodity_id): Path<String>,
) -> impl IntoResponse {
    match crud::list_movements_by_commodity(&state, &commodity_id).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(error_code = err.code, reason = %err.message, commodity_id = %commodity_id, "commodity movement listing failed");
            error_list(err)
        }
    }
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (outbox, error_code, reason) = match crud::outbox_stats(&state) {
        Ok(stats) => (stats, None, "movement ingestion healthy".to_string()),
        Err(err) => (
            OutboxStatsView {
                pending: 0,
                oldest_pending_at: None,
            },
            Some(err.code.to_string()),
            err.message,
        ),
    };
    let m = metrics_service::snapshot();
    let metrics = HealthMetricsView {
        movements_recorded: m.movements_recorded,
        idempotent_replays: m.idempotent_replays,
        idempotency_conflicts: m.idempotency_conflicts,
        validation_rejections: m.validation_rejections,
        events_published: m.events_published,
        publish_failures: m.publish_failures,
        idempotency_records_purged: m.idempotency_records_purged,
        last_error_ts: m.last_error_ts,
    };
    let redis_available = state.infra.is_some();

    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: error_code.is_none(),
            redis_available,
            worker_enabled: state.config.worker_enabled,
            attachment_verify_enabled: state.config.attachment_verify_enabled,
            outbox,
            metrics,
            error_code,
            reason,
        }),
    )
}

fn verify_write_auth<T: serde::Serialize>(
    state: &AppState,
    headers: &HeaderMap,
    payload: &T,
) -> Result<(), AppError> {
    if !state.config.internal_auth_enabled {
        return Ok(());
    }
    let secret = state
        .config
        .internal_auth_secret
        .as_deref()
        .ok_or_else(|| AppError::internal("AUTH_CONFIG_ERROR", "internal auth secret missing"))?;
    let sig = headers
        .get("x-internal-signature")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            AppError::unauthorized("AUTH_MISSING_SIGNATURE", "missing x-internal-signature")
        })?;
    let canonical = serde_json::to_string(payload).map_err(|e| {
        AppError::internal(
            "AUTH_SERIALIZE_ERROR",
            format!("auth payload serialization failed: {e}"),
        )
    })?;
    verify_internal_signature(&canonical, sig, secret)
        .map_err(|e| AppError::unauthorized("AUTH_INVALID_SIGNATURE", e))
}

fn error_create(err: AppError) -> (StatusCode, Json<CreateMovementResponse>) {
    if err.status == StatusCode::BAD_REQUEST {
        metrics_service::inc_validation_rejections();
    }
    if err.status.is_server_error() {
        metrics_service::set_last_error_ts(now_millis());
    }
    error!(error_code = err.code, reason = %err.message, "movement rejected");
    (
        err.status,
        Json(CreateMovementResponse {
            accepted: false,
            idempotent: false,
            movement_id: String::new(),
            producer_id: String::new(),
            recorded_at: 0,
            error_code: Some(err.code.to_string()),
            reason: err.message,
        }),
    )
}

fn error_get(err: AppError) -> (StatusCode, Json<GetMovementResponse>) {
    error!(error_code = err.code, reason = %err.message, "movement lookup failed");
    (
        err.status,
        Json(GetMovementResponse {
            found: false,
            movement: None,
            error_code: Some(err.code.to_string()),
            reason: err.message,
        }),
    )
}

fn error_list(err: AppError) -> (StatusCode, Json<ListMovementsResponse>) {
    (
        err.status,
        Json(ListMovementsResponse {
            found: false,
            movements: Vec::new(),
            error_code: Some(err.code.to_string()),
            reason: err.message,
        }),
    )
}
