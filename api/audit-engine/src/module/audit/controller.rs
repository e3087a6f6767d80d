use super::crud;
use super::schema::{
    AuditResponse, DeadLettersResponse, HealthMetricsView, HealthResponse, ListAuditsQuery,
    ListAuditsResponse, ReplayDeadLetterResponse, ReviseAuditRequest,
};
use crate::app::AppState;
use crate::module::error::AppError;
use crate::module::rule_catalog::crud::active_version;
use crate::service::evaluation_service::{self, AUDIT_CONSUMER_GROUP};
use crate::service::internal_auth_service::verify_write_auth;
use crate::service::metrics_service;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use ledger_events::events::MOVEMENT_RECORDED_TOPIC;
use tracing::{error, info};

pub async fn get_audit(
    State(state): State<AppState>,
    Path(audit_id): Path<String>,
) -> impl IntoResponse {
    respond_audit(crud::get_audit(&state, &audit_id).await, "audit")
}

pub async fn get_audit_by_movement(
    State(state): State<AppState>,
    Path(movement_id): Path<String>,
) -> impl IntoResponse {
    respond_audit(
        crud::get_audit_by_movement(&state, &movement_id).await,
        "audit for movement",
    )
}

pub async fn list_by_producer(
    State(state): State<AppState>,
    Path(producer_id): Path<String>,
    Query(query): Query<ListAuditsQuery>,
) -> impl IntoResponse {
    let result = match crud::parse_result_filter(query.result.as_deref()) {
        Ok(r) => r,
        Err(err) => return error_list(err),
    };
    match crud::list_audits_by_producer(&state, &producer_id, result).await {
        Ok(audits) => list_response(audits),
        Err(err) => error_list(err),
    }
}

pub async fn list_pending_review(State(state): State<AppState>) -> impl IntoResponse {
    match crud::list_pending_review(&state).await {
        Ok(audits) => list_response(audits),
        Err(err) => error_list(err),
    }
}

pub async fn revise_audit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(audit_id): Path<String>,
    Json(req): Json<ReviseAuditRequest>,
) -> impl IntoResponse {
    if let Err(err) = verify_write_auth(&state, &headers, &req) {
        return error_audit(err);
    }
    match crud::revise_audit(&state, &audit_id, req).await {
        Ok(audit) => {
            info!(audit_id = %audit.audit_id, result = audit.result.as_str(), "revision accepted");
            (
                StatusCode::OK,
                Json(AuditResponse {
                    found: true,
                    audit: Some(audit),
                    error_code: None,
                    reason: "audit revised".to_string(),
                }),
            )
        }
        Err(err) => error_audit(err),
    }
}

pub async fn list_dead_letters(State(state): State<AppState>) -> impl IntoResponse {
    match evaluation_service::dead_letters(&state).await {
        Ok(dead_letters) => (
            StatusCode::OK,
            Json(DeadLettersResponse {
                available: true,
                dead_letters,
                error_code: None,
                reason: format!("dead letters for {AUDIT_CONSUMER_GROUP}"),
            }),
        ),
        Err(err) => {
            error!(error_code = err.code, reason = %err.message, "dead letter listing failed");
            (
                err.status,
                Json(DeadLettersResponse {
                    available: false,
                    dead_letters: Vec::new(),
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                }),
            )
        }
    }
}

pub async fn replay_dead_letter(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(event_id): Path<String>,
) -> impl IntoResponse {
    let auth = verify_write_auth(&state, &headers, &serde_json::json!({"event_id": event_id}));
    let outcome = match auth {
        Ok(()) => evaluation_service::replay_dead_letter(&state, &event_id).await,
        Err(err) => Err(err),
    };
    match outcome {
        Ok(()) => (
            StatusCode::OK,
            Json(ReplayDeadLetterResponse {
                requeued: true,
                event_id,
                error_code: None,
                reason: "dead letter requeued".to_string(),
            }),
        ),
        Err(err) => {
            error!(error_code = err.code, reason = %err.message, event_id = %event_id, "dead letter replay failed");
            (
                err.status,
                Json(ReplayDeadLetterResponse {
                    requeued: false,
                    event_id,
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                }),
            )
        }
    }
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut error_code = None;
    let mut reason = "audit engine healthy".to_string();

    let consumer = match state
        .bus
        .stats(MOVEMENT_RECORDED_TOPIC, AUDIT_CONSUMER_GROUP)
        .await
    {
        Ok(stats) => stats,
        Err(e) => {
            error_code = Some("BUS_UNAVAILABLE".to_string());
            reason = e.to_string();
            Default::default()
        }
    };
    let outbox_pending = crud::outbox_pending(&state).unwrap_or_else(|e| {
        error_code = Some(e.code.to_string());
        reason = e.message;
        0
    });
    let active_rule_set_version = active_version(&state);
    if active_rule_set_version.is_none() && error_code.is_none() {
        error_code = Some("NO_ACTIVE_RULE_SET".to_string());
        reason = "no rule set version is active; movements will not be audited".to_string();
    }

    let m = metrics_service::snapshot();
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: error_code.is_none(),
            redis_available: state.infra.is_some(),
            worker_enabled: state.config.worker_enabled,
            active_rule_set_version,
            outbox_pending,
            consumer_pending: consumer.pending,
            dead_letters: consumer.dead_letters,
            metrics: HealthMetricsView {
                audits_recorded: m.audits_recorded,
                duplicate_deliveries: m.duplicate_deliveries,
                approved: m.approved,
                rejected: m.rejected,
                needs_review: m.needs_review,
                revisions_applied: m.revisions_applied,
                evaluation_failures: m.evaluation_failures,
                events_published: m.events_published,
                publish_failures: m.publish_failures,
                last_error_ts: m.last_error_ts,
            },
            error_code,
            reason,
        }),
    )
}

fn respond_audit(
    result: Result<Option<super::model::AuditRecord>, AppError>,
    what: &str,
) -> (StatusCode, Json<AuditResponse>) {
    match result {
        Ok(Some(audit)) => (
            StatusCode::OK,
            Json(AuditResponse {
                found: true,
                audit: Some(audit),
                error_code: None,
                reason: format!("{what} found"),
            }),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(AuditResponse {
                found: false,
                audit: None,
                error_code: Some("AUDIT_NOT_FOUND".to_string()),
                reason: format!("{what} not found"),
            }),
        ),
        Err(err) => error_audit(err),
    }
}

fn list_response(audits: Vec<super::model::AuditRecord>) -> (StatusCode, Json<ListAuditsResponse>) {
    let found = !audits.is_empty();
    (
        StatusCode::OK,
        Json(ListAuditsResponse {
            found,
            reason: format!("{} audit(s)", audits.len()),
            audits,
            error_code: None,
        }),
    )
}

fn error_audit(err: AppError) -> (StatusCode, Json<AuditResponse>) {
    error!(error_code = err.code, reason = %err.message, "audit request failed");
    (
        err.status,
        Json(AuditResponse {
            found: false,
            audit: None,
            error_code: Some(err.code.to_string()),
            reason: err.message,
        }),
    )
}

fn error_list(err: AppError) -> (StatusCode, Json<ListAuditsResponse>) {
    error!(error_code = err.code, reason = %err.message, "audit listing failed");
    (
        err.status,
        Json(ListAuditsResponse {
            found: false,
            audits: Vec::new(),
            error_code: Some(err.code.to_string()),
            reason: err.message,
        }),
    )
}
