use super::crud::{self, Recalculation};
use super::error::AppError;
use super::model::SeloVerde;
use super::schema::{
    CertificationResponse, DeadLettersResponse, HealthResponse, RecalculateRequest,
    ReplayDeadLetterResponse, TierHistoryResponse,
};
use crate::app::AppState;
use crate::service::internal_auth_service::verify_write_auth;
use crate::service::metrics_service;
use crate::service::scoring_service::{self, SCORING_CONSUMER_GROUP};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use ledger_events::events::AUDIT_COMPLETED_TOPIC;
use tracing::{error, info};

pub async fn get_certification(
    State(state): State<AppState>,
    Path(producer_id): Path<String>,
) -> impl IntoResponse {
    match crud::get_certification(&state, &producer_id).await {
        Ok(Some(certification)) => (
            StatusCode::OK,
            Json(CertificationResponse {
                found: true,
                reason: format!("certification is {}", certification.tier.as_str()),
                certification: Some(certification),
                tier_change: None,
                error_code: None,
            }),
        ),
        Ok(None) => error_certification(crud::selo_not_found(&producer_id)),
        Err(err) => error_certification(err),
    }
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(producer_id): Path<String>,
) -> impl IntoResponse {
    match crud::tier_history(&state, &producer_id).await {
        Ok(changes) => (
            StatusCode::OK,
            Json(TierHistoryResponse {
                reason: format!("{} tier change(s)", changes.len()),
                producer_id,
                changes,
                error_code: None,
            }),
        ),
        Err(err) => {
            error!(error_code = err.code, reason = %err.message, producer_id = %producer_id, "tier history failed");
            (
                err.status,
                Json(TierHistoryResponse {
                    producer_id,
                    changes: Vec::new(),
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                }),
            )
        }
    }
}

/// Body is optional; an empty POST recalculates with the default reason.
pub async fn recalculate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(producer_id): Path<String>,
    body: Option<Json<RecalculateRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    if let Err(err) = verify_write_auth(&state, &headers, &req) {
        return error_certification(err);
    }
    match crud::recalculate_now(&state, &producer_id, req.reason).await {
        Ok(Recalculation {
            certification,
            tier_change,
        }) => {
            info!(
                producer_id = %certification.producer_id,
                tier = certification.tier.as_str(),
                score = certification.score,
                logged = tier_change.is_some(),
                "recalculation accepted"
            );
            (
                StatusCode::OK,
                Json(CertificationResponse {
                    found: true,
                    reason: recalculation_reason(&certification, tier_change.is_some()),
                    certification: Some(certification),
                    tier_change,
                    error_code: None,
                }),
            )
        }
        Err(err) => error_certification(err),
    }
}

pub async fn list_dead_letters(State(state): State<AppState>) -> impl IntoResponse {
    match scoring_service::dead_letters(&state).await {
        Ok(dead_letters) => (
            StatusCode::OK,
            Json(DeadLettersResponse {
                available: true,
                dead_letters,
                error_code: None,
                reason: format!("dead letters for {SCORING_CONSUMER_GROUP}"),
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
        Ok(()) => scoring_service::replay_dead_letter(&state, &event_id).await,
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
    let mut reason = "certification scoring healthy".to_string();

    let consumer = match state
        .bus
        .stats(AUDIT_COMPLETED_TOPIC, SCORING_CONSUMER_GROUP)
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
    if consumer.dead_letters > 0 && error_code.is_none() {
        error_code = Some("DEAD_LETTERS_PENDING".to_string());
        reason = format!("{} audit event(s) need manual replay", consumer.dead_letters);
    }

    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: error_code.is_none(),
            redis_available: state.infra.is_some(),
            worker_enabled: state.config.worker_enabled,
            outbox_pending,
            consumer_pending: consumer.pending,
            dead_letters: consumer.dead_letters,
            metrics: metrics_service::snapshot().into(),
            error_code,
            reason,
        }),
    )
}

fn recalculation_reason(certification: &SeloVerde, logged: bool) -> String {
    if logged {
        format!("recalculated; tier trail now at {}", certification.tier.as_str())
    } else {
        format!("recalculated; tier unchanged at {}", certification.tier.as_str())
    }
}

fn error_certification(err: AppError) -> (StatusCode, Json<CertificationResponse>) {
    error!(error_code = err.code, reason = %err.message, "certification request failed");
    (
        err.status,
        Json(CertificationResponse {
            found: false,
            certification: None,
            tier_change: None,
            error_code: Some(err.code.to_string()),
            reason: err.message,
        }),
    )
}
