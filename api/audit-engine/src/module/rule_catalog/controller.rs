use super::crud;
use super::schema::{ActivationResponse, PublishRuleSetRequest, RuleSetResponse};
use crate::app::AppState;
use crate::module::error::AppError;
use crate::service::internal_auth_service::verify_write_auth;
use audit_rules::models::RuleSetVersion;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use std::sync::Arc;
use tracing::{error, info};

pub async fn publish_rule_set(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PublishRuleSetRequest>,
) -> impl IntoResponse {
    if let Err(err) = verify_write_auth(&state, &headers, &req) {
        return error_rule_set(err);
    }
    match crud::publish_rule_set(&state, req).await {
        Ok(outcome) => {
            info!(
                version = outcome.rule_set.version,
                created = outcome.created,
                activated = outcome.activation.is_some(),
                "rule set publish handled"
            );
            let status = if outcome.created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            let active = crud::active_version(&state) == Some(outcome.rule_set.version);
            let reason = if outcome.created {
                "rule set version published"
            } else {
                "rule set identical to latest version"
            };
            (
                status,
                Json(RuleSetResponse {
                    found: true,
                    created: outcome.created,
                    active,
                    rule_set: Some((*outcome.rule_set).clone()),
                    error_code: None,
                    reason: reason.to_string(),
                }),
            )
        }
        Err(err) => error_rule_set(err),
    }
}

pub async fn activate_rule_set(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(version): Path<u64>,
) -> impl IntoResponse {
    if let Err(err) = verify_write_auth(&state, &headers, &serde_json::json!({"version": version}))
    {
        return error_activation(err);
    }
    match crud::activate_version(&state, version).await {
        Ok(activation) => (
            StatusCode::OK,
            Json(ActivationResponse {
                activated: true,
                activation: Some(activation),
                error_code: None,
                reason: "rule set version active".to_string(),
            }),
        ),
        Err(err) => error_activation(err),
    }
}

pub async fn get_active_rule_set(State(state): State<AppState>) -> impl IntoResponse {
    respond_rule_set(&state, crud::active_rule_set(&state).await)
}

pub async fn get_rule_set(
    State(state): State<AppState>,
    Path(version): Path<u64>,
) -> impl IntoResponse {
    respond_rule_set(&state, crud::get_rule_set(&state, version).await)
}

pub async fn get_rule_set_active_at(
    State(state): State<AppState>,
    Path(timestamp): Path<i64>,
) -> impl IntoResponse {
    respond_rule_set(&state, crud::active_rule_set_at(&state, timestamp).await)
}

fn respond_rule_set(
    state: &AppState,
    result: Result<Arc<RuleSetVersion>, AppError>,
) -> (StatusCode, Json<RuleSetResponse>) {
    match result {
        Ok(rule_set) => (
            StatusCode::OK,
            Json(RuleSetResponse {
                found: true,
                created: false,
                active: crud::active_version(state) == Some(rule_set.version),
                rule_set: Some((*rule_set).clone()),
                error_code: None,
                reason: "rule set found".to_string(),
            }),
        ),
        Err(err) => error_rule_set(err),
    }
}

fn error_rule_set(err: AppError) -> (StatusCode, Json<RuleSetResponse>) {
    error!(error_code = err.code, reason = %err.message, "rule set request failed");
    (
        err.status,
        Json(RuleSetResponse {
            found: false,
            created: false,
            active: false,
            rule_set: None,
            error_code: Some(err.code.to_string()),
            reason: err.message,
        }),
    )
}

fn error_activation(err: AppError) -> (StatusCode, Json<ActivationResponse>) {
    error!(error_code = err.code, reason = %err.message, "rule set activation failed");
    (
        err.status,
        Json(ActivationResponse {
            activated: false,
            activation: None,
            error_code: Some(err.code.to_string()),
            reason: err.message,
        }),
    )
}
