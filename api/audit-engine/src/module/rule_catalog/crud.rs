use super::schema::{PublishRuleSetRequest, RuleCatalogFile};
use crate::app::AppState;
use crate::infra::{RULE_ACTIVATIONS_COLLECTION, RULE_VERSIONS_COLLECTION};
use crate::module::error::AppError;
use audit_rules::catalog::RuleCatalog;
use audit_rules::errors::RuleCatalogError;
use audit_rules::models::{Activation, RuleSetVersion};
use ledger_events::now_millis;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct RuleCatalogStore {
    inner: Mutex<RuleCatalog>,
}

#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub rule_set: Arc<RuleSetVersion>,
    pub created: bool,
    pub activation: Option<Activation>,
}

/// Publishes a new rule-set version, optionally activating it. Content equal
/// to the latest version is not republished.
pub async fn publish_rule_set(
    state: &AppState,
    req: PublishRuleSetRequest,
) -> Result<PublishOutcome, AppError> {
    refresh_from_redis(state).await?;
    let mut draft = lock_catalog(state)?.clone();
    let (rule_set, created) = draft.publish(req.rules, req.description, now_millis())?;

    if created {
        persist_version(state, &rule_set).await?;
        lock_catalog(state)?.insert((*rule_set).clone())?;
        info!(
            version = rule_set.version,
            content_hash = %rule_set.content_hash,
            rules = rule_set.rules.len(),
            "rule set version published"
        );
    }

    let activation = if req.activate {
        Some(activate_version(state, rule_set.version).await?)
    } else {
        None
    };
    Ok(PublishOutcome {
        rule_set,
        created,
        activation,
    })
}

pub async fn activate_version(state: &AppState, version: u64) -> Result<Activation, AppError> {
    refresh_from_redis(state).await?;
    let (activation, appended) = {
        let mut catalog = lock_catalog(state)?;
        let before = catalog.activations().len();
        let activation = catalog.activate(version, now_millis())?;
        (activation, catalog.activations().len() > before)
    };
    if appended {
        persist_activation(state, &activation).await?;
    }
    info!(version, activated_at = activation.activated_at, "rule set version activated");
    Ok(activation)
}

/// The version new evaluations must pin. Any failure here is a rule
/// evaluation failure, so callers retry instead of settling a verdict.
pub async fn resolve_active(state: &AppState) -> Result<Arc<RuleSetVersion>, AppError> {
    refresh_from_redis(state).await?;
    let catalog = lock_catalog(state)?;
    catalog.active().map_err(AppError::rule_evaluation)
}

pub async fn active_rule_set(state: &AppState) -> Result<Arc<RuleSetVersion>, AppError> {
    refresh_from_redis(state).await?;
    Ok(lock_catalog(state)?.active()?)
}

pub async fn active_rule_set_at(
    state: &AppState,
    timestamp: i64,
) -> Result<Arc<RuleSetVersion>, AppError> {
    refresh_from_redis(state).await?;
    Ok(lock_catalog(state)?.active_at(timestamp)?)
}

pub async fn get_rule_set(state: &AppState, version: u64) -> Result<Arc<RuleSetVersion>, AppError> {
    refresh_from_redis(state).await?;
    Ok(lock_catalog(state)?.get(version)?)
}

pub fn active_version(state: &AppState) -> Option<u64> {
    lock_catalog(state)
        .ok()
        .and_then(|catalog| catalog.active().ok().map(|v| v.version))
}

/// Publishes and activates the rule file configured for this deployment.
/// Returns the active version afterwards.
pub async fn seed_from_file(state: &AppState, path: &str) -> Result<u64, AppError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        AppError::internal("RULE_CATALOG_READ_FAILED", format!("read {path} failed: {e}"))
    })?;
    let file: RuleCatalogFile = serde_json::from_str(&raw).map_err(|e| {
        AppError::bad_request("INVALID_RULE_SET", format!("parse {path} failed: {e}"))
    })?;
    let (rules, description) = file.into_parts();
    let has_active = {
        refresh_from_redis(state).await?;
        lock_catalog(state)?.active().is_ok()
    };
    let outcome = publish_rule_set(
        state,
        PublishRuleSetRequest {
            rules,
            description: description.or_else(|| Some(format!("seeded from {path}"))),
            activate: false,
        },
    )
    .await?;
    if outcome.created || !has_active {
        activate_version(state, outcome.rule_set.version).await?;
    }
    Ok(outcome.rule_set.version)
}

fn lock_catalog(state: &AppState) -> Result<MutexGuard<'_, RuleCatalog>, AppError> {
    state
        .catalog
        .inner
        .lock()
        .map_err(|_| AppError::internal("STORE_LOCK_ERROR", "rule catalog lock poisoned"))
}

async fn redis_conn(state: &AppState) -> Result<Option<MultiplexedConnection>, AppError> {
    let Some(infra) = &state.infra else {
        return Ok(None);
    };
    infra
        .redis
        .get_multiplexed_async_connection()
        .await
        .map(Some)
        .map_err(redis_unavailable)
}

/// Pulls versions and the activation history written by other replicas.
async fn refresh_from_redis(state: &AppState) -> Result<(), AppError> {
    let Some(mut conn) = redis_conn(state).await? else {
        return Ok(());
    };
    let versions: HashMap<String, String> = conn
        .hgetall(RULE_VERSIONS_COLLECTION)
        .await
        .map_err(redis_unavailable)?;
    let activations: Vec<String> = conn
        .lrange(RULE_ACTIVATIONS_COLLECTION, 0, -1)
        .await
        .map_err(redis_unavailable)?;

    let mut catalog = lock_catalog(state)?;
    for raw in versions.values() {
        match serde_json::from_str::<RuleSetVersion>(raw) {
            Ok(version) => {
                if let Err(e) = catalog.insert(version) {
                    warn!(error = %e, "stored rule set version rejected");
                }
            }
            Err(e) => warn!(error = %e, "skipping undecodable rule set version"),
        }
    }
    if !activations.is_empty() {
        let history = activations
            .iter()
            .map(|raw| serde_json::from_str::<Activation>(raw))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::internal("REDIS_DECODE_FAILED", e.to_string()))?;
        catalog.restore_activations(history);
    }
    Ok(())
}

async fn persist_version(state: &AppState, rule_set: &RuleSetVersion) -> Result<(), AppError> {
    let Some(mut conn) = redis_conn(state).await? else {
        return Ok(());
    };
    let payload = serde_json::to_string(rule_set)
        .map_err(|e| AppError::internal("SERIALIZATION_ERROR", e.to_string()))?;
    let inserted: bool = conn
        .hset_nx(RULE_VERSIONS_COLLECTION, rule_set.version, payload)
        .await
        .map_err(redis_unavailable)?;
    if !inserted {
        return Err(RuleCatalogError::VersionConflict(rule_set.version).into());
    }
    Ok(())
}

/// Activations are an append-only log; concurrent writers never overwrite
/// each other and `deactivated_at` is derived on restore.
async fn persist_activation(state: &AppState, activation: &Activation) -> Result<(), AppError> {
    let Some(mut conn) = redis_conn(state).await? else {
        return Ok(());
    };
    let payload = serde_json::to_string(&Activation {
        deactivated_at: None,
        ..activation.clone()
    })
    .map_err(|e| AppError::internal("SERIALIZATION_ERROR", e.to_string()))?;
    let _: u64 = conn
        .rpush(RULE_ACTIVATIONS_COLLECTION, payload)
        .await
        .map_err(redis_unavailable)?;
    Ok(())
}

fn redis_unavailable(e: impl Display) -> AppError {
    AppError::unavailable("DOWNSTREAM_UNAVAILABLE", format!("redis: {e}"))
}
