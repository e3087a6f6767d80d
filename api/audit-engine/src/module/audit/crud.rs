use super::model::AuditRecord;
use super::schema::ReviseAuditRequest;
use crate::app::AppState;
use crate::infra::{AUDIT_OUTBOX_COLLECTION, AUDIT_PENDING_REVIEW_COLLECTION, AUDITS_COLLECTION};
use crate::module::error::AppError;
use crate::module::rule_catalog::crud::resolve_active;
use crate::service::metrics_service;
use crate::service::outbox_service;
use audit_rules::handler::evaluate_movement;
use ledger_events::canonical::sha256_hex;
use ledger_events::events::EventEnvelope;
use ledger_events::models::{AuditResult, Movement};
use ledger_events::now_millis;
use ledger_events::outbox::{OutboxEntry, OutboxQueue};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

// KEYS: movement->audit index, audit, producer index, outbox hash, pending-review set.
// Returns the audit id already bound to the movement, if any.
const INSERT_AUDIT_SCRIPT: &str = r#"
local existing = redis.call('GET', KEYS[1])
if existing then
  return existing
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('SET', KEYS[2], ARGV[2])
redis.call('ZADD', KEYS[3], ARGV[3], ARGV[1])
redis.call('HSET', KEYS[4], ARGV[4], ARGV[5])
if ARGV[6] == '1' then
  redis.call('SADD', KEYS[5], ARGV[1])
end
return false
"#;

// KEYS: audit, outbox hash, pending-review set.
const REVISE_AUDIT_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return 'missing'
end
local record = cjson.decode(current)
if record['result'] ~= 'NEEDS_REVIEW' or (tonumber(record['revision']) or 0) ~= 0 then
  return 'terminal'
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('HSET', KEYS[2], ARGV[2], ARGV[3])
redis.call('SREM', KEYS[3], ARGV[4])
return 'ok'
"#;

#[derive(Debug, Default)]
pub struct AuditStore {
    inner: Mutex<AuditStoreInner>,
}

#[derive(Debug, Default)]
struct AuditStoreInner {
    audits_by_id: HashMap<String, AuditRecord>,
    audit_id_by_movement: HashMap<String, String>,
    ids_by_producer: HashMap<String, Vec<String>>,
    outbox: OutboxQueue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    Recorded(AuditRecord),
    /// The movement already has an audit; nothing was written.
    Duplicate(AuditRecord),
}

enum InsertOutcome {
    Inserted,
    Existing(AuditRecord),
}

/// Audit ids derive from the movement id, so every replica and every
/// redelivery agrees on the id of a movement's single audit.
pub fn audit_id_for(movement_id: &str) -> String {
    format!("aud-{}", &sha256_hex(movement_id)[..32])
}

/// Evaluates a recorded movement against the active rule set and stores the
/// verdict together with its `AuditCompleted` outbox entry.
pub async fn evaluate_recorded_movement(
    state: &AppState,
    movement: &Movement,
) -> Result<EvaluationOutcome, AppError> {
    if let Some(existing) = get_audit_by_movement(state, &movement.movement_id).await? {
        metrics_service::inc_duplicate_deliveries();
        debug!(movement_id = %movement.movement_id, audit_id = %existing.audit_id, "movement already audited");
        return Ok(EvaluationOutcome::Duplicate(existing));
    }

    let rule_set = resolve_active(state).await.inspect_err(|_| {
        metrics_service::inc_evaluation_failures();
        metrics_service::set_last_error_ts(now_millis());
    })?;
    let evaluation = evaluate_movement(movement, &rule_set);
    let record = AuditRecord {
        audit_id: audit_id_for(&movement.movement_id),
        movement_id: movement.movement_id.clone(),
        producer_id: movement.producer_id.clone(),
        rule_set_version: evaluation.rule_set_version,
        result: evaluation.result,
        evidence: evaluation.evidence,
        processed_at: now_millis(),
        reviewer_id: None,
        review_notes: None,
        reviewed_at: None,
        revision: 0,
    };

    if let InsertOutcome::Existing(existing) = insert_audit(state, &record).await? {
        metrics_service::inc_duplicate_deliveries();
        return Ok(EvaluationOutcome::Duplicate(existing));
    }

    metrics_service::record_audit(record.result);
    info!(
        audit_id = %record.audit_id,
        movement_id = %record.movement_id,
        producer_id = %record.producer_id,
        result = record.result.as_str(),
        rule_set_version = record.rule_set_version,
        violations = record.evidence.len(),
        "movement audited"
    );
    outbox_service::relay_now(state).await;
    Ok(EvaluationOutcome::Recorded(record))
}

/// Settles a NEEDS_REVIEW audit. Any other state is terminal.
pub async fn revise_audit(
    state: &AppState,
    audit_id: &str,
    req: ReviseAuditRequest,
) -> Result<AuditRecord, AppError> {
    let reviewer_id = req.reviewer_id.trim();
    if reviewer_id.is_empty() {
        return Err(AppError::bad_request(
            "INVALID_REVIEWER_ID",
            "reviewer_id is required",
        ));
    }
    let current = get_audit(state, audit_id)
        .await?
        .ok_or_else(|| AppError::not_found("AUDIT_NOT_FOUND", format!("audit {audit_id} not found")))?;
    if !current.is_reviewable() {
        return Err(invalid_transition(&current));
    }

    let mut revised = current.clone();
    revised.result = if req.approved {
        AuditResult::Approved
    } else {
        AuditResult::Rejected
    };
    revised.reviewer_id = Some(reviewer_id.to_string());
    revised.review_notes = req
        .notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    revised.reviewed_at = Some(now_millis());
    revised.revision = 1;

    commit_revision(state, &current, &revised).await?;
    metrics_service::inc_revisions_applied();
    info!(
        audit_id = %revised.audit_id,
        producer_id = %revised.producer_id,
        reviewer_id = %reviewer_id,
        result = revised.result.as_str(),
        "audit revised"
    );
    outbox_service::relay_now(state).await;
    Ok(revised)
}

pub async fn get_audit(state: &AppState, audit_id: &str) -> Result<Option<AuditRecord>, AppError> {
    {
        let inner = lock_store(state)?;
        if let Some(record) = inner.audits_by_id.get(audit_id) {
            return Ok(Some(record.clone()));
        }
    }
    load_audit_from_redis(state, audit_id).await
}

pub async fn get_audit_by_movement(
    state: &AppState,
    movement_id: &str,
) -> Result<Option<AuditRecord>, AppError> {
    let local = {
        let inner = lock_store(state)?;
        inner
            .audit_id_by_movement
            .get(movement_id)
            .and_then(|id| inner.audits_by_id.get(id))
            .cloned()
    };
    if local.is_some() {
        return Ok(local);
    }
    let Some(mut conn) = redis_conn(state).await? else {
        return Ok(None);
    };
    let audit_id: Option<String> = conn
        .get(format!("{AUDITS_COLLECTION}:movement:{movement_id}"))
        .await
        .map_err(redis_unavailable)?;
    match audit_id {
        Some(id) => load_audit_from_redis(state, &id).await,
        None => Ok(None),
    }
}

pub async fn list_audits_by_producer(
    state: &AppState,
    producer_id: &str,
    result: Option<AuditResult>,
) -> Result<Vec<AuditRecord>, AppError> {
    if producer_id.trim().is_empty() {
        return Err(AppError::bad_request(
            "INVALID_PRODUCER_ID",
            "producer_id is required",
        ));
    }
    let mut ids = {
        let inner = lock_store(state)?;
        inner
            .ids_by_producer
            .get(producer_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect::<HashSet<_>>()
    };
    if let Some(mut conn) = redis_conn(state).await? {
        let durable: Vec<String> = conn
            .zrange(format!("{AUDITS_COLLECTION}:producer:{producer_id}"), 0, -1)
            .await
            .map_err(redis_unavailable)?;
        ids.extend(durable);
    }
    let mut audits = load_many(state, ids).await?;
    audits.retain(|a| result.is_none_or(|r| a.result == r));
    audits.sort_by(|a, b| {
        b.processed_at
            .cmp(&a.processed_at)
            .then_with(|| b.audit_id.cmp(&a.audit_id))
    });
    Ok(audits)
}

/// Audits still waiting for a reviewer, oldest first.
pub async fn list_pending_review(state: &AppState) -> Result<Vec<AuditRecord>, AppError> {
    let mut ids = {
        let inner = lock_store(state)?;
        inner
            .audits_by_id
            .values()
            .filter(|a| a.is_reviewable())
            .map(|a| a.audit_id.clone())
            .collect::<HashSet<_>>()
    };
    if let Some(mut conn) = redis_conn(state).await? {
        let durable: Vec<String> = conn
            .smembers(AUDIT_PENDING_REVIEW_COLLECTION)
            .await
            .map_err(redis_unavailable)?;
        ids.extend(durable);
    }
    let mut audits = load_many(state, ids).await?;
    audits.retain(AuditRecord::is_reviewable);
    audits.sort_by(|a, b| {
        a.processed_at
            .cmp(&b.processed_at)
            .then_with(|| a.audit_id.cmp(&b.audit_id))
    });
    Ok(audits)
}

/// Accepts both the English and the Portuguese result names.
pub fn parse_result_filter(raw: Option<&str>) -> Result<Option<AuditResult>, AppError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    match raw.to_ascii_uppercase().as_str() {
        "APPROVED" | "APROVADO" => Ok(Some(AuditResult::Approved)),
        "REJECTED" | "REPROVADO" => Ok(Some(AuditResult::Rejected)),
        "NEEDS_REVIEW" | "REQUER_REVISAO" => Ok(Some(AuditResult::NeedsReview)),
        _ => Err(AppError::bad_request(
            "INVALID_RESULT_FILTER",
            format!("unknown audit result: {raw}"),
        )),
    }
}

pub fn outbox_due(state: &AppState, now: i64, limit: usize) -> Result<Vec<OutboxEntry>, AppError> {
    let inner = lock_store(state)?;
    Ok(inner.outbox.due(now, limit))
}

pub async fn outbox_mark_published(state: &AppState, entry: &OutboxEntry) -> Result<(), AppError> {
    lock_store(state)?.outbox.mark_published(entry.seq);
    let Some(mut conn) = redis_conn(state).await? else {
        return Ok(());
    };
    let _: i64 = conn
        .hdel(AUDIT_OUTBOX_COLLECTION, &entry.envelope.event_id)
        .await
        .map_err(redis_unavailable)?;
    Ok(())
}

pub async fn outbox_mark_failed(
    state: &AppState,
    entry: &OutboxEntry,
    error: &str,
) -> Result<(), AppError> {
    let updated = lock_store(state)?.outbox.mark_failed(
        entry.seq,
        error,
        now_millis(),
        state.config.worker_backoff_base_ms,
        state.config.worker_backoff_max_ms,
    );
    let (Some(updated), Some(mut conn)) = (updated, redis_conn(state).await?) else {
        return Ok(());
    };
    let payload = serde_json::to_string(&updated)
        .map_err(|e| AppError::internal("SERIALIZATION_ERROR", e.to_string()))?;
    let _: i64 = conn
        .hset(AUDIT_OUTBOX_COLLECTION, &updated.envelope.event_id, payload)
        .await
        .map_err(redis_unavailable)?;
    Ok(())
}

pub fn outbox_pending(state: &AppState) -> Result<u64, AppError> {
    Ok(lock_store(state)?.outbox.len() as u64)
}

pub async fn restore_outbox(state: &AppState) -> Result<usize, AppError> {
    let Some(mut conn) = redis_conn(state).await? else {
        return Ok(0);
    };
    let raw: HashMap<String, String> = conn
        .hgetall(AUDIT_OUTBOX_COLLECTION)
        .await
        .map_err(redis_unavailable)?;
    let mut entries = raw
        .values()
        .filter_map(|s| match serde_json::from_str::<OutboxEntry>(s) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping undecodable outbox entry");
                None
            }
        })
        .collect::<Vec<_>>();
    entries.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.envelope.event_id.cmp(&b.envelope.event_id))
    });
    let count = entries.len();
    let mut inner = lock_store(state)?;
    for entry in entries {
        inner.outbox.restore(entry);
    }
    Ok(count)
}

fn invalid_transition(record: &AuditRecord) -> AppError {
    AppError::conflict(
        "INVALID_TRANSITION",
        format!(
            "audit {} is {} at revision {}; only unrevised NEEDS_REVIEW audits can be revised",
            record.audit_id,
            record.result.as_str(),
            record.revision
        ),
    )
}

fn completed_envelope(record: &AuditRecord, occurred_at: i64) -> Result<EventEnvelope, AppError> {
    record
        .completed_event()
        .envelope(occurred_at)
        .map_err(|e| AppError::internal("EVENT_ENCODE_FAILED", e.to_string()))
}

fn outbox_entry(envelope: &EventEnvelope, now: i64) -> OutboxEntry {
    OutboxEntry {
        seq: 0,
        envelope: envelope.clone(),
        attempts: 0,
        next_attempt_at: now,
        last_error: None,
        created_at: now,
    }
}

async fn insert_audit(state: &AppState, record: &AuditRecord) -> Result<InsertOutcome, AppError> {
    let envelope = completed_envelope(record, record.processed_at)?;
    let durable = state.infra.is_some();

    if let Some(mut conn) = redis_conn(state).await? {
        let encode =
            |e: serde_json::Error| AppError::internal("SERIALIZATION_ERROR", e.to_string());
        let existing: Option<String> = redis::Script::new(INSERT_AUDIT_SCRIPT)
            .key(format!("{AUDITS_COLLECTION}:movement:{}", record.movement_id))
            .key(format!("{AUDITS_COLLECTION}:{}", record.audit_id))
            .key(format!("{AUDITS_COLLECTION}:producer:{}", record.producer_id))
            .key(AUDIT_OUTBOX_COLLECTION)
            .key(AUDIT_PENDING_REVIEW_COLLECTION)
            .arg(&record.audit_id)
            .arg(serde_json::to_string(record).map_err(encode)?)
            .arg(record.processed_at)
            .arg(&envelope.event_id)
            .arg(serde_json::to_string(&outbox_entry(&envelope, record.processed_at)).map_err(encode)?)
            .arg(if record.is_reviewable() { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await
            .map_err(redis_unavailable)?;
        if let Some(existing_id) = existing {
            let existing = load_audit_from_redis(state, &existing_id)
                .await?
                .ok_or_else(|| {
                    AppError::unavailable(
                        "DOWNSTREAM_UNAVAILABLE",
                        format!("audit {existing_id} indexed but not readable"),
                    )
                })?;
            return Ok(InsertOutcome::Existing(existing));
        }
    }

    let mut inner = lock_store(state)?;
    // Without Redis this lock section is the uniqueness gate.
    if !durable
        && let Some(existing) = inner
            .audit_id_by_movement
            .get(&record.movement_id)
            .and_then(|id| inner.audits_by_id.get(id))
    {
        return Ok(InsertOutcome::Existing(existing.clone()));
    }
    index_audit(&mut inner, record);
    inner.outbox.enqueue(envelope, record.processed_at);
    Ok(InsertOutcome::Inserted)
}

async fn commit_revision(
    state: &AppState,
    current: &AuditRecord,
    revised: &AuditRecord,
) -> Result<(), AppError> {
    let reviewed_at = revised.reviewed_at.unwrap_or_else(now_millis);
    let envelope = completed_envelope(revised, reviewed_at)?;
    let durable = state.infra.is_some();

    if let Some(mut conn) = redis_conn(state).await? {
        let encode =
            |e: serde_json::Error| AppError::internal("SERIALIZATION_ERROR", e.to_string());
        let outcome: String = redis::Script::new(REVISE_AUDIT_SCRIPT)
            .key(format!("{AUDITS_COLLECTION}:{}", revised.audit_id))
            .key(AUDIT_OUTBOX_COLLECTION)
            .key(AUDIT_PENDING_REVIEW_COLLECTION)
            .arg(serde_json::to_string(revised).map_err(encode)?)
            .arg(&envelope.event_id)
            .arg(serde_json::to_string(&outbox_entry(&envelope, reviewed_at)).map_err(encode)?)
            .arg(&revised.audit_id)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_unavailable)?;
        match outcome.as_str() {
            "ok" => {}
            "missing" => {
                return Err(AppError::not_found(
                    "AUDIT_NOT_FOUND",
                    format!("audit {} not found", revised.audit_id),
                ));
            }
            _ => {
                let latest = load_audit_from_redis(state, &revised.audit_id)
                    .await?
                    .unwrap_or_else(|| current.clone());
                return Err(invalid_transition(&latest));
            }
        }
    }

    let mut inner = lock_store(state)?;
    if !durable
        && let Some(stored) = inner.audits_by_id.get(&revised.audit_id)
        && !stored.is_reviewable()
    {
        return Err(invalid_transition(stored));
    }
    index_audit(&mut inner, revised);
    inner.outbox.enqueue(envelope, reviewed_at);
    Ok(())
}

async fn load_many(state: &AppState, ids: HashSet<String>) -> Result<Vec<AuditRecord>, AppError> {
    let mut audits = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(record) = get_audit(state, &id).await? {
            audits.push(record);
        }
    }
    Ok(audits)
}

fn index_audit(inner: &mut AuditStoreInner, record: &AuditRecord) {
    let is_new = inner
        .audits_by_id
        .insert(record.audit_id.clone(), record.clone())
        .is_none();
    inner
        .audit_id_by_movement
        .insert(record.movement_id.clone(), record.audit_id.clone());
    if is_new {
        inner
            .ids_by_producer
            .entry(record.producer_id.clone())
            .or_default()
            .push(record.audit_id.clone());
    }
}

fn lock_store(state: &AppState) -> Result<MutexGuard<'_, AuditStoreInner>, AppError> {
    state
        .store
        .inner
        .lock()
        .map_err(|_| AppError::internal("STORE_LOCK_ERROR", "audit store lock poisoned"))
}

async fn load_audit_from_redis(
    state: &AppState,
    audit_id: &str,
) -> Result<Option<AuditRecord>, AppError> {
    let Some(mut conn) = redis_conn(state).await? else {
        return Ok(None);
    };
    let raw: Option<String> = conn
        .get(format!("{AUDITS_COLLECTION}:{audit_id}"))
        .await
        .map_err(redis_unavailable)?;
    let record = raw
        .map(|s| serde_json::from_str::<AuditRecord>(&s))
        .transpose()
        .map_err(|e| AppError::internal("REDIS_DECODE_FAILED", e.to_string()))?;
    if let Some(record) = &record {
        index_audit(&mut *lock_store(state)?, record);
    }
    Ok(record)
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

fn redis_unavailable(e: impl Display) -> AppError {
    AppError::unavailable("DOWNSTREAM_UNAVAILABLE", format!("redis: {e}"))
}
