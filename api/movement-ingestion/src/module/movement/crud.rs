use super::error::AppError;
use super::model::IdempotencyRecord;
use super::schema::{
    CreateMovementRequest, CreateMovementResponse, GetMovementResponse, ListMovementsQuery,
    ListMovementsResponse, OutboxStatsView,
};
use crate::app::AppState;
use crate::infra::{
    MOVEMENT_IDEMPOTENCY_COLLECTION, MOVEMENT_OUTBOX_COLLECTION, MOVEMENTS_COLLECTION,
};
use crate::service::attachment_service::verify_attachments;
use crate::service::metrics_service;
use crate::service::outbox_service;
use crate::service::validation_service::{validate_create_request, validate_idempotency_key};
use chrono::{DateTime, Utc};
use ledger_events::canonical::canonical_hash;
use ledger_events::events::{EventEnvelope, MovementRecorded};
use ledger_events::models::Movement;
use ledger_events::now_millis;
use ledger_events::outbox::{OutboxEntry, OutboxQueue};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

// KEYS: idempotency, movement, producer index, commodity index, outbox hash.
// Returns the stored idempotency record when the key is already taken.
const COMMIT_SCRIPT: &str = r#"
if ARGV[1] == '1' then
  local existing = redis.call('GET', KEYS[1])
  if existing then
    return existing
  end
  redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
end
redis.call('SET', KEYS[2], ARGV[4])
redis.call('ZADD', KEYS[3], ARGV[6], ARGV[5])
redis.call('ZADD', KEYS[4], ARGV[6], ARGV[5])
redis.call('HSET', KEYS[5], ARGV[7], ARGV[8])
return false
"#;

#[derive(Debug, Default)]
pub struct MovementStore {
    inner: Mutex<MovementStoreInner>,
}

#[derive(Debug, Default)]
struct MovementStoreInner {
    movements_by_id: HashMap<String, Movement>,
    ids_by_producer: HashMap<String, Vec<String>>,
    ids_by_commodity: HashMap<String, Vec<String>>,
    idempotency_by_key: HashMap<String, IdempotencyRecord>,
    outbox: OutboxQueue,
}

enum CommitOutcome {
    Committed,
    KeyTaken(IdempotencyRecord),
}

pub async fn create_movement(
    state: &AppState,
    req: CreateMovementRequest,
    header_key: Option<String>,
) -> Result<CreateMovementResponse, AppError> {
    let key = match header_key.or_else(|| req.idempotency_key.clone()) {
        Some(raw) => Some(validate_idempotency_key(&raw)?),
        None => None,
    };
    let normalized = validate_create_request(&req, &state.config)?;
    let request_hash = canonical_hash(&normalized)
        .map_err(|e| AppError::internal("SERIALIZATION_ERROR", e))?;

    if let Some(key) = &key
        && let Some(existing) = find_idempotency_record(state, key).await?
    {
        return replay(existing, &request_hash);
    }

    if state.config.attachment_verify_enabled {
        verify_attachments(state.attachments.as_ref(), &normalized.attachments).await?;
    }

    let now = now_millis();
    let movement = normalized.into_movement(generate_movement_id(), now);
    let response = CreateMovementResponse {
        accepted: true,
        idempotent: false,
        movement_id: movement.movement_id.clone(),
        producer_id: movement.producer_id.clone(),
        recorded_at: now,
        error_code: None,
        reason: "movement recorded".to_string(),
    };
    let record = key.map(|key| IdempotencyRecord {
        key,
        request_hash: request_hash.clone(),
        movement_id: movement.movement_id.clone(),
        response: response.clone(),
        created_at: now,
    });

    if let CommitOutcome::KeyTaken(existing) =
        commit_movement(state, &movement, record.as_ref(), now).await?
    {
        return replay(existing, &request_hash);
    }

    metrics_service::inc_movements_recorded();
    info!(
        movement_id = %movement.movement_id,
        producer_id = %movement.producer_id,
        commodity_id = %movement.commodity_id,
        movement_type = movement.movement_type.as_str(),
        "movement recorded"
    );
    outbox_service::relay_now(state).await;
    Ok(response)
}

pub async fn get_movement(
    state: &AppState,
    movement_id: &str,
) -> Result<GetMovementResponse, AppError> {
    let movement = match get_local_movement(state, movement_id)? {
        Some(m) => Some(m),
        None => load_movement_from_redis(state, movement_id).await?,
    };
    Ok(match movement {
        Some(movement) => GetMovementResponse {
            found: true,
            movement: Some(movement),
            error_code: None,
            reason: "movement found".to_string(),
        },
        None => GetMovementResponse {
            found: false,
            movement: None,
            error_code: Some("MOVEMENT_NOT_FOUND".to_string()),
            reason: "movement not found".to_string(),
        },
    })
}

pub async fn list_movements_by_producer(
    state: &AppState,
    producer_id: &str,
    query: &ListMovementsQuery,
) -> Result<ListMovementsResponse, AppError> {
    if producer_id.trim().is_empty() {
        return Err(AppError::bad_request(
            "INVALID_PRODUCER_ID",
            "producer_id is required",
        ));
    }
    let from = parse_bound("from", query.from.as_deref())?;
    let to = parse_bound("to", query.to.as_deref())?;
    let index_key = format!("{MOVEMENTS_COLLECTION}:producer:{producer_id}");
    let local_ids = {
        let inner = lock_store(&state.store)?;
        inner
            .ids_by_producer
            .get(producer_id)
            .cloned()
            .unwrap_or_default()
    };
    let mut movements = collect_movements(state, local_ids, &index_key).await?;
    movements.retain(|m| {
        query
            .commodity_id
            .as_deref()
            .is_none_or(|c| m.commodity_id == c)
            && from.is_none_or(|f| m.occurred_at >= f)
            && to.is_none_or(|t| m.occurred_at <= t)
    });
    Ok(list_response(movements))
}

pub async fn list_movements_by_commodity(
    state: &AppState,
    commodity_id: &str,
) -> Result<ListMovementsResponse, AppError> {
    if commodity_id.trim().is_empty() {
        return Err(AppError::bad_request(
            "INVALID_COMMODITY_ID",
            "commodity_id is required",
        ));
    }
    let index_key = format!("{MOVEMENTS_COLLECTION}:commodity:{commodity_id}");
    let local_ids = {
        let inner = lock_store(&state.store)?;
        inner
            .ids_by_commodity
            .get(commodity_id)
            .cloned()
            .unwrap_or_default()
    };
    let movements = collect_movements(state, local_ids, &index_key).await?;
    Ok(list_response(movements))
}

/// Drops idempotency records older than the retention window. Redis expires
/// its copies on its own through the key TTL.
pub fn purge_expired_idempotency(state: &AppState, now: i64) -> Result<usize, AppError> {
    let cutoff = idempotency_cutoff(now, state.config.idempotency_ttl_seconds);
    let mut inner = lock_store(&state.store)?;
    let before = inner.idempotency_by_key.len();
    inner
        .idempotency_by_key
        .retain(|_, record| record.created_at > cutoff);
    Ok(before - inner.idempotency_by_key.len())
}

pub fn outbox_due(state: &AppState, now: i64, limit: usize) -> Result<Vec<OutboxEntry>, AppError> {
    let inner = lock_store(&state.store)?;
    Ok(inner.outbox.due(now, limit))
}

pub async fn outbox_mark_published(state: &AppState, entry: &OutboxEntry) -> Result<(), AppError> {
    {
        let mut inner = lock_store(&state.store)?;
        inner.outbox.mark_published(entry.seq);
    }
    let Some(mut conn) = redis_conn(state).await? else {
        return Ok(());
    };
    let _: i64 = conn
        .hdel(MOVEMENT_OUTBOX_COLLECTION, &entry.envelope.event_id)
        .await
        .map_err(redis_unavailable)?;
    Ok(())
}

pub async fn outbox_mark_failed(
    state: &AppState,
    entry: &OutboxEntry,
    error: &str,
) -> Result<(), AppError> {
    let updated = {
        let mut inner = lock_store(&state.store)?;
        inner.outbox.mark_failed(
            entry.seq,
            error,
            now_millis(),
            state.config.worker_backoff_base_ms,
            state.config.worker_backoff_max_ms,
        )
    };
    let (Some(updated), Some(mut conn)) = (updated, redis_conn(state).await?) else {
        return Ok(());
    };
    let payload = serde_json::to_string(&updated)
        .map_err(|e| AppError::internal("SERIALIZATION_ERROR", e.to_string()))?;
    let _: i64 = conn
        .hset(MOVEMENT_OUTBOX_COLLECTION, &updated.envelope.event_id, payload)
        .await
        .map_err(redis_unavailable)?;
    Ok(())
}

pub fn outbox_stats(state: &AppState) -> Result<OutboxStatsView, AppError> {
    let inner = lock_store(&state.store)?;
    Ok(OutboxStatsView {
        pending: inner.outbox.len() as u64,
        oldest_pending_at: inner.outbox.oldest_created_at(),
    })
}

/// Reloads outbox entries committed before a restart.
pub async fn restore_outbox(state: &AppState) -> Result<usize, AppError> {
    let Some(mut conn) = redis_conn(state).await? else {
        return Ok(0);
    };
    let raw: HashMap<String, String> = conn
        .hgetall(MOVEMENT_OUTBOX_COLLECTION)
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
    let mut inner = lock_store(&state.store)?;
    for entry in entries {
        inner.outbox.restore(entry);
    }
    Ok(count)
}

fn replay(
    existing: IdempotencyRecord,
    request_hash: &str,
) -> Result<CreateMovementResponse, AppError> {
    if existing.request_hash != request_hash {
        metrics_service::inc_idempotency_conflicts();
        return Err(AppError::idempotency_conflict(&existing.key));
    }
    metrics_service::inc_idempotent_replays();
    let mut replayed = existing.response;
    replayed.idempotent = true;
    Ok(replayed)
}

async fn commit_movement(
    state: &AppState,
    movement: &Movement,
    record: Option<&IdempotencyRecord>,
    now: i64,
) -> Result<CommitOutcome, AppError> {
    let envelope = MovementRecorded {
        movement: movement.clone(),
    }
    .envelope()
    .map_err(|e| AppError::internal("EVENT_ENCODE_FAILED", e.to_string()))?;

    let durable = state.infra.is_some();
    if let Some(existing) = persist_commit(state, movement, record, &envelope, now).await? {
        warm_idempotency(state, &existing)?;
        return Ok(CommitOutcome::KeyTaken(existing));
    }

    let mut inner = lock_store(&state.store)?;
    if let Some(record) = record {
        // Without Redis this lock section is the only gate for the key.
        if !durable
            && let Some(existing) = live_record(&inner, &record.key, now, state)
        {
            return Ok(CommitOutcome::KeyTaken(existing));
        }
        inner
            .idempotency_by_key
            .insert(record.key.clone(), record.clone());
    }
    index_movement(&mut inner, movement);
    inner.outbox.enqueue(envelope, now);
    Ok(CommitOutcome::Committed)
}

async fn persist_commit(
    state: &AppState,
    movement: &Movement,
    record: Option<&IdempotencyRecord>,
    envelope: &EventEnvelope,
    now: i64,
) -> Result<Option<IdempotencyRecord>, AppError> {
    let Some(mut conn) = redis_conn(state).await? else {
        return Ok(None);
    };
    let entry = OutboxEntry {
        seq: 0,
        envelope: envelope.clone(),
        attempts: 0,
        next_attempt_at: now,
        last_error: None,
        created_at: now,
    };
    let encode = |e: serde_json::Error| AppError::internal("SERIALIZATION_ERROR", e.to_string());
    let record_json = match record {
        Some(r) => serde_json::to_string(r).map_err(encode)?,
        None => String::new(),
    };
    let idempotency_key = format!(
        "{MOVEMENT_IDEMPOTENCY_COLLECTION}:{}",
        record.map(|r| r.key.as_str()).unwrap_or("-")
    );

    let existing: Option<String> = redis::Script::new(COMMIT_SCRIPT)
        .key(idempotency_key)
        .key(format!("{MOVEMENTS_COLLECTION}:{}", movement.movement_id))
        .key(format!("{MOVEMENTS_COLLECTION}:producer:{}", movement.producer_id))
        .key(format!("{MOVEMENTS_COLLECTION}:commodity:{}", movement.commodity_id))
        .key(MOVEMENT_OUTBOX_COLLECTION)
        .arg(if record.is_some() { "1" } else { "0" })
        .arg(record_json)
        .arg(state.config.idempotency_ttl_seconds.max(1))
        .arg(serde_json::to_string(movement).map_err(encode)?)
        .arg(&movement.movement_id)
        .arg(movement.occurred_at.timestamp_millis())
        .arg(&envelope.event_id)
        .arg(serde_json::to_string(&entry).map_err(encode)?)
        .invoke_async(&mut conn)
        .await
        .map_err(redis_unavailable)?;

    existing
        .map(|raw| serde_json::from_str::<IdempotencyRecord>(&raw))
        .transpose()
        .map_err(|e| AppError::internal("REDIS_DECODE_FAILED", e.to_string()))
}

async fn find_idempotency_record(
    state: &AppState,
    key: &str,
) -> Result<Option<IdempotencyRecord>, AppError> {
    {
        let inner = lock_store(&state.store)?;
        if let Some(record) = live_record(&inner, key, now_millis(), state) {
            return Ok(Some(record));
        }
    }
    let Some(mut conn) = redis_conn(state).await? else {
        return Ok(None);
    };
    let raw: Option<String> = conn
        .get(format!("{MOVEMENT_IDEMPOTENCY_COLLECTION}:{key}"))
        .await
        .map_err(redis_unavailable)?;
    let record = raw
        .map(|s| serde_json::from_str::<IdempotencyRecord>(&s))
        .transpose()
        .map_err(|e| AppError::internal("REDIS_DECODE_FAILED", e.to_string()))?;
    if let Some(record) = &record {
        warm_idempotency(state, record)?;
    }
    Ok(record)
}

fn idempotency_cutoff(now: i64, ttl_seconds: i64) -> i64 {
    now.saturating_sub(ttl_seconds.saturating_mul(1_000))
}

fn live_record(
    inner: &MovementStoreInner,
    key: &str,
    now: i64,
    state: &AppState,
) -> Option<IdempotencyRecord> {
    let cutoff = idempotency_cutoff(now, state.config.idempotency_ttl_seconds);
    inner
        .idempotency_by_key
        .get(key)
        .filter(|r| r.created_at > cutoff)
        .cloned()
}

async fn collect_movements(
    state: &AppState,
    local_ids: Vec<String>,
    index_key: &str,
) -> Result<Vec<Movement>, AppError> {
    let mut ids = local_ids.into_iter().collect::<HashSet<_>>();
    if let Some(mut conn) = redis_conn(state).await? {
        let durable_ids: Vec<String> = conn
            .zrange(index_key, 0, -1)
            .await
            .map_err(redis_unavailable)?;
        ids.extend(durable_ids);
    }

    let mut movements = Vec::with_capacity(ids.len());
    for id in ids {
        let movement = match get_local_movement(state, &id)? {
            Some(m) => Some(m),
            None => load_movement_from_redis(state, &id).await?,
        };
        if let Some(movement) = movement {
            movements.push(movement);
        }
    }
    movements.sort_by(|a, b| {
        b.occurred_at
            .cmp(&a.occurred_at)
            .then_with(|| b.movement_id.cmp(&a.movement_id))
    });
    Ok(movements)
}

fn list_response(movements: Vec<Movement>) -> ListMovementsResponse {
    let found = !movements.is_empty();
    ListMovementsResponse {
        found,
        movements,
        error_code: if found {
            None
        } else {
            Some("MOVEMENTS_NOT_FOUND".to_string())
        },
        reason: if found {
            "movements found".to_string()
        } else {
            "no movements match".to_string()
        },
    }
}

fn parse_bound(name: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, AppError> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(s.trim())
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                AppError::bad_request("INVALID_RANGE", format!("{name} is not RFC 3339: {e}"))
            })
    })
    .transpose()
}

fn index_movement(inner: &mut MovementStoreInner, movement: &Movement) {
    if inner
        .movements_by_id
        .insert(movement.movement_id.clone(), movement.clone())
        .is_some()
    {
        return;
    }
    inner
        .ids_by_producer
        .entry(movement.producer_id.clone())
        .or_default()
        .push(movement.movement_id.clone());
    inner
        .ids_by_commodity
        .entry(movement.commodity_id.clone())
        .or_default()
        .push(movement.movement_id.clone());
}

fn generate_movement_id() -> String {
    Uuid::now_v7().to_string()
}

fn lock_store(store: &MovementStore) -> Result<MutexGuard<'_, MovementStoreInner>, AppError> {
    store
        .inner
        .lock()
        .map_err(|_| AppError::internal("STORE_LOCK_ERROR", "movement store lock poisoned"))
}

fn get_local_movement(state: &AppState, movement_id: &str) -> Result<Option<Movement>, AppError> {
    let inner = lock_store(&state.store)?;
    Ok(inner.movements_by_id.get(movement_id).cloned())
}

fn warm_idempotency(state: &AppState, record: &IdempotencyRecord) -> Result<(), AppError> {
    let mut inner = lock_store(&state.store)?;
    inner
        .idempotency_by_key
        .insert(record.key.clone(), record.clone());
    Ok(())
}

async fn load_movement_from_redis(
    state: &AppState,
    movement_id: &str,
) -> Result<Option<Movement>, AppError> {
    let Some(mut conn) = redis_conn(state).await? else {
        return Ok(None);
    };
    let raw: Option<String> = conn
        .get(format!("{MOVEMENTS_COLLECTION}:{movement_id}"))
        .await
        .map_err(redis_unavailable)?;
    let movement = raw
        .map(|s| serde_json::from_str::<Movement>(&s))
        .transpose()
        .map_err(|e| AppError::internal("REDIS_DECODE_FAILED", e.to_string()))?;
    if let Some(movement) = &movement {
        let mut inner = lock_store(&state.store)?;
        index_movement(&mut inner, movement);
    }
    Ok(movement)
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
