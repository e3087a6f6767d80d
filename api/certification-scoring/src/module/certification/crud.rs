use super::model::{SeloVerde, TierChange, Trigger, outcome_from_event};
use crate::app::AppState;
use crate::infra::{
    AUDIT_OUTCOMES_COLLECTION, CERTIFICATION_OUTBOX_COLLECTION, CERTIFICATIONS_COLLECTION,
    APPLIED_REVISIONS_COLLECTION, TIER_CHANGES_COLLECTION,
};
use crate::module::certification::error::AppError;
use crate::service::metrics_service;
use crate::service::outbox_service;
use ledger_events::events::{AuditCompleted, EventEnvelope};
use ledger_events::models::CertificationTier;
use ledger_events::now_millis;
use ledger_events::outbox::{OutboxEntry, OutboxQueue};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use seal_scoring::errors::ScoringError;
use seal_scoring::handler::compute_score;
use seal_scoring::models::AuditOutcome;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub const DEFAULT_RECALCULATION_REASON: &str = "recalculo-manual";

// KEYS: producer outcomes hash. Keeps the highest revision of each audit.
const UPSERT_OUTCOME_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if current then
  local stored = cjson.decode(current)
  if (tonumber(stored['revision']) or 0) > tonumber(ARGV[2]) then
    return 0
  end
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
return 1
"#;

// KEYS: certification, tier change list, outbox hash, applied revision hash.
// Returns 0 when the stored version is not the expected one.
const COMMIT_CERTIFICATION_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
local version = 0
if current then
  version = tonumber(cjson.decode(current)['version']) or 0
end
if version ~= tonumber(ARGV[1]) then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2])
if ARGV[3] ~= '' then
  redis.call('RPUSH', KEYS[2], ARGV[3])
  redis.call('HSET', KEYS[3], ARGV[4], ARGV[5])
end
if ARGV[6] ~= '' then
  local applied = tonumber(redis.call('HGET', KEYS[4], ARGV[6]) or '-1')
  if tonumber(ARGV[7]) > applied then
    redis.call('HSET', KEYS[4], ARGV[6], ARGV[7])
  end
end
return 1
"#;

#[derive(Debug, Default)]
pub struct CertificationStore {
    inner: Mutex<CertificationStoreInner>,
}

#[derive(Debug, Default)]
struct CertificationStoreInner {
    outcomes_by_producer: HashMap<String, HashMap<String, AuditOutcome>>,
    certifications: HashMap<String, SeloVerde>,
    tier_changes: HashMap<String, Vec<TierChange>>,
    /// Highest committed revision per audit id.
    applied_revisions: HashMap<String, u32>,
    outbox: OutboxQueue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recalculation {
    pub certification: SeloVerde,
    pub tier_change: Option<TierChange>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied(Recalculation),
    /// This revision of the audit, or a later one, was already folded in.
    Duplicate,
}

/// Everything one recomputation reads, taken at a single certification version.
struct Snapshot {
    outcomes: Vec<AuditOutcome>,
    certification: Option<SeloVerde>,
    last_change: Option<TierChange>,
}

enum CommitOutcome {
    Committed,
    Conflict,
}

/// Folds one `AuditCompleted` into the producer's certification.
///
/// The outcome is recorded first (highest revision wins), then the
/// certification is recomputed from the full outcome history. The audit's
/// revision is marked applied in the same commit as the new certification, so
/// a redelivery before that commit simply recomputes again. Replay state is
/// one entry per audit, never one per event.
pub async fn apply_audit_completed(
    state: &AppState,
    event_id: &str,
    event: &AuditCompleted,
) -> Result<ApplyOutcome, AppError> {
    if event.producer_id.trim().is_empty() {
        return Err(AppError::bad_request(
            "INVALID_PRODUCER_ID",
            format!("audit {} carries no producer_id", event.audit_id),
        ));
    }
    if already_applied(state, &event.audit_id, event.revision).await? {
        metrics_service::inc_duplicate_events();
        debug!(event_id = %event_id, producer_id = %event.producer_id, "audit event already applied");
        return Ok(ApplyOutcome::Duplicate);
    }
    if event.rule_set_version == 0 {
        record_scoring_failure();
        return Err(ScoringError::MissingRuleSetVersion {
            audit_id: event.audit_id.clone(),
        }
        .into());
    }

    let outcome = outcome_from_event(event);
    if !upsert_outcome(state, &event.producer_id, &outcome).await? {
        metrics_service::inc_stale_revisions();
        debug!(
            audit_id = %event.audit_id,
            revision = event.revision,
            "older audit revision ignored"
        );
    }

    let trigger = Trigger::AuditCompleted {
        audit_id: event.audit_id.clone(),
        revision: event.revision,
        reason: format!("audit {} {}", event.audit_id, event.result.as_str()),
    };
    let recalculation = recompute(state, &event.producer_id, &trigger).await?;
    metrics_service::inc_events_applied();
    Ok(ApplyOutcome::Applied(recalculation))
}

/// On-demand recomputation. Runs the same path as the event consumer.
pub async fn recalculate_now(
    state: &AppState,
    producer_id: &str,
    reason: Option<String>,
) -> Result<Recalculation, AppError> {
    let producer_id = producer_id.trim();
    if producer_id.is_empty() {
        return Err(AppError::bad_request(
            "INVALID_PRODUCER_ID",
            "producer_id is required",
        ));
    }
    let snapshot = load_snapshot(state, producer_id).await?;
    if snapshot.outcomes.is_empty() && snapshot.certification.is_none() {
        return Err(selo_not_found(producer_id));
    }
    let reason = reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_RECALCULATION_REASON.to_string());
    let recalculation = recompute(state, producer_id, &Trigger::Manual { reason }).await?;
    metrics_service::inc_recalculations();
    Ok(recalculation)
}

/// Optimistic recomputation loop. A lost race reloads the history and tries
/// again; after the retry budget the caller sees `OPTIMISTIC_CONFLICT`.
pub async fn recompute(
    state: &AppState,
    producer_id: &str,
    trigger: &Trigger,
) -> Result<Recalculation, AppError> {
    let max_attempts = state.config.scoring_max_cas_retries.max(1);
    for attempt in 1..=max_attempts {
        let snapshot = load_snapshot(state, producer_id).await?;
        let score = compute_score(&snapshot.outcomes, &state.config.scoring_policy)
            .inspect_err(|_| record_scoring_failure())?;

        let now = now_millis();
        let previous_tier = snapshot
            .certification
            .as_ref()
            .map(|c| c.tier)
            .unwrap_or_default();
        let expected_version = snapshot.certification.as_ref().map_or(0, |c| c.version);
        let certification = SeloVerde::from_score(producer_id, &score, expected_version + 1, now);

        let log_row = score.tier != previous_tier
            || (trigger.is_manual() && state.config.log_reassessments);
        let tier_change = log_row.then(|| {
            next_tier_change(
                snapshot.last_change.as_ref(),
                &certification,
                previous_tier,
                trigger.reason(),
                now,
            )
        });

        match commit_certification(
            state,
            expected_version,
            &certification,
            tier_change.as_ref(),
            trigger.applied_revision(),
        )
        .await?
        {
            CommitOutcome::Committed => {
                log_commit(&certification, tier_change.as_ref(), previous_tier, trigger);
                if tier_change.is_some() {
                    metrics_service::inc_tier_changes();
                    outbox_service::relay_now(state).await;
                }
                return Ok(Recalculation {
                    certification,
                    tier_change,
                });
            }
            CommitOutcome::Conflict => {
                metrics_service::inc_cas_conflicts();
                warn!(
                    producer_id = %producer_id,
                    attempt,
                    expected_version,
                    "certification changed concurrently; recomputing"
                );
            }
        }
    }
    Err(AppError::conflict(
        "OPTIMISTIC_CONFLICT",
        format!("certification of {producer_id} kept changing after {max_attempts} attempts"),
    ))
}

pub async fn get_certification(
    state: &AppState,
    producer_id: &str,
) -> Result<Option<SeloVerde>, AppError> {
    let Some(mut conn) = redis_conn(state).await? else {
        return Ok(lock_store(state)?.certifications.get(producer_id).cloned());
    };
    let raw: Option<String> = conn
        .get(format!("{CERTIFICATIONS_COLLECTION}:{producer_id}"))
        .await
        .map_err(redis_unavailable)?;
    raw.map(|s| serde_json::from_str::<SeloVerde>(&s))
        .transpose()
        .map_err(decode_failed)
}

/// Tier trail of a producer, oldest first.
pub async fn tier_history(
    state: &AppState,
    producer_id: &str,
) -> Result<Vec<TierChange>, AppError> {
    let Some(mut conn) = redis_conn(state).await? else {
        return Ok(lock_store(state)?
            .tier_changes
            .get(producer_id)
            .cloned()
            .unwrap_or_default());
    };
    let raw: Vec<String> = conn
        .lrange(format!("{TIER_CHANGES_COLLECTION}:{producer_id}"), 0, -1)
        .await
        .map_err(redis_unavailable)?;
    raw.iter()
        .map(|s| serde_json::from_str::<TierChange>(s))
        .collect::<Result<Vec<_>, _>>()
        .map_err(decode_failed)
}

pub fn selo_not_found(producer_id: &str) -> AppError {
    AppError::not_found(
        "SELO_NOT_FOUND",
        format!("no certification for producer {producer_id}"),
    )
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
        .hdel(CERTIFICATION_OUTBOX_COLLECTION, &entry.envelope.event_id)
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
    let payload = serde_json::to_string(&updated).map_err(encode_failed)?;
    let _: i64 = conn
        .hset(CERTIFICATION_OUTBOX_COLLECTION, &updated.envelope.event_id, payload)
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
        .hgetall(CERTIFICATION_OUTBOX_COLLECTION)
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

/// Rows are numbered per producer and their timestamps never go backwards,
/// even when the wall clock does.
fn next_tier_change(
    last: Option<&TierChange>,
    certification: &SeloVerde,
    previous_tier: CertificationTier,
    reason: &str,
    now: i64,
) -> TierChange {
    let seq = last.map_or(1, |c| c.seq + 1);
    let created_at = last.map_or(now, |c| now.max(c.created_at + 1));
    TierChange {
        change_id: TierChange::change_id_for(&certification.producer_id, seq),
        producer_id: certification.producer_id.clone(),
        seq,
        previous_tier,
        new_tier: certification.tier,
        score: certification.score,
        status: certification.status,
        reason: reason.to_string(),
        created_at,
    }
}

fn log_commit(
    certification: &SeloVerde,
    tier_change: Option<&TierChange>,
    previous_tier: CertificationTier,
    trigger: &Trigger,
) {
    match tier_change {
        Some(change) if !change.is_reassessment() => info!(
            producer_id = %certification.producer_id,
            previous_tier = previous_tier.as_str(),
            new_tier = certification.tier.as_str(),
            score = certification.score,
            status = certification.status.as_str(),
            reason = %trigger.reason(),
            "certification tier changed"
        ),
        Some(_) => info!(
            producer_id = %certification.producer_id,
            tier = certification.tier.as_str(),
            score = certification.score,
            reason = %trigger.reason(),
            "certification reassessed"
        ),
        None => debug!(
            producer_id = %certification.producer_id,
            tier = certification.tier.as_str(),
            score = certification.score,
            version = certification.version,
            "certification recomputed"
        ),
    }
}

fn record_scoring_failure() {
    metrics_service::inc_scoring_failures();
    metrics_service::set_last_error_ts(now_millis());
}

async fn already_applied(
    state: &AppState,
    audit_id: &str,
    revision: u32,
) -> Result<bool, AppError> {
    let local = lock_store(state)?.applied_revisions.get(audit_id).copied();
    if local.is_some_and(|applied| applied >= revision) {
        return Ok(true);
    }
    let Some(mut conn) = redis_conn(state).await? else {
        return Ok(false);
    };
    let stored: Option<u32> = conn
        .hget(APPLIED_REVISIONS_COLLECTION, audit_id)
        .await
        .map_err(redis_unavailable)?;
    Ok(stored.is_some_and(|applied| applied >= revision))
}

/// Returns false when a higher revision of the same audit is already stored.
async fn upsert_outcome(
    state: &AppState,
    producer_id: &str,
    outcome: &AuditOutcome,
) -> Result<bool, AppError> {
    if let Some(mut conn) = redis_conn(state).await? {
        let written: i64 = redis::Script::new(UPSERT_OUTCOME_SCRIPT)
            .key(format!("{AUDIT_OUTCOMES_COLLECTION}:{producer_id}"))
            .arg(&outcome.audit_id)
            .arg(outcome.revision)
            .arg(serde_json::to_string(outcome).map_err(encode_failed)?)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_unavailable)?;
        if written == 0 {
            return Ok(false);
        }
    }

    let mut inner = lock_store(state)?;
    let outcomes = inner
        .outcomes_by_producer
        .entry(producer_id.to_string())
        .or_default();
    if outcomes
        .get(&outcome.audit_id)
        .is_some_and(|stored| stored.revision > outcome.revision)
    {
        return Ok(false);
    }
    outcomes.insert(outcome.audit_id.clone(), outcome.clone());
    Ok(true)
}

async fn load_snapshot(state: &AppState, producer_id: &str) -> Result<Snapshot, AppError> {
    let Some(mut conn) = redis_conn(state).await? else {
        let inner = lock_store(state)?;
        return Ok(Snapshot {
            outcomes: inner
                .outcomes_by_producer
                .get(producer_id)
                .map(|o| o.values().cloned().collect())
                .unwrap_or_default(),
            certification: inner.certifications.get(producer_id).cloned(),
            last_change: inner
                .tier_changes
                .get(producer_id)
                .and_then(|c| c.last())
                .cloned(),
        });
    };

    // The certification is read first; a commit that lands after it fails
    // this attempt's CAS, so the outcomes read below are never older than
    // the version being replaced.
    let certification = get_certification(state, producer_id).await?;
    let raw_outcomes: HashMap<String, String> = conn
        .hgetall(format!("{AUDIT_OUTCOMES_COLLECTION}:{producer_id}"))
        .await
        .map_err(redis_unavailable)?;
    let outcomes = raw_outcomes
        .values()
        .map(|s| serde_json::from_str::<AuditOutcome>(s))
        .collect::<Result<Vec<_>, _>>()
        .map_err(decode_failed)?;
    let raw_last: Option<String> = conn
        .lindex(format!("{TIER_CHANGES_COLLECTION}:{producer_id}"), -1)
        .await
        .map_err(redis_unavailable)?;
    let last_change = raw_last
        .map(|s| serde_json::from_str::<TierChange>(&s))
        .transpose()
        .map_err(decode_failed)?;
    Ok(Snapshot {
        outcomes,
        certification,
        last_change,
    })
}

async fn commit_certification(
    state: &AppState,
    expected_version: u64,
    certification: &SeloVerde,
    tier_change: Option<&TierChange>,
    applied: Option<(&str, u32)>,
) -> Result<CommitOutcome, AppError> {
    let envelope = tier_change.map(changed_envelope).transpose()?;
    let durable = state.infra.is_some();

    if let Some(mut conn) = redis_conn(state).await? {
        let (change_json, outbox_id, outbox_json) = match (tier_change, &envelope) {
            (Some(change), Some(envelope)) => (
                serde_json::to_string(change).map_err(encode_failed)?,
                envelope.event_id.clone(),
                serde_json::to_string(&outbox_entry(envelope, change.created_at))
                    .map_err(encode_failed)?,
            ),
            _ => (String::new(), String::new(), String::new()),
        };
        let committed: i64 = redis::Script::new(COMMIT_CERTIFICATION_SCRIPT)
            .key(format!("{CERTIFICATIONS_COLLECTION}:{}", certification.producer_id))
            .key(format!("{TIER_CHANGES_COLLECTION}:{}", certification.producer_id))
            .key(CERTIFICATION_OUTBOX_COLLECTION)
            .key(APPLIED_REVISIONS_COLLECTION)
            .arg(expected_version)
            .arg(serde_json::to_string(certification).map_err(encode_failed)?)
            .arg(change_json)
            .arg(outbox_id)
            .arg(outbox_json)
            .arg(applied.map(|(audit_id, _)| audit_id).unwrap_or_default())
            .arg(applied.map_or(0, |(_, revision)| revision))
            .invoke_async(&mut conn)
            .await
            .map_err(redis_unavailable)?;
        if committed == 0 {
            return Ok(CommitOutcome::Conflict);
        }
    }

    let mut inner = lock_store(state)?;
    let current_version = inner
        .certifications
        .get(&certification.producer_id)
        .map_or(0, |c| c.version);
    // Without Redis this lock section is the CAS.
    if !durable && current_version != expected_version {
        return Ok(CommitOutcome::Conflict);
    }
    if current_version < certification.version {
        inner
            .certifications
            .insert(certification.producer_id.clone(), certification.clone());
    }
    if let (Some(change), Some(envelope)) = (tier_change, envelope) {
        let trail = inner
            .tier_changes
            .entry(change.producer_id.clone())
            .or_default();
        if trail.last().is_none_or(|last| last.seq < change.seq) {
            trail.push(change.clone());
        }
        inner.outbox.enqueue(envelope, change.created_at);
    }
    if let Some((audit_id, revision)) = applied {
        let entry = inner
            .applied_revisions
            .entry(audit_id.to_string())
            .or_insert(revision);
        *entry = (*entry).max(revision);
    }
    Ok(CommitOutcome::Committed)
}

fn changed_envelope(change: &TierChange) -> Result<EventEnvelope, AppError> {
    change
        .changed_event()
        .envelope()
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

fn lock_store(state: &AppState) -> Result<MutexGuard<'_, CertificationStoreInner>, AppError> {
    state
        .store
        .inner
        .lock()
        .map_err(|_| AppError::internal("STORE_LOCK_ERROR", "certification store lock poisoned"))
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

fn encode_failed(e: serde_json::Error) -> AppError {
    AppError::internal("SERIALIZATION_ERROR", e.to_string())
}

fn decode_failed(e: serde_json::Error) -> AppError {
    AppError::internal("REDIS_DECODE_FAILED", e.to_string())
}
