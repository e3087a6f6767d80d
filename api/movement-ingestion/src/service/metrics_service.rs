use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

static MOVEMENTS_RECORDED: AtomicU64 = AtomicU64::new(0);
static IDEMPOTENT_REPLAYS: AtomicU64 = AtomicU64::new(0);
static IDEMPOTENCY_CONFLICTS: AtomicU64 = AtomicU64::new(0);
static VALIDATION_REJECTIONS: AtomicU64 = AtomicU64::new(0);
static EVENTS_PUBLISHED: AtomicU64 = AtomicU64::new(0);
static PUBLISH_FAILURES: AtomicU64 = AtomicU64::new(0);
static IDEMPOTENCY_PURGED: AtomicU64 = AtomicU64::new(0);

static LAST_ERROR_TS: AtomicI64 = AtomicI64::new(0);

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub movements_recorded: u64,
    pub idempotent_replays: u64,
    pub idempotency_conflicts: u64,
    pub validation_rejections: u64,
    pub events_published: u64,
    pub publish_failures: u64,
    pub idempotency_records_purged: u64,
    pub last_error_ts: i64,
}

pub fn inc_movements_recorded() {
    MOVEMENTS_RECORDED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_idempotent_replays() {
    IDEMPOTENT_REPLAYS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_idempotency_conflicts() {
    IDEMPOTENCY_CONFLICTS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_validation_rejections() {
    VALIDATION_REJECTIONS.fetch_add(1, Ordering::Relaxed);
}

pub fn add_events_published(count: u64) {
    EVENTS_PUBLISHED.fetch_add(count, Ordering::Relaxed);
}

pub fn add_publish_failures(count: u64) {
    PUBLISH_FAILURES.fetch_add(count, Ordering::Relaxed);
}

pub fn add_idempotency_purged(count: u64) {
    IDEMPOTENCY_PURGED.fetch_add(count, Ordering::Relaxed);
}

pub fn set_last_error_ts(ts: i64) {
    LAST_ERROR_TS.store(ts, Ordering::Relaxed);
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        movements_recorded: MOVEMENTS_RECORDED.load(Ordering::Relaxed),
        idempotent_replays: IDEMPOTENT_REPLAYS.load(Ordering::Relaxed),
        idempotency_conflicts: IDEMPOTENCY_CONFLICTS.load(Ordering::Relaxed),
        validation_rejections: VALIDATION_REJECTIONS.load(Ordering::Relaxed),
        events_published: EVENTS_PUBLISHED.load(Ordering::Relaxed),
        publish_failures: PUBLISH_FAILURES.load(Ordering::Relaxed),
        idempotency_records_purged: IDEMPOTENCY_PURGED.load(Ordering::Relaxed),
        last_error_ts: LAST_ERROR_TS.load(Ordering::Relaxed),
    }
}
