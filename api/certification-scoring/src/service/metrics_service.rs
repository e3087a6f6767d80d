use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

static EVENTS_APPLIED: AtomicU64 = AtomicU64::new(0);
static DUPLICATE_EVENTS: AtomicU64 = AtomicU64::new(0);
static STALE_REVISIONS: AtomicU64 = AtomicU64::new(0);
static RECALCULATIONS: AtomicU64 = AtomicU64::new(0);
static TIER_CHANGES: AtomicU64 = AtomicU64::new(0);
static CAS_CONFLICTS: AtomicU64 = AtomicU64::new(0);
static SCORING_FAILURES: AtomicU64 = AtomicU64::new(0);
static EVENTS_PUBLISHED: AtomicU64 = AtomicU64::new(0);
static PUBLISH_FAILURES: AtomicU64 = AtomicU64::new(0);

static LAST_ERROR_TS: AtomicI64 = AtomicI64::new(0);

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub events_applied: u64,
    pub duplicate_events: u64,
    pub stale_revisions: u64,
    pub recalculations: u64,
    pub tier_changes: u64,
    pub cas_conflicts: u64,
    pub scoring_failures: u64,
    pub events_published: u64,
    pub publish_failures: u64,
    pub last_error_ts: i64,
}

pub fn inc_events_applied() {
    EVENTS_APPLIED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_duplicate_events() {
    DUPLICATE_EVENTS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_stale_revisions() {
    STALE_REVISIONS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_recalculations() {
    RECALCULATIONS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_tier_changes() {
    TIER_CHANGES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_cas_conflicts() {
    CAS_CONFLICTS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_scoring_failures() {
    SCORING_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn add_events_published(count: u64) {
    EVENTS_PUBLISHED.fetch_add(count, Ordering::Relaxed);
}

pub fn add_publish_failures(count: u64) {
    PUBLISH_FAILURES.fetch_add(count, Ordering::Relaxed);
}

pub fn set_last_error_ts(ts: i64) {
    LAST_ERROR_TS.store(ts, Ordering::Relaxed);
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        events_applied: EVENTS_APPLIED.load(Ordering::Relaxed),
        duplicate_events: DUPLICATE_EVENTS.load(Ordering::Relaxed),
        stale_revisions: STALE_REVISIONS.load(Ordering::Relaxed),
        recalculations: RECALCULATIONS.load(Ordering::Relaxed),
        tier_changes: TIER_CHANGES.load(Ordering::Relaxed),
        cas_conflicts: CAS_CONFLICTS.load(Ordering::Relaxed),
        scoring_failures: SCORING_FAILURES.load(Ordering::Relaxed),
        events_published: EVENTS_PUBLISHED.load(Ordering::Relaxed),
        publish_failures: PUBLISH_FAILURES.load(Ordering::Relaxed),
        last_error_ts: LAST_ERROR_TS.load(Ordering::Relaxed),
    }
}
