use ledger_events::models::AuditResult;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

static AUDITS_RECORDED: AtomicU64 = AtomicU64::new(0);
static DUPLICATE_DELIVERIES: AtomicU64 = AtomicU64::new(0);
static APPROVED: AtomicU64 = AtomicU64::new(0);
static REJECTED: AtomicU64 = AtomicU64::new(0);
static NEEDS_REVIEW: AtomicU64 = AtomicU64::new(0);
static REVISIONS_APPLIED: AtomicU64 = AtomicU64::new(0);
static EVALUATION_FAILURES: AtomicU64 = AtomicU64::new(0);
static EVENTS_PUBLISHED: AtomicU64 = AtomicU64::new(0);
static PUBLISH_FAILURES: AtomicU64 = AtomicU64::new(0);

static LAST_ERROR_TS: AtomicI64 = AtomicI64::new(0);

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub audits_recorded: u64,
    pub duplicate_deliveries: u64,
    pub approved: u64,
    pub rejected: u64,
    pub needs_review: u64,
    pub revisions_applied: u64,
    pub evaluation_failures: u64,
    pub events_published: u64,
    pub publish_failures: u64,
    pub last_error_ts: i64,
}

pub fn record_audit(result: AuditResult) {
    AUDITS_RECORDED.fetch_add(1, Ordering::Relaxed);
    let counter = match result {
        AuditResult::Approved => &APPROVED,
        AuditResult::Rejected => &REJECTED,
        AuditResult::NeedsReview => &NEEDS_REVIEW,
    };
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_duplicate_deliveries() {
    DUPLICATE_DELIVERIES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_revisions_applied() {
    REVISIONS_APPLIED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_evaluation_failures() {
    EVALUATION_FAILURES.fetch_add(1, Ordering::Relaxed);
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
        audits_recorded: AUDITS_RECORDED.load(Ordering::Relaxed),
        duplicate_deliveries: DUPLICATE_DELIVERIES.load(Ordering::Relaxed),
        approved: APPROVED.load(Ordering::Relaxed),
        rejected: REJECTED.load(Ordering::Relaxed),
        needs_review: NEEDS_REVIEW.load(Ordering::Relaxed),
        revisions_applied: REVISIONS_APPLIED.load(Ordering::Relaxed),
        evaluation_failures: EVALUATION_FAILURES.load(Ordering::Relaxed),
        events_published: EVENTS_PUBLISHED.load(Ordering::Relaxed),
        publish_failures: PUBLISH_FAILURES.load(Ordering::Relaxed),
        last_error_ts: LAST_ERROR_TS.load(Ordering::Relaxed),
    }
}
