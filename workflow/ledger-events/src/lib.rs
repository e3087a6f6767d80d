pub mod bus;
pub mod canonical;
pub mod consumer;
pub mod errors;
pub mod events;
pub mod models;
pub mod outbox;
pub mod redis_bus;

/// Wall-clock milliseconds, the timestamp unit carried on every event.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
