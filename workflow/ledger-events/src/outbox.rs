use crate::bus::EventBus;
use crate::consumer::backoff_delay;
use crate::errors::BusError;
use crate::events::EventEnvelope;
use crate::now_millis;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboxEntry {
    pub seq: u64,
    pub envelope: EventEnvelope,
    pub attempts: u32,
    pub next_attempt_at: i64,
    pub last_error: Option<String>,
    pub created_at: i64,
}

/// Events committed together with a domain write and not yet accepted by
/// the bus. The owning store mutates it under the same lock as its records.
#[derive(Debug, Default)]
pub struct OutboxQueue {
    entries: BTreeMap<u64, OutboxEntry>,
    next_seq: u64,
}

impl OutboxQueue {
    pub fn enqueue(&mut self, envelope: EventEnvelope, now: i64) -> OutboxEntry {
        self.next_seq += 1;
        let entry = OutboxEntry {
            seq: self.next_seq,
            envelope,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            created_at: now,
        };
        self.entries.insert(entry.seq, entry.clone());
        entry
    }

    /// Re-inserts an entry read back from durable storage. Entries are
    /// renumbered after the current tail so restore order is publish order.
    pub fn restore(&mut self, mut entry: OutboxEntry) {
        if self
            .entries
            .values()
            .any(|e| e.envelope.event_id == entry.envelope.event_id)
        {
            return;
        }
        self.next_seq += 1;
        entry.seq = self.next_seq;
        self.entries.insert(entry.seq, entry);
    }

    /// Entries ready to publish, oldest first. An entry that is still backing
    /// off holds back every later entry with the same partition key.
    pub fn due(&self, now: i64, limit: usize) -> Vec<OutboxEntry> {
        let mut blocked: HashSet<&str> = HashSet::new();
        let mut ready = Vec::new();
        for entry in self.entries.values() {
            let key = entry.envelope.partition_key.as_str();
            if blocked.contains(key) {
                continue;
            }
            if entry.next_attempt_at > now {
                blocked.insert(key);
                continue;
            }
            ready.push(entry.clone());
            if ready.len() >= limit {
                break;
            }
        }
        ready
    }

    pub fn mark_published(&mut self, seq: u64) -> Option<OutboxEntry> {
        self.entries.remove(&seq)
    }

    pub fn mark_failed(
        &mut self,
        seq: u64,
        error: &str,
        now: i64,
        backoff_base_ms: u64,
        backoff_max_ms: u64,
    ) -> Option<OutboxEntry> {
        let entry = self.entries.get_mut(&seq)?;
        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        let delay = backoff_delay(entry.attempts, backoff_base_ms, backoff_max_ms);
        entry.next_attempt_at = now + delay.as_millis() as i64;
        Some(entry.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn oldest_created_at(&self) -> Option<i64> {
        self.entries.values().map(|e| e.created_at).min()
    }
}

/// Storage side of an outbox, implemented by each service over its own store.
#[async_trait]
pub trait OutboxSource: Send + Sync {
    async fn due_entries(&self, now: i64, limit: usize) -> Result<Vec<OutboxEntry>, BusError>;

    async fn mark_published(&self, entry: &OutboxEntry) -> Result<(), BusError>;

    async fn mark_failed(&self, entry: &OutboxEntry, error: &str) -> Result<(), BusError>;
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub batch_size: usize,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub published: usize,
    pub failed: usize,
}

/// Publishes every due entry once. A failed entry blocks the rest of its
/// partition key for this pass so per-producer order survives retries.
pub async fn relay_once(
    source: &dyn OutboxSource,
    bus: &dyn EventBus,
    settings: &RelaySettings,
) -> Result<RelayReport, BusError> {
    let entries = source
        .due_entries(now_millis(), settings.batch_size.max(1))
        .await?;
    let mut report = RelayReport::default();
    let mut blocked: HashSet<String> = HashSet::new();

    for entry in entries {
        if blocked.contains(&entry.envelope.partition_key) {
            continue;
        }
        match bus.publish(&entry.envelope).await {
            Ok(()) => {
                source.mark_published(&entry).await?;
                debug!(event_id = %entry.envelope.event_id, topic = %entry.envelope.topic, "outbox entry published");
                report.published += 1;
            }
            Err(e) => {
                warn!(
                    event_id = %entry.envelope.event_id,
                    topic = %entry.envelope.topic,
                    attempts = entry.attempts + 1,
                    error = %e,
                    "outbox publish failed"
                );
                source.mark_failed(&entry, &e.to_string()).await?;
                blocked.insert(entry.envelope.partition_key.clone());
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

pub async fn run_relay(
    source: Arc<dyn OutboxSource>,
    bus: Arc<dyn EventBus>,
    settings: RelaySettings,
) {
    let interval = Duration::from_millis(settings.interval_ms.max(10));
    loop {
        if let Err(e) = relay_once(source.as_ref(), bus.as_ref(), &settings).await {
            warn!(error = %e, "outbox relay pass failed");
        }
        sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(id: &str, key: &str) -> EventEnvelope {
        EventEnvelope {
            event_id: id.to_string(),
            topic: "t".to_string(),
            partition_key: key.to_string(),
            occurred_at: 0,
            payload: json!({}),
        }
    }

    #[test]
    fn due_returns_entries_in_commit_order() {
        let mut queue = OutboxQueue::default();
        queue.enqueue(envelope("a", "p1"), 10);
        queue.enqueue(envelope("b", "p2"), 11);
        queue.enqueue(envelope("c", "p1"), 12);
        let ids = queue
            .due(100, 10)
            .into_iter()
            .map(|e| e.envelope.event_id)
            .collect::<Vec<_>>();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn backing_off_entry_holds_back_same_key_only() {
        let mut queue = OutboxQueue::default();
        let first = queue.enqueue(envelope("a", "p1"), 10);
        queue.enqueue(envelope("b", "p2"), 11);
        queue.enqueue(envelope("c", "p1"), 12);
        queue.mark_failed(first.seq, "bus down", 20, 1_000, 10_000);

        let ids = queue
            .due(100, 10)
            .into_iter()
            .map(|e| e.envelope.event_id)
            .collect::<Vec<_>>();
        assert_eq!(ids, ["b"]);

        let ids = queue
            .due(2_000, 10)
            .into_iter()
            .map(|e| e.envelope.event_id)
            .collect::<Vec<_>>();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn restore_skips_known_events() {
        let mut queue = OutboxQueue::default();
        let entry = queue.enqueue(envelope("a", "p1"), 10);
        queue.restore(entry.clone());
        assert_eq!(queue.len(), 1);
        queue.mark_published(entry.seq);
        assert!(queue.is_empty());
        queue.restore(entry);
        assert_eq!(queue.len(), 1);
    }
}
