use crate::errors::BusError;
use crate::events::EventEnvelope;
use crate::now_millis;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliverySource {
    /// Entry read from a partition stream, acknowledged by id.
    Stream { entry_id: String },
    /// Dead letter re-queued by an operator; `raw` is the exact stored payload.
    Replay { raw: String },
    Memory,
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: EventEnvelope,
    pub partition: u32,
    pub source: DeliverySource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetter {
    pub envelope: EventEnvelope,
    pub group: String,
    pub attempts: u32,
    pub error_code: String,
    pub reason: String,
    pub dead_lettered_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusStats {
    pub pending: u64,
    pub dead_letters: u64,
}

/// Durable, partitioned, at-least-once event transport.
///
/// Events sharing a partition key land on the same partition and are handed
/// to a consumer group in publish order. A delivery stays pending for its
/// group until it is acknowledged or dead-lettered; pulling again before that
/// returns the same delivery.
#[async_trait]
pub trait EventBus: Send + Sync {
    fn partitions(&self) -> u32;

    async fn subscribe(&self, topic: &str, group: &str) -> Result<(), BusError>;

    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), BusError>;

    async fn pull(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> Result<Option<Delivery>, BusError>;

    async fn ack(&self, topic: &str, group: &str, delivery: &Delivery) -> Result<(), BusError>;

    async fn dead_letter(
        &self,
        topic: &str,
        group: &str,
        delivery: &Delivery,
        letter: DeadLetter,
    ) -> Result<(), BusError>;

    async fn dead_letters(&self, topic: &str, group: &str) -> Result<Vec<DeadLetter>, BusError>;

    /// Moves a dead letter back in front of its partition for this group only.
    async fn requeue_dead_letter(
        &self,
        topic: &str,
        group: &str,
        event_id: &str,
    ) -> Result<bool, BusError>;

    async fn stats(&self, topic: &str, group: &str) -> Result<BusStats, BusError>;

    /// Exclusive ownership of a partition for a consumer group. Asking again as
    /// the current holder renews the TTL. The default grants every request.
    async fn try_lease(
        &self,
        _topic: &str,
        _group: &str,
        _partition: u32,
        _holder: &str,
        _ttl_seconds: u64,
    ) -> Result<bool, BusError> {
        Ok(true)
    }
}

type GroupPartition = (String, String, u32);

#[derive(Debug, Default)]
struct InMemoryBusInner {
    logs: HashMap<(String, u32), Vec<EventEnvelope>>,
    cursors: HashMap<GroupPartition, usize>,
    in_flight: HashMap<GroupPartition, Delivery>,
    replays: HashMap<GroupPartition, VecDeque<EventEnvelope>>,
    dead: HashMap<(String, String), Vec<DeadLetter>>,
    leases: HashMap<GroupPartition, (String, i64)>,
    history: Vec<EventEnvelope>,
    publish_failures: u32,
}

/// Process-local bus with the same delivery contract as the Redis one.
#[derive(Debug)]
pub struct InMemoryBus {
    partitions: u32,
    inner: Mutex<InMemoryBusInner>,
}

impl InMemoryBus {
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            inner: Mutex::new(InMemoryBusInner::default()),
        }
    }

    /// Every envelope accepted on `topic`, in publish order.
    pub fn published(&self, topic: &str) -> Vec<EventEnvelope> {
        match self.inner.lock() {
            Ok(inner) => inner
                .history
                .iter()
                .filter(|e| e.topic == topic)
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Makes the next `count` publishes fail as if the broker were down.
    pub fn inject_publish_failures(&self, count: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.publish_failures = count;
        }
    }

    /// Drops every partition lease as if its TTL had elapsed.
    pub fn expire_leases(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.leases.clear();
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, InMemoryBusInner>, BusError> {
        self.inner
            .lock()
            .map_err(|_| BusError::Unavailable("in-memory bus lock poisoned".to_string()))
    }

    fn check_partition(&self, topic: &str, partition: u32) -> Result<(), BusError> {
        if partition >= self.partitions {
            return Err(BusError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            });
        }
        Ok(())
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<(), BusError> {
        let mut inner = self.lock()?;
        for partition in 0..self.partitions {
            inner
                .cursors
                .entry((topic.to_string(), group.to_string(), partition))
                .or_insert(0);
        }
        Ok(())
    }

    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), BusError> {
        let mut inner = self.lock()?;
        if inner.publish_failures > 0 {
            inner.publish_failures -= 1;
            return Err(BusError::Unavailable("injected publish failure".to_string()));
        }
        let partition = envelope.partition(self.partitions);
        inner
            .logs
            .entry((envelope.topic.clone(), partition))
            .or_default()
            .push(envelope.clone());
        inner.history.push(envelope.clone());
        Ok(())
    }

    async fn pull(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> Result<Option<Delivery>, BusError> {
        self.check_partition(topic, partition)?;
        let mut inner = self.lock()?;
        let key = (topic.to_string(), group.to_string(), partition);
        if let Some(delivery) = inner.in_flight.get(&key) {
            return Ok(Some(delivery.clone()));
        }

        let replayed = inner.replays.get_mut(&key).and_then(VecDeque::pop_front);
        let envelope = match replayed {
            Some(envelope) => Some(envelope),
            None => {
                let cursor = inner.cursors.get(&key).copied().unwrap_or(0);
                let next = inner
                    .logs
                    .get(&(topic.to_string(), partition))
                    .and_then(|log| log.get(cursor))
                    .cloned();
                if next.is_some() {
                    inner.cursors.insert(key.clone(), cursor + 1);
                }
                next
            }
        };

        Ok(envelope.map(|envelope| {
            let delivery = Delivery {
                envelope,
                partition,
                source: DeliverySource::Memory,
            };
            inner.in_flight.insert(key, delivery.clone());
            delivery
        }))
    }

    async fn ack(&self, topic: &str, group: &str, delivery: &Delivery) -> Result<(), BusError> {
        let mut inner = self.lock()?;
        let key = (topic.to_string(), group.to_string(), delivery.partition);
        let matches = inner
            .in_flight
            .get(&key)
            .is_some_and(|d| d.envelope.event_id == delivery.envelope.event_id);
        if matches {
            inner.in_flight.remove(&key);
        }
        Ok(())
    }

    async fn dead_letter(
        &self,
        topic: &str,
        group: &str,
        delivery: &Delivery,
        letter: DeadLetter,
    ) -> Result<(), BusError> {
        let mut inner = self.lock()?;
        inner
            .dead
            .entry((topic.to_string(), group.to_string()))
            .or_default()
            .push(letter);
        inner
            .in_flight
            .remove(&(topic.to_string(), group.to_string(), delivery.partition));
        Ok(())
    }

    async fn dead_letters(&self, topic: &str, group: &str) -> Result<Vec<DeadLetter>, BusError> {
        let inner = self.lock()?;
        Ok(inner
            .dead
            .get(&(topic.to_string(), group.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn requeue_dead_letter(
        &self,
        topic: &str,
        group: &str,
        event_id: &str,
    ) -> Result<bool, BusError> {
        let mut inner = self.lock()?;
        let Some(letters) = inner.dead.get_mut(&(topic.to_string(), group.to_string())) else {
            return Ok(false);
        };
        let Some(pos) = letters.iter().position(|l| l.envelope.event_id == event_id) else {
            return Ok(false);
        };
        let letter = letters.remove(pos);
        let partition = letter.envelope.partition(self.partitions);
        inner
            .replays
            .entry((topic.to_string(), group.to_string(), partition))
            .or_default()
            .push_back(letter.envelope);
        Ok(true)
    }

    async fn stats(&self, topic: &str, group: &str) -> Result<BusStats, BusError> {
        let inner = self.lock()?;
        let mut pending = 0u64;
        for partition in 0..self.partitions {
            let key = (topic.to_string(), group.to_string(), partition);
            let log_len = inner
                .logs
                .get(&(topic.to_string(), partition))
                .map(Vec::len)
                .unwrap_or(0);
            let cursor = inner.cursors.get(&key).copied().unwrap_or(0);
            pending += log_len.saturating_sub(cursor) as u64;
            pending += inner.replays.get(&key).map(VecDeque::len).unwrap_or(0) as u64;
            if inner.in_flight.contains_key(&key) {
                pending += 1;
            }
        }
        let dead_letters = inner
            .dead
            .get(&(topic.to_string(), group.to_string()))
            .map(Vec::len)
            .unwrap_or(0) as u64;
        Ok(BusStats {
            pending,
            dead_letters,
        })
    }

    async fn try_lease(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
        holder: &str,
        ttl_seconds: u64,
    ) -> Result<bool, BusError> {
        self.check_partition(topic, partition)?;
        let mut inner = self.lock()?;
        let now = now_millis();
        let key = (topic.to_string(), group.to_string(), partition);
        let taken = inner
            .leases
            .get(&key)
            .is_some_and(|(owner, expires_at)| owner != holder && *expires_at > now);
        if taken {
            return Ok(false);
        }
        let ttl_ms = i64::try_from(ttl_seconds.max(1).saturating_mul(1_000)).unwrap_or(i64::MAX);
        inner
            .leases
            .insert(key, (holder.to_string(), now.saturating_add(ttl_ms)));
        Ok(true)
    }
}
