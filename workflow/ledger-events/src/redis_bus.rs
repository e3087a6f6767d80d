use crate::bus::{BusStats, DeadLetter, Delivery, DeliverySource, EventBus};
use crate::errors::BusError;
use crate::events::EventEnvelope;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamPendingReply, StreamReadReply};
use serde_json::Value;
use tracing::{debug, warn};

const ENVELOPE_FIELD: &str = "envelope";

const LEASE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
  return 1
end
if current == ARGV[1] then
  redis.call('EXPIRE', KEYS[1], ARGV[2])
  return 1
end
return 0
"#;

/// Redis Streams transport: one stream per (topic, partition), one consumer
/// group per component, one consumer per partition so a restarted worker
/// picks its own pending entries back up.
#[derive(Debug, Clone)]
pub struct RedisBus {
    client: redis::Client,
    prefix: String,
    partitions: u32,
}

impl RedisBus {
    pub fn new(client: redis::Client, prefix: impl Into<String>, partitions: u32) -> Self {
        Self {
            client,
            prefix: prefix.into(),
            partitions: partitions.max(1),
        }
    }

    fn stream_key(&self, topic: &str, partition: u32) -> String {
        format!("{}:{topic}:p{partition}", self.prefix)
    }

    fn dead_key(&self, topic: &str, group: &str) -> String {
        format!("{}:{topic}:{group}:dead", self.prefix)
    }

    fn replay_key(&self, topic: &str, group: &str, partition: u32) -> String {
        format!("{}:{topic}:{group}:replay:p{partition}", self.prefix)
    }

    fn replay_processing_key(&self, topic: &str, group: &str, partition: u32) -> String {
        format!("{}:processing", self.replay_key(topic, group, partition))
    }

    fn lease_key(&self, topic: &str, group: &str, partition: u32) -> String {
        format!("{}:{topic}:{group}:lease:p{partition}", self.prefix)
    }

    async fn conn(&self) -> Result<MultiplexedConnection, BusError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BusError::Unavailable(format!("redis connect failed: {e}")))
    }

    async fn read_group(
        &self,
        conn: &mut MultiplexedConnection,
        topic: &str,
        group: &str,
        partition: u32,
        from: &str,
    ) -> Result<Option<StreamId>, BusError> {
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(format!("{group}-p{partition}"))
            .arg("COUNT")
            .arg(1)
            .arg("STREAMS")
            .arg(self.stream_key(topic, partition))
            .arg(from)
            .query_async(conn)
            .await?;
        Ok(reply.and_then(|r| {
            r.keys
                .into_iter()
                .next()
                .and_then(|k| k.ids.into_iter().next())
        }))
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

/// Stream entries that do not decode are still delivered, wrapped so the
/// handler rejects them and the consumer dead-letters them.
fn envelope_from_entry(topic: &str, entry: &StreamId) -> EventEnvelope {
    let raw = entry.get::<String>(ENVELOPE_FIELD).unwrap_or_default();
    match serde_json::from_str::<EventEnvelope>(&raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(topic, entry_id = %entry.id, error = %e, "undecodable stream entry");
            EventEnvelope {
                event_id: entry.id.clone(),
                topic: topic.to_string(),
                partition_key: String::new(),
                occurred_at: 0,
                payload: Value::String(raw),
            }
        }
    }
}

#[async_trait]
impl EventBus for RedisBus {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<(), BusError> {
        let mut conn = self.conn().await?;
        for partition in 0..self.partitions {
            let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(self.stream_key(topic, partition))
                .arg(group)
                .arg("0")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;
            match created {
                Ok(()) => debug!(topic, group, partition, "consumer group created"),
                Err(e) if e.code() == Some("BUSYGROUP") => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), BusError> {
        let mut conn = self.conn().await?;
        let key = self.stream_key(&envelope.topic, envelope.partition(self.partitions));
        let payload = serde_json::to_string(envelope)?;
        let _: String = redis::cmd("XADD")
            .arg(key)
            .arg("*")
            .arg(ENVELOPE_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn pull(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> Result<Option<Delivery>, BusError> {
        self.check_partition(topic, partition)?;
        let mut conn = self.conn().await?;

        let processing_key = self.replay_processing_key(topic, group, partition);
        let stuck: Option<String> = conn.lindex(&processing_key, -1).await?;
        let replayed = match stuck {
            Some(raw) => Some(raw),
            None => {
                let popped: Option<String> = redis::cmd("RPOPLPUSH")
                    .arg(self.replay_key(topic, group, partition))
                    .arg(&processing_key)
                    .query_async(&mut conn)
                    .await?;
                popped
            }
        };
        if let Some(raw) = replayed {
            let envelope = serde_json::from_str::<EventEnvelope>(&raw)?;
            return Ok(Some(Delivery {
                envelope,
                partition,
                source: DeliverySource::Replay { raw },
            }));
        }

        let entry = match self.read_group(&mut conn, topic, group, partition, "0").await? {
            Some(entry) => Some(entry),
            None => self.read_group(&mut conn, topic, group, partition, ">").await?,
        };
        Ok(entry.map(|entry| Delivery {
            envelope: envelope_from_entry(topic, &entry),
            partition,
            source: DeliverySource::Stream { entry_id: entry.id },
        }))
    }

    async fn ack(&self, topic: &str, group: &str, delivery: &Delivery) -> Result<(), BusError> {
        let mut conn = self.conn().await?;
        match &delivery.source {
            DeliverySource::Stream { entry_id } => {
                let _: u64 = redis::cmd("XACK")
                    .arg(self.stream_key(topic, delivery.partition))
                    .arg(group)
                    .arg(entry_id)
                    .query_async(&mut conn)
                    .await?;
            }
            DeliverySource::Replay { raw } => {
                let _: i64 = conn
                    .lrem(
                        self.replay_processing_key(topic, group, delivery.partition),
                        1,
                        raw,
                    )
                    .await?;
            }
            DeliverySource::Memory => {}
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
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(&letter)?;
        let _: u64 = conn.lpush(self.dead_key(topic, group), payload).await?;
        self.ack(topic, group, delivery).await
    }

    async fn dead_letters(&self, topic: &str, group: &str) -> Result<Vec<DeadLetter>, BusError> {
        let mut conn = self.conn().await?;
        let raw: Vec<String> = conn.lrange(self.dead_key(topic, group), 0, -1).await?;
        raw.iter()
            .map(|s| serde_json::from_str::<DeadLetter>(s).map_err(BusError::from))
            .collect()
    }

    async fn requeue_dead_letter(
        &self,
        topic: &str,
        group: &str,
        event_id: &str,
    ) -> Result<bool, BusError> {
        let mut conn = self.conn().await?;
        let dead_key = self.dead_key(topic, group);
        let raw: Vec<String> = conn.lrange(&dead_key, 0, -1).await?;
        for item in raw {
            let Ok(letter) = serde_json::from_str::<DeadLetter>(&item) else {
                continue;
            };
            if letter.envelope.event_id != event_id {
                continue;
            }
            let removed: i64 = conn.lrem(&dead_key, 1, &item).await?;
            if removed == 0 {
                return Ok(false);
            }
            let partition = letter.envelope.partition(self.partitions);
            let payload = serde_json::to_string(&letter.envelope)?;
            let _: u64 = conn
                .lpush(self.replay_key(topic, group, partition), payload)
                .await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn stats(&self, topic: &str, group: &str) -> Result<BusStats, BusError> {
        let mut conn = self.conn().await?;
        let mut pending = 0u64;
        for partition in 0..self.partitions {
            let reply: StreamPendingReply = conn
                .xpending(self.stream_key(topic, partition), group)
                .await?;
            pending += reply.count() as u64;
            let replays: u64 = conn.llen(self.replay_key(topic, group, partition)).await?;
            pending += replays;
        }
        let dead_letters: u64 = conn.llen(self.dead_key(topic, group)).await?;
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
        let mut conn = self.conn().await?;
        let granted: i64 = redis::Script::new(LEASE_SCRIPT)
            .key(self.lease_key(topic, group, partition))
            .arg(holder)
            .arg(ttl_seconds.max(1))
            .invoke_async(&mut conn)
            .await?;
        Ok(granted == 1)
    }
}
