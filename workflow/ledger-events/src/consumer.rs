use crate::bus::{DeadLetter, EventBus};
use crate::errors::{BusError, HandlerError};
use crate::events::EventEnvelope;
use crate::now_millis;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub topic: String,
    pub group: String,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub poll_interval_ms: u64,
    pub lease_seconds: u64,
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Idle,
    Acked {
        event_id: String,
        attempts: u32,
    },
    DeadLettered {
        event_id: String,
        attempts: u32,
        error_code: String,
    },
    /// The partition lease went to another holder between attempts. The
    /// delivery stays unacknowledged and is redelivered to the new holder.
    LeaseLost {
        event_id: String,
        attempts: u32,
    },
}

pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let shift = attempt.saturating_sub(1).min(20);
    let delay = base_ms.saturating_mul(1u64 << shift);
    Duration::from_millis(delay.min(max_ms.max(base_ms)))
}

/// Pulls one delivery from `partition` and runs it to a terminal outcome.
///
/// Retries happen in place, so later events on the same partition wait behind
/// a failing one. The wait is bounded by `max_attempts`, after which the event
/// is dead-lettered and the partition moves on.
pub async fn process_next(
    bus: &dyn EventBus,
    handler: &dyn EventHandler,
    settings: &ConsumerSettings,
    partition: u32,
) -> Result<DeliveryOutcome, BusError> {
    deliver(bus, handler, settings, partition, None).await
}

/// [`process_next`] for a caller holding the partition lease as `holder`.
///
/// The lease is renewed before every retry wait and each wait is capped at
/// half the lease TTL. If renewal fails the attempt loop stops without acking.
pub async fn process_next_leased(
    bus: &dyn EventBus,
    handler: &dyn EventHandler,
    settings: &ConsumerSettings,
    partition: u32,
    holder: &str,
) -> Result<DeliveryOutcome, BusError> {
    deliver(bus, handler, settings, partition, Some(holder)).await
}

fn lease_window(settings: &ConsumerSettings) -> Duration {
    Duration::from_millis(settings.lease_seconds.max(1).saturating_mul(500))
}

async fn deliver(
    bus: &dyn EventBus,
    handler: &dyn EventHandler,
    settings: &ConsumerSettings,
    partition: u32,
    holder: Option<&str>,
) -> Result<DeliveryOutcome, BusError> {
    let Some(delivery) = bus
        .pull(&settings.topic, &settings.group, partition)
        .await?
    else {
        return Ok(DeliveryOutcome::Idle);
    };
    let event_id = delivery.envelope.event_id.clone();
    let max_attempts = settings.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match handler.handle(&delivery.envelope).await {
            Ok(()) => {
                bus.ack(&settings.topic, &settings.group, &delivery).await?;
                return Ok(DeliveryOutcome::Acked {
                    event_id,
                    attempts: attempt,
                });
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let mut delay =
                    backoff_delay(attempt, settings.backoff_base_ms, settings.backoff_max_ms);
                if let Some(holder) = holder {
                    delay = delay.min(lease_window(settings));
                    let renewed = bus
                        .try_lease(
                            &settings.topic,
                            &settings.group,
                            partition,
                            holder,
                            settings.lease_seconds,
                        )
                        .await?;
                    if !renewed {
                        warn!(
                            topic = %settings.topic,
                            group = %settings.group,
                            partition,
                            event_id = %event_id,
                            attempt,
                            "partition lease lost during retry; leaving event unacked"
                        );
                        return Ok(DeliveryOutcome::LeaseLost {
                            event_id,
                            attempts: attempt,
                        });
                    }
                }
                warn!(
                    topic = %settings.topic,
                    group = %settings.group,
                    partition,
                    event_id = %event_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error_code = err.code(),
                    error = %err,
                    "event handling failed; retrying"
                );
                sleep(delay).await;
            }
            Err(err) => {
                error!(
                    topic = %settings.topic,
                    group = %settings.group,
                    partition,
                    event_id = %event_id,
                    attempts = attempt,
                    error_code = err.code(),
                    error = %err,
                    "event dead-lettered"
                );
                let letter = DeadLetter {
                    envelope: delivery.envelope.clone(),
                    group: settings.group.clone(),
                    attempts: attempt,
                    error_code: err.code().to_string(),
                    reason: err.to_string(),
                    dead_lettered_at: now_millis(),
                };
                bus.dead_letter(&settings.topic, &settings.group, &delivery, letter)
                    .await?;
                return Ok(DeliveryOutcome::DeadLettered {
                    event_id,
                    attempts: attempt,
                    error_code: err.code().to_string(),
                });
            }
        }
    }
}

/// Processes every partition until none has work left. Returns the number of
/// deliveries that reached a terminal outcome.
pub async fn drain(
    bus: &dyn EventBus,
    handler: &dyn EventHandler,
    settings: &ConsumerSettings,
) -> Result<usize, BusError> {
    let mut handled = 0usize;
    loop {
        let mut progressed = false;
        for partition in 0..bus.partitions() {
            match process_next(bus, handler, settings, partition).await? {
                DeliveryOutcome::Idle => {}
                _ => {
                    handled += 1;
                    progressed = true;
                }
            }
        }
        if !progressed {
            return Ok(handled);
        }
    }
}

/// One long-lived task per partition; each task only works while it holds
/// the partition lease.
pub fn spawn_consumers(
    bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    settings: ConsumerSettings,
    holder: String,
) -> Vec<JoinHandle<()>> {
    (0..bus.partitions())
        .map(|partition| {
            let bus = bus.clone();
            let handler = handler.clone();
            let settings = settings.clone();
            let holder = holder.clone();
            tokio::spawn(async move {
                run_partition(bus, handler, settings, partition, holder).await;
            })
        })
        .collect()
}

async fn run_partition(
    bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    settings: ConsumerSettings,
    partition: u32,
    holder: String,
) {
    info!(topic = %settings.topic, group = %settings.group, partition, "partition consumer started");
    let idle = Duration::from_millis(settings.poll_interval_ms.max(10));
    loop {
        match bus
            .try_lease(
                &settings.topic,
                &settings.group,
                partition,
                &holder,
                settings.lease_seconds,
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                sleep(idle).await;
                continue;
            }
            Err(e) => {
                warn!(topic = %settings.topic, partition, error = %e, "partition lease failed");
                sleep(idle).await;
                continue;
            }
        }

        match process_next_leased(
            bus.as_ref(),
            handler.as_ref(),
            &settings,
            partition,
            &holder,
        )
        .await
        {
            Ok(DeliveryOutcome::Idle) | Ok(DeliveryOutcome::LeaseLost { .. }) => sleep(idle).await,
            Ok(_) => {}
            Err(e) => {
                warn!(topic = %settings.topic, partition, error = %e, "bus unavailable");
                sleep(idle).await;
            }
        }
    }
}
