use crate::config::db::RedisConfig;
use crate::config::environment::AppConfig;
use ledger_events::bus::{EventBus, InMemoryBus};
use ledger_events::redis_bus::RedisBus;
use redis::Client as RedisClient;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct InfraClients {
    pub redis: RedisClient,
}

pub const MOVEMENTS_COLLECTION: &str = "movements";
pub const MOVEMENT_IDEMPOTENCY_COLLECTION: &str = "movements:idempotency";
pub const MOVEMENT_OUTBOX_COLLECTION: &str = "movements:outbox";

pub async fn init_infra(config: &AppConfig) -> Result<Option<InfraClients>, String> {
    let Some(redis_config) = RedisConfig::from_app(config) else {
        return Ok(None);
    };

    let redis =
        RedisClient::open(redis_config.url).map_err(|e| format!("redis init failed: {e}"))?;
    Ok(Some(InfraClients { redis }))
}

/// Redis Streams when Redis is configured, otherwise a process-local bus.
pub fn build_bus(config: &AppConfig, infra: Option<&InfraClients>) -> Arc<dyn EventBus> {
    match (infra, RedisConfig::from_app(config)) {
        (Some(infra), Some(redis_config)) => Arc::new(RedisBus::new(
            infra.redis.clone(),
            redis_config.stream_prefix,
            redis_config.partitions,
        )),
        _ => Arc::new(InMemoryBus::new(config.bus_partitions)),
    }
}
