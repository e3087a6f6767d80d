use ledger_events::models::MovementType;
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rust_env: String,
    pub api_host: String,
    pub api_port: u16,
    pub redis_url: Option<String>,
    pub bus_stream_prefix: String,
    pub bus_partitions: u32,
    pub idempotency_ttl_seconds: i64,
    pub idempotency_gc_interval_seconds: i64,
    pub worker_enabled: bool,
    pub worker_backoff_base_ms: u64,
    pub worker_backoff_max_ms: u64,
    pub outbox_relay_interval_ms: u64,
    pub outbox_batch_size: usize,
    pub attachment_verify_enabled: bool,
    pub attachment_max_count: usize,
    pub attachment_allowed_types: Vec<String>,
    pub movement_types: Vec<MovementType>,
    pub downstream_timeout_ms: u64,
    pub internal_auth_enabled: bool,
    pub internal_auth_secret: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        load_dotenv_layers();
        Ok(Self {
            rust_env: read_var("RUST_ENV")?,
            api_host: read_var("API_HOST")?,
            api_port: read_var("API_PORT")?
                .parse::<u16>()
                .map_err(|e| format!("invalid API_PORT: {e}"))?,
            redis_url: env::var("REDIS_URL").ok(),
            bus_stream_prefix: read_optional_string("BUS_STREAM_PREFIX", "ecoledger"),
            bus_partitions: read_optional_u32("BUS_PARTITIONS", 8)?,
            idempotency_ttl_seconds: read_optional_i64("IDEMPOTENCY_TTL_SECONDS", 86_400)?,
            idempotency_gc_interval_seconds: read_optional_i64(
                "IDEMPOTENCY_GC_INTERVAL_SECONDS",
                300,
            )?,
            worker_enabled: read_optional_bool("WORKER_ENABLED", true),
            worker_backoff_base_ms: read_optional_u64("WORKER_BACKOFF_BASE_MS", 200)?,
            worker_backoff_max_ms: read_optional_u64("WORKER_BACKOFF_MAX_MS", 30_000)?,
            outbox_relay_interval_ms: read_optional_u64("OUTBOX_RELAY_INTERVAL_MS", 500)?,
            outbox_batch_size: read_optional_usize("OUTBOX_BATCH_SIZE", 100)?,
            attachment_verify_enabled: read_optional_bool("ATTACHMENT_VERIFY_ENABLED", true),
            attachment_max_count: read_optional_usize("ATTACHMENT_MAX_COUNT", 10)?,
            attachment_allowed_types: read_optional_list("ATTACHMENT_ALLOWED_TYPES"),
            movement_types: read_movement_types()?,
            downstream_timeout_ms: read_optional_u64("DOWNSTREAM_TIMEOUT_MS", 5_000)?,
            internal_auth_enabled: read_optional_bool("INTERNAL_AUTH_ENABLED", false),
            internal_auth_secret: env::var("INTERNAL_AUTH_SECRET").ok(),
        })
    }
}

fn read_movement_types() -> Result<Vec<MovementType>, String> {
    read_optional_list("MOVEMENT_TYPES")
        .iter()
        .map(|raw| {
            MovementType::parse(raw).ok_or_else(|| format!("invalid MOVEMENT_TYPES entry: {raw}"))
        })
        .collect()
}

fn read_var(key: &str) -> Result<String, String> {
    env::var(key).map_err(|_| format!("missing required env var: {key}"))
}

fn read_optional_i64(key: &str, default: i64) -> Result<i64, String> {
    match env::var(key) {
        Ok(v) => v.parse::<i64>().map_err(|e| format!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn read_optional_u64(key: &str, default: u64) -> Result<u64, String> {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map_err(|e| format!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn read_optional_u32(key: &str, default: u32) -> Result<u32, String> {
    narrow(key, read_optional_u64(key, default.into())?)
}

fn read_optional_usize(key: &str, default: usize) -> Result<usize, String> {
    narrow(key, read_optional_u64(key, default as u64)?)
}

fn narrow<T: TryFrom<u64>>(key: &str, value: u64) -> Result<T, String> {
    T::try_from(value).map_err(|_| format!("invalid {key}: {value} is out of range"))
}

fn read_optional_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => default,
    }
}

fn read_optional_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn read_optional_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn load_dotenv_layers() {
    for path in [".env", "../.env", "../../.env"] {
        let _ = dotenvy::from_path_override(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_values_are_rejected_not_truncated() {
        assert_eq!(narrow::<u32>("BUS_PARTITIONS", 7), Ok(7));
        let err = narrow::<u32>("BUS_PARTITIONS", u64::from(u32::MAX) + 1).unwrap_err();
        assert!(err.contains("BUS_PARTITIONS"));
    }
}
