use crate::config::environment::AppConfig;

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub stream_prefix: String,
    pub partitions: u32,
}

impl RedisConfig {
    pub fn from_app(app: &AppConfig) -> Option<Self> {
        app.redis_url.as_ref().map(|url| Self {
            url: url.clone(),
            stream_prefix: app.bus_stream_prefix.clone(),
            partitions: app.bus_partitions,
        })
    }
}
