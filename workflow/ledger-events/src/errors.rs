use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("event bus unavailable: {0}")]
    Unavailable(String),

    #[error("event codec failure: {0}")]
    Codec(String),

    #[error("unknown partition {partition} for topic {topic}")]
    UnknownPartition { topic: String, partition: u32 },
}

impl From<redis::RedisError> for BusError {
    fn from(value: redis::RedisError) -> Self {
        Self::Unavailable(value.to_string())
    }
}

impl From<serde_json::Error> for BusError {
    fn from(value: serde_json::Error) -> Self {
        Self::Codec(value.to_string())
    }
}

/// Outcome classification for a failed event handler.
///
/// Transient failures are retried in place with backoff; permanent ones go
/// straight to the dead-letter path.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("{code}: {message}")]
    Transient { code: String, message: String },

    #[error("{code}: {message}")]
    Permanent { code: String, message: String },
}

impl HandlerError {
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Transient { code, .. } | Self::Permanent { code, .. } => code,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
