use crate::module::movement::error::AppError;
use async_trait::async_trait;
use ledger_events::canonical::sha256_bytes_hex;
use ledger_events::models::AttachmentRef;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("attachment not found: {0}")]
    NotFound(String),

    #[error("attachment store unavailable: {0}")]
    Unavailable(String),
}

/// External object store holding attachment bytes. Only digests are needed.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn content_digest(&self, url: &str) -> Result<String, AttachmentError>;
}

#[derive(Debug, Clone)]
pub struct HttpAttachmentStore {
    client: reqwest::Client,
}

impl HttpAttachmentStore {
    pub fn new(timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms.max(100)))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "attachment client build failed; using defaults");
                reqwest::Client::new()
            });
        Self { client }
    }
}

#[async_trait]
impl AttachmentStore for HttpAttachmentStore {
    async fn content_digest(&self, url: &str) -> Result<String, AttachmentError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AttachmentError::Unavailable(format!("fetch {url} failed: {e}")))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(AttachmentError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(AttachmentError::Unavailable(format!(
                "fetch {url} returned {}",
                status.as_u16()
            )));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| AttachmentError::Unavailable(format!("read {url} failed: {e}")))?;
        Ok(sha256_bytes_hex(&body))
    }
}

/// Object store kept in process memory, for local runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryAttachmentStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryAttachmentStore {
    pub fn put(&self, url: &str, bytes: &[u8]) -> String {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(url.to_string(), bytes.to_vec());
        }
        sha256_bytes_hex(bytes)
    }
}

#[async_trait]
impl AttachmentStore for InMemoryAttachmentStore {
    async fn content_digest(&self, url: &str) -> Result<String, AttachmentError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| AttachmentError::Unavailable("object map lock poisoned".to_string()))?;
        objects
            .get(url)
            .map(|bytes| sha256_bytes_hex(bytes))
            .ok_or_else(|| AttachmentError::NotFound(url.to_string()))
    }
}

pub async fn verify_attachments(
    store: &dyn AttachmentStore,
    attachments: &[AttachmentRef],
) -> Result<(), AppError> {
    for attachment in attachments {
        let digest = store.content_digest(&attachment.url).await?;
        if !digest.eq_ignore_ascii_case(&attachment.content_hash) {
            return Err(AppError::attachment_mismatch(&attachment.url));
        }
    }
    Ok(())
}
