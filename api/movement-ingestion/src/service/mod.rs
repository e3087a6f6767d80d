pub mod attachment_service;
pub mod idempotency_service;
pub mod internal_auth_service;
pub mod metrics_service;
pub mod outbox_service;
pub mod validation_service;
