pub mod internal_auth_service;
pub mod metrics_service;
pub mod outbox_service;
pub mod scoring_service;
