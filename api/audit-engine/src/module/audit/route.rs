use super::controller;
use crate::app::AppState;
use axum::Router;
use axum::routing::{get, post};

pub fn register_routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/audits/health", get(controller::health))
        .route("/v1/audits/pending-review", get(controller::list_pending_review))
        .route("/v1/audits/dead-letters", get(controller::list_dead_letters))
        .route(
            "/v1/audits/dead-letters/:event_id/replay",
            post(controller::replay_dead_letter),
        )
        .route("/v1/audits/:audit_id", get(controller::get_audit))
        .route(
            "/v1/audits/:audit_id/revision",
            post(controller::revise_audit),
        )
        .route(
            "/v1/audits/movement/:movement_id",
            get(controller::get_audit_by_movement),
        )
        .route(
            "/v1/audits/producer/:producer_id",
            get(controller::list_by_producer),
        )
        .with_state(state)
}
