use super::controller;
use crate::app::AppState;
use axum::Router;
use axum::routing::{get, post};

pub fn register_routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/certifications/health", get(controller::health))
        .route(
            "/v1/certifications/dead-letters",
            get(controller::list_dead_letters),
        )
        .route(
            "/v1/certifications/dead-letters/:event_id/replay",
            post(controller::replay_dead_letter),
        )
        .route(
            "/v1/certifications/:producer_id",
            get(controller::get_certification),
        )
        .route(
            "/v1/certifications/:producer_id/history",
            get(controller::get_history),
        )
        .route(
            "/v1/certifications/:producer_id/recalculate",
            post(controller::recalculate),
        )
        .with_state(state)
}
