use super::controller;
use crate::app::AppState;
use axum::Router;
use axum::routing::{get, post};

pub fn register_routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/movements", post(controller::create_movement))
        .route("/v1/movements/health", get(controller::health))
        .route("/v1/movements/:movement_id", get(controller::get_movement))
        .route(
            "/v1/movements/producer/:producer_id",
            get(controller::list_by_producer),
        )
        .route(
            "/v1/movements/commodity/:commodity_id",
            get(controller::list_by_commodity),
        )
        .with_state(state)
}
