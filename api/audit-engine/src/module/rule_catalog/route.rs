use super::controller;
use crate::app::AppState;
use axum::Router;
use axum::routing::{get, post};

pub fn register_routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/rules/versions", post(controller::publish_rule_set))
        .route("/v1/rules/versions/:version", get(controller::get_rule_set))
        .route(
            "/v1/rules/versions/:version/activate",
            post(controller::activate_rule_set),
        )
        .route("/v1/rules/active", get(controller::get_active_rule_set))
        .route(
            "/v1/rules/active/at/:timestamp",
            get(controller::get_rule_set_active_at),
        )
        .with_state(state)
}
