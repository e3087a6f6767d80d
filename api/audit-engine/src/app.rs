use crate::config::environment::AppConfig;
use crate::infra::{InfraClients, build_bus};
use crate::module::audit::crud::AuditStore;
use crate::module::audit::route as audit_route;
use crate::module::rule_catalog::crud::RuleCatalogStore;
use crate::module::rule_catalog::route as rule_catalog_route;
use axum::Router;
use axum::http::Method;
use ledger_events::bus::EventBus;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<AuditStore>,
    pub catalog: Arc<RuleCatalogStore>,
    pub infra: Option<InfraClients>,
    pub bus: Arc<dyn EventBus>,
    pub relay_gate: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: AppConfig, infra: Option<InfraClients>) -> Self {
        let bus = build_bus(&config, infra.as_ref());
        Self {
            config,
            store: Arc::new(AuditStore::default()),
            catalog: Arc::new(RuleCatalogStore::default()),
            infra,
            bus,
            relay_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = bus;
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    audit_route::register_routes(state.clone())
        .merge(rule_catalog_route::register_routes(state))
        .layer(cors)
}
