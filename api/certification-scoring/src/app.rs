use crate::config::environment::AppConfig;
use crate::infra::{InfraClients, build_bus};
use crate::module::certification::crud::CertificationStore;
use crate::module::certification::route as certification_route;
use axum::Router;
use axum::http::Method;
use ledger_events::bus::EventBus;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<CertificationStore>,
    pub infra: Option<InfraClients>,
    pub bus: Arc<dyn EventBus>,
    pub relay_gate: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: AppConfig, infra: Option<InfraClients>) -> Self {
        let bus = build_bus(&config, infra.as_ref());
        Self {
            config,
            store: Arc::new(CertificationStore::default()),
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

    certification_route::register_routes(state).layer(cors)
}
