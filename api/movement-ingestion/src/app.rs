use crate::config::environment::AppConfig;
use crate::infra::{InfraClients, build_bus};
use crate::module::movement::crud::MovementStore;
use crate::module::movement::route::register_routes;
use crate::service::attachment_service::{AttachmentStore, HttpAttachmentStore};
use axum::Router;
use axum::http::Method;
use ledger_events::bus::EventBus;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<MovementStore>,
    pub infra: Option<InfraClients>,
    pub bus: Arc<dyn EventBus>,
    pub attachments: Arc<dyn AttachmentStore>,
    pub relay_gate: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: AppConfig, infra: Option<InfraClients>) -> Self {
        let bus = build_bus(&config, infra.as_ref());
        let attachments = Arc::new(HttpAttachmentStore::new(config.downstream_timeout_ms));
        Self {
            config,
            store: Arc::new(MovementStore::default()),
            infra,
            bus,
            attachments,
            relay_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_attachment_store(mut self, attachments: Arc<dyn AttachmentStore>) -> Self {
        self.attachments = attachments;
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    register_routes(state).layer(cors)
}
