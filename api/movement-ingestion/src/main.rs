use movement_ingestion::app::{AppState, build_router};
use movement_ingestion::config::environment::AppConfig;
use movement_ingestion::infra::init_infra;
use movement_ingestion::service::{idempotency_service, outbox_service};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    init_logging();

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "config error");
            std::process::exit(1);
        }
    };

    let bind_addr = format!("{}:{}", config.api_host, config.api_port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, bind_addr = %bind_addr, "server bind error");
            std::process::exit(1);
        }
    };

    info!(
        env = %config.rust_env,
        host = %config.api_host,
        port = config.api_port,
        bus_partitions = config.bus_partitions,
        attachment_verify_enabled = config.attachment_verify_enabled,
        "movement-ingestion started"
    );

    let infra = match init_infra(&config).await {
        Ok(i) => i,
        Err(e) => {
            warn!(error = %e, "infra init failed; running with in-memory storage");
            None
        }
    };
    let state = AppState::new(config, infra);
    if state.config.worker_enabled {
        let relay_state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = outbox_service::run_relay(relay_state).await {
                error!(error = %e, "outbox relay exited");
            }
        });
        let gc_state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = idempotency_service::run_gc(gc_state).await {
                error!(error = %e, "idempotency gc exited");
            }
        });
    }
    let app = build_router(state);
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server runtime error");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
