use audit_engine::app::{AppState, build_router};
use audit_engine::config::environment::AppConfig;
use audit_engine::infra::init_infra;
use audit_engine::module::rule_catalog::crud::seed_from_file;
use audit_engine::service::{evaluation_service, outbox_service};
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
        worker_max_attempts = config.worker_max_attempts,
        "audit-engine started"
    );

    let infra = match init_infra(&config).await {
        Ok(i) => i,
        Err(e) => {
            warn!(error = %e, "infra init failed; running with in-memory storage");
            None
        }
    };
    let state = AppState::new(config, infra);

    if let Some(path) = state.config.rule_catalog_path.clone() {
        match seed_from_file(&state, &path).await {
            Ok(version) => info!(version, path = %path, "rule catalog seeded"),
            Err(e) => {
                error!(error_code = e.code, reason = %e.message, path = %path, "rule catalog seed failed");
                std::process::exit(1);
            }
        }
    } else {
        warn!("RULE_CATALOG_PATH not set; movements wait until a rule set is activated");
    }

    if state.config.worker_enabled {
        let relay_state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = outbox_service::run_relay(relay_state).await {
                error!(error = %e, "outbox relay exited");
            }
        });
        if let Err(e) = evaluation_service::start_consumers(&state).await {
            error!(error = %e, "audit consumers not started");
        }
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
