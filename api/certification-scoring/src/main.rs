use certification_scoring::app::{AppState, build_router};
use certification_scoring::config::environment::AppConfig;
use certification_scoring::infra::init_infra;
use certification_scoring::service::{outbox_service, scoring_service};
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
        score_window = config.scoring_policy.window,
        bronze_threshold = config.scoring_policy.bronze_threshold,
        log_reassessments = config.log_reassessments,
        "certification-scoring started"
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
        if let Err(e) = scoring_service::start_consumers(&state).await {
            error!(error = %e, "scoring consumers not started");
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
