mod config;
mod protocol;
mod routes;
mod ws;

use config::ServerConfig;
use routes::{router, AppState};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    let state = match AppState::new(&config) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to start: {}", e);
            std::process::exit(1);
        }
    };
    let app = router(state, &config);

    info!("listening on {}", config.addr);
    let listener = match tokio::net::TcpListener::bind(config.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", config.addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
    }
}
