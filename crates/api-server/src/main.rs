use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use api_server::http;
use shared::config::{ApiConfig, load_dotenv};
use shared::context::AppContext;
use shared::llm::{OpenAiChatGateway, OpenAiGatewayConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    if let Err(err) = load_dotenv() {
        eprintln!("failed to load .env: {err}");
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_env_filter(EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(
            |_| "api_server=info,shared=info,tower_http=info".to_string(),
        )))
        .init();

    let config = match ApiConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to read config: {err}");
            std::process::exit(1);
        }
    };

    let llm = match OpenAiGatewayConfig::from_env().and_then(OpenAiChatGateway::new) {
        Ok(gateway) => gateway,
        Err(err) => {
            error!("failed to configure llm gateway: {err}");
            std::process::exit(1);
        }
    };

    let context = match AppContext::from_config(&config, Arc::new(llm)) {
        Ok(context) => context,
        Err(err) => {
            error!("failed to build application context: {err}");
            std::process::exit(1);
        }
    };

    if !config.quickbooks.has_client_credentials() {
        info!("quickbooks credentials missing; serving invoices from the fallback store");
    }

    let state = http::AppState::new(
        context,
        config.frontend_url.clone(),
        Duration::from_secs(config.oauth_state_ttl_seconds),
    );
    state.context.interactions().spawn_pruner(PRUNE_INTERVAL);
    state.oauth_states.spawn_pruner(PRUNE_INTERVAL);

    let app = http::build_router(state);

    let addr: SocketAddr = match config.bind_addr.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!("invalid bind address {}: {err}", config.bind_addr);
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {addr}: {err}");
            std::process::exit(1);
        }
    };

    info!(
        "api server listening on {}",
        listener.local_addr().unwrap_or(addr)
    );
    if let Err(err) = axum::serve(listener, app).await {
        error!("server stopped: {err}");
        std::process::exit(1);
    }
}
