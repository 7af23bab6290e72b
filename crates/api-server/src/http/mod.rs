use std::time::Duration;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, post};
use shared::context::AppContext;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

mod chat;
mod connectors;
mod errors;
mod health;
mod invoices;
mod oauth_states;
mod tokens;

pub use oauth_states::OAuthStateStore;

pub const INTERACTION_ID_HEADER: &str = "x-interaction-id";

#[derive(Clone)]
pub struct AppState {
    pub context: AppContext,
    pub oauth_states: OAuthStateStore,
    pub frontend_url: String,
}

impl AppState {
    pub fn new(context: AppContext, frontend_url: impl Into<String>, oauth_state_ttl: Duration) -> Self {
        Self {
            context,
            oauth_states: OAuthStateStore::new(oauth_state_ttl),
            frontend_url: frontend_url.into(),
        }
    }
}

pub fn build_router(app_state: AppState) -> Router {
    let cors = cors_layer(&app_state.frontend_url);

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/api/chat", post(chat::chat))
        .route(
            "/api/chat/progress/{interaction_id}",
            get(chat::progress),
        )
        .route("/api/quickbooks/auth", get(connectors::start_quickbooks_connect))
        .route("/callback", get(connectors::complete_quickbooks_connect))
        .route(
            "/api/quickbooks/callback",
            get(connectors::complete_quickbooks_connect),
        )
        .route("/api/quickbooks/status", get(connectors::quickbooks_status))
        .route(
            "/api/quickbooks/disconnect",
            post(connectors::disconnect_quickbooks),
        )
        .route(
            "/api/invoices",
            get(invoices::list_invoices).post(invoices::create_invoice),
        )
        .route(
            "/api/invoices/{invoice_id}",
            get(invoices::get_invoice)
                .put(invoices::update_invoice)
                .delete(invoices::delete_invoice),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let origin = match HeaderValue::from_str(frontend_url) {
        Ok(origin) => AllowOrigin::exact(origin),
        Err(_) => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([header::HeaderName::from_static(INTERACTION_ID_HEADER)])
}
