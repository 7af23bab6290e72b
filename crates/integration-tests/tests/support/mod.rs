#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use api_server::http::{AppState, build_router};
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use chrono::Utc;
use futures::stream;
use serde_json::{Value, json};
use shared::config::{ApiConfig, QuickBooksConfig, QuickBooksEnvironment};
use shared::context::AppContext;
use shared::coordinator::{TimeoutPolicy, ToolCall};
use shared::credentials::{Credentials, LiveSession};
use shared::llm::{
    LlmGateway, LlmGatewayError, LlmGatewayFuture, LlmGatewayRequest, ModelEvent,
    ModelEventStream,
};
use shared::quickbooks::{LedgerError, LedgerFuture, LiveLedger};
use shared::records::{FallbackStore, Invoice, InvoicePatch, NewInvoice};
use tower::ServiceExt;

pub const FRONTEND_URL: &str = "http://localhost:3000";

pub type ScriptedTurn = Vec<Result<ModelEvent, LlmGatewayError>>;

/// Replays canned generations, one per chat request.
#[derive(Default)]
pub struct ScriptedGateway {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<LlmGatewayRequest>>,
}

impl ScriptedGateway {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<LlmGatewayRequest> {
        self.requests.lock().expect("requests lock poisoned").clone()
    }
}

impl LlmGateway for ScriptedGateway {
    fn stream_chat<'a>(&'a self, request: LlmGatewayRequest) -> LlmGatewayFuture<'a> {
        Box::pin(async move {
            self.requests
                .lock()
                .expect("requests lock poisoned")
                .push(request);
            let turn = self
                .turns
                .lock()
                .expect("turns lock poisoned")
                .pop_front()
                .ok_or_else(|| LlmGatewayError::ProviderFailure("no scripted turn left".to_string()))?;
            Ok(Box::pin(stream::iter(turn)) as ModelEventStream)
        })
    }
}

pub fn text(delta: &str) -> Result<ModelEvent, LlmGatewayError> {
    Ok(ModelEvent::TextDelta(delta.to_string()))
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> Result<ModelEvent, LlmGatewayError> {
    Ok(ModelEvent::ToolCall(ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }))
}

/// Live ledger whose list call takes `delay` and every other call fails.
pub struct SlowLedger {
    pub delay: Duration,
}

impl LiveLedger for SlowLedger {
    fn list_invoices<'a>(&'a self, _session: &'a LiveSession) -> LedgerFuture<'a, Vec<Invoice>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(Vec::new())
        })
    }

    fn get_invoice<'a>(
        &'a self,
        _session: &'a LiveSession,
        _invoice_id: &'a str,
    ) -> LedgerFuture<'a, Option<Invoice>> {
        Box::pin(async { Err(LedgerError::Unavailable("slow ledger".to_string())) })
    }

    fn create_invoice<'a>(
        &'a self,
        _session: &'a LiveSession,
        _invoice: &'a NewInvoice,
    ) -> LedgerFuture<'a, Invoice> {
        Box::pin(async { Err(LedgerError::Unavailable("slow ledger".to_string())) })
    }

    fn update_invoice<'a>(
        &'a self,
        _session: &'a LiveSession,
        _invoice_id: &'a str,
        _patch: &'a InvoicePatch,
    ) -> LedgerFuture<'a, Invoice> {
        Box::pin(async { Err(LedgerError::Unavailable("slow ledger".to_string())) })
    }

    fn delete_invoice<'a>(
        &'a self,
        _session: &'a LiveSession,
        _invoice_id: &'a str,
    ) -> LedgerFuture<'a, Option<Invoice>> {
        Box::pin(async { Err(LedgerError::Unavailable("slow ledger".to_string())) })
    }
}

pub fn quickbooks_config(base_url: &str) -> QuickBooksConfig {
    QuickBooksConfig {
        client_id: Some("client-id".to_string()),
        client_secret: Some("client-secret".to_string()),
        redirect_uri: "http://localhost:3001/callback".to_string(),
        environment: QuickBooksEnvironment::Sandbox,
        auth_url: "https://appcenter.intuit.com/connect/oauth2".to_string(),
        token_url: format!("{base_url}/token"),
        revoke_url: format!("{base_url}/revoke"),
        api_base_url: base_url.to_string(),
        minor_version: 65,
        default_item_id: "1".to_string(),
        http_timeout_ms: 5_000,
    }
}

pub fn api_config(quickbooks_base_url: &str) -> ApiConfig {
    ApiConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        frontend_url: FRONTEND_URL.to_string(),
        quickbooks: quickbooks_config(quickbooks_base_url),
        tool_deadline_ms: 5_000,
        tool_timeout_policy: TimeoutPolicy::Detach,
        interaction_retention_seconds: 300,
        oauth_state_ttl_seconds: 600,
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    pub fn new(config: &ApiConfig, llm: Arc<dyn LlmGateway>, ledger: Arc<dyn LiveLedger>) -> Self {
        let context = AppContext::new(
            config,
            reqwest::Client::new(),
            ledger,
            FallbackStore::seeded(),
            llm,
        )
        .expect("context should build");
        let state = AppState::new(
            context,
            config.frontend_url.clone(),
            Duration::from_secs(config.oauth_state_ttl_seconds),
        );

        Self {
            router: build_router(state.clone()),
            state,
        }
    }

    /// Offline app: the ledger is never reached because no session exists.
    pub fn offline(llm: Arc<dyn LlmGateway>) -> Self {
        Self::new(
            &api_config("http://127.0.0.1:9"),
            llm,
            Arc::new(SlowLedger {
                delay: Duration::from_secs(0),
            }),
        )
    }

    pub fn connect(&self) {
        self.state.context.credentials().replace(Credentials {
            access_token: "live-access".to_string(),
            refresh_token: "live-refresh".to_string(),
            realm_id: Some("realm-1".to_string()),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        });
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: header::HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or_else(|_| json!({}))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("request should succeed");
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body should read");

    TestResponse {
        status,
        headers,
        body: body.to_vec(),
    }
}

pub fn request(method: Method, uri: &str, json_body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match json_body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request should build"),
        None => builder.body(Body::empty()).expect("request should build"),
    }
}
