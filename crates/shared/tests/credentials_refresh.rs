use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{Duration, TimeZone, Utc};
use serde_json::{Value, json};
use shared::config::{QuickBooksConfig, QuickBooksEnvironment};
use shared::credentials::{CredentialError, CredentialManager, Credentials};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};

#[derive(Debug, Clone)]
struct MockReply {
    status: StatusCode,
    body: Value,
}

#[derive(Debug, Clone, Default)]
struct TokenServerState {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    seen_forms: Arc<Mutex<Vec<HashMap<String, String>>>>,
    seen_auth_headers: Arc<Mutex<Vec<String>>>,
    revoked: Arc<Mutex<Vec<Value>>>,
}

impl TokenServerState {
    fn with_replies(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::from(replies))),
            ..Self::default()
        }
    }
}

fn token_reply(access: &str, refresh: &str, expires_in: i64) -> MockReply {
    MockReply {
        status: StatusCode::OK,
        body: json!({
            "access_token": access,
            "refresh_token": refresh,
            "expires_in": expires_in,
            "token_type": "bearer"
        }),
    }
}

fn rejection_reply(error: &str, description: &str) -> MockReply {
    MockReply {
        status: StatusCode::BAD_REQUEST,
        body: json!({ "error": error, "error_description": description }),
    }
}

fn oauth_config(base_url: &str) -> QuickBooksConfig {
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

fn fixed_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn stored(expires_at: Option<chrono::DateTime<Utc>>) -> Credentials {
    Credentials {
        access_token: "old-access".to_string(),
        refresh_token: "old-refresh".to_string(),
        realm_id: Some("realm-42".to_string()),
        expires_at,
    }
}

#[tokio::test]
async fn refreshes_when_expiry_is_within_the_window() {
    let now = fixed_now();
    for seconds_left in [0_i64, 1, 120, 299, 300] {
        let state = TokenServerState::with_replies(vec![token_reply("new-access", "new-refresh", 3600)]);
        let (base_url, shutdown_tx, server_task) = spawn_token_server(state.clone()).await;

        let manager = CredentialManager::new(reqwest::Client::new(), oauth_config(&base_url));
        manager.replace(stored(Some(now + Duration::seconds(seconds_left))));

        assert!(manager.ensure_valid_token_at(now).await, "{seconds_left}s left");

        shutdown_tx.send(()).expect("shutdown signal should send");
        server_task.await.expect("server task should join");

        let refreshed = manager.snapshot().expect("credentials kept");
        assert_eq!(refreshed.access_token, "new-access");
        assert_eq!(refreshed.refresh_token, "new-refresh");
        assert_eq!(refreshed.realm_id.as_deref(), Some("realm-42"));
        assert_eq!(refreshed.expires_at, Some(now + Duration::seconds(3600)));

        let forms = state.seen_forms.lock().await.clone();
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0]["grant_type"], "refresh_token");
        assert_eq!(forms[0]["refresh_token"], "old-refresh");
    }
}

#[tokio::test]
async fn refreshes_when_expiry_is_unknown() {
    let state = TokenServerState::with_replies(vec![token_reply("new-access", "new-refresh", 3600)]);
    let (base_url, shutdown_tx, server_task) = spawn_token_server(state.clone()).await;

    let manager = CredentialManager::new(reqwest::Client::new(), oauth_config(&base_url));
    manager.replace(stored(None));

    assert!(manager.ensure_valid_token_at(fixed_now()).await);

    shutdown_tx.send(()).expect("shutdown signal should send");
    server_task.await.expect("server task should join");

    assert_eq!(state.seen_forms.lock().await.len(), 1);
}

#[tokio::test]
async fn skips_refresh_beyond_the_window() {
    let now = fixed_now();
    let state = TokenServerState::default();
    let (base_url, shutdown_tx, server_task) = spawn_token_server(state.clone()).await;

    let manager = CredentialManager::new(reqwest::Client::new(), oauth_config(&base_url));
    manager.replace(stored(Some(now + Duration::seconds(301))));

    assert!(manager.ensure_valid_token_at(now).await);

    shutdown_tx.send(()).expect("shutdown signal should send");
    server_task.await.expect("server task should join");

    assert!(state.seen_forms.lock().await.is_empty());
    assert_eq!(
        manager.snapshot().map(|c| c.access_token).as_deref(),
        Some("old-access")
    );
}

#[tokio::test]
async fn failed_refresh_keeps_existing_tokens() {
    let now = fixed_now();
    let state = TokenServerState::with_replies(vec![rejection_reply(
        "invalid_grant",
        "Token expired",
    )]);
    let (base_url, shutdown_tx, server_task) = spawn_token_server(state.clone()).await;

    let manager = CredentialManager::new(reqwest::Client::new(), oauth_config(&base_url));
    let original = stored(Some(now + Duration::seconds(60)));
    manager.replace(original.clone());

    assert!(!manager.ensure_valid_token_at(now).await);

    shutdown_tx.send(()).expect("shutdown signal should send");
    server_task.await.expect("server task should join");

    assert_eq!(manager.snapshot(), Some(original));
}

#[tokio::test]
async fn exchange_replaces_the_whole_credential_set() {
    let state = TokenServerState::with_replies(vec![token_reply("fresh-access", "fresh-refresh", 3600)]);
    let (base_url, shutdown_tx, server_task) = spawn_token_server(state.clone()).await;

    let manager = CredentialManager::new(reqwest::Client::new(), oauth_config(&base_url));
    manager
        .exchange_code("auth-code", Some("realm-7"))
        .await
        .expect("exchange should succeed");

    shutdown_tx.send(()).expect("shutdown signal should send");
    server_task.await.expect("server task should join");

    let credentials = manager.snapshot().expect("connected");
    assert_eq!(credentials.access_token, "fresh-access");
    assert_eq!(credentials.refresh_token, "fresh-refresh");
    assert_eq!(credentials.realm_id.as_deref(), Some("realm-7"));
    assert!(manager.is_authenticated());
    assert_eq!(manager.status().realm_id.as_deref(), Some("realm-7"));

    let forms = state.seen_forms.lock().await.clone();
    assert_eq!(forms[0]["grant_type"], "authorization_code");
    assert_eq!(forms[0]["code"], "auth-code");
    assert_eq!(forms[0]["redirect_uri"], "http://localhost:3001/callback");

    let auth_headers = state.seen_auth_headers.lock().await.clone();
    // base64("client-id:client-secret")
    assert_eq!(auth_headers, vec!["Basic Y2xpZW50LWlkOmNsaWVudC1zZWNyZXQ=".to_string()]);
}

#[tokio::test]
async fn failed_exchange_surfaces_description_and_keeps_state() {
    let state = TokenServerState::with_replies(vec![rejection_reply(
        "invalid_grant",
        "Authorization code is invalid",
    )]);
    let (base_url, shutdown_tx, server_task) = spawn_token_server(state.clone()).await;

    let manager = CredentialManager::new(reqwest::Client::new(), oauth_config(&base_url));
    let previous = stored(Some(Utc::now() + Duration::hours(1)));
    manager.replace(previous.clone());

    let err = manager
        .exchange_code("bad-code", Some("realm-7"))
        .await
        .expect_err("exchange should fail");

    shutdown_tx.send(()).expect("shutdown signal should send");
    server_task.await.expect("server task should join");

    assert!(matches!(
        err,
        CredentialError::ProviderRejected { status: 400, .. }
    ));
    assert_eq!(err.description(), "Authorization code is invalid");
    assert_eq!(manager.snapshot(), Some(previous));
}

#[tokio::test]
async fn disconnect_clears_then_revokes() {
    let state = TokenServerState::default();
    let (base_url, shutdown_tx, server_task) = spawn_token_server(state.clone()).await;

    let manager = CredentialManager::new(reqwest::Client::new(), oauth_config(&base_url));
    manager.replace(stored(Some(Utc::now() + Duration::hours(1))));

    manager.disconnect().await;

    shutdown_tx.send(()).expect("shutdown signal should send");
    server_task.await.expect("server task should join");

    assert!(manager.snapshot().is_none());
    assert!(!manager.is_authenticated());
    assert_eq!(
        state.revoked.lock().await.clone(),
        vec![json!({ "token": "old-refresh" })]
    );
}

async fn token_handler(
    State(state): State<TokenServerState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.seen_forms.lock().await.push(form);
    if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        state.seen_auth_headers.lock().await.push(value.to_string());
    }

    let reply = state.replies.lock().await.pop_front().unwrap_or(MockReply {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: json!({ "error": "no_reply_queued" }),
    });
    (reply.status, Json(reply.body)).into_response()
}

async fn revoke_handler(State(state): State<TokenServerState>, Json(body): Json<Value>) -> StatusCode {
    state.revoked.lock().await.push(body);
    StatusCode::OK
}

async fn spawn_token_server(
    state: TokenServerState,
) -> (String, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route("/token", post(token_handler))
        .route("/revoke", post(revoke_handler))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let local_addr = listener
        .local_addr()
        .expect("listener address should resolve");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let server_task = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });

        server.await.expect("test server should run");
    });

    (format!("http://{local_addr}"), shutdown_tx, server_task)
}
