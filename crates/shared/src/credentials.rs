use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::QuickBooksConfig;

const ACCOUNTING_SCOPE: &str = "com.intuit.quickbooks.accounting";

/// Tokens are refreshed once they are this close to expiring.
pub const REFRESH_WINDOW_SECONDS: i64 = 300;

/// Token pair for the accounting integration. Access and refresh token are
/// stored together so a partially connected state cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    pub realm_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now + Duration::seconds(REFRESH_WINDOW_SECONDS),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    Disconnected,
    Connected,
    NearExpiry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationUrl {
    pub url: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSession {
    pub access_token: String,
    pub realm_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realm_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("QuickBooks client credentials are not configured")]
    NotConfigured,
    #[error("invalid authorization endpoint: {0}")]
    InvalidAuthUrl(String),
    #[error("token endpoint unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("{}", rejection_message(.error, .description))]
    ProviderRejected {
        status: u16,
        error: Option<String>,
        description: Option<String>,
    },
    #[error("token endpoint returned an invalid payload: {0}")]
    InvalidResponse(String),
}

impl CredentialError {
    /// Human readable reason suitable for a redirect query parameter.
    pub fn description(&self) -> String {
        self.to_string()
    }
}

fn rejection_message(error: &Option<String>, description: &Option<String>) -> String {
    description
        .as_deref()
        .or(error.as_deref())
        .unwrap_or("token request rejected")
        .to_string()
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

/// Owns the OAuth session with the accounting provider.
///
/// Refresh failures never clear the stored tokens; the caller just sees the
/// integration as unavailable and can retry on the next request.
#[derive(Clone)]
pub struct CredentialManager {
    http_client: reqwest::Client,
    oauth: QuickBooksConfig,
    credentials: Arc<RwLock<Option<Credentials>>>,
}

impl CredentialManager {
    pub fn new(http_client: reqwest::Client, oauth: QuickBooksConfig) -> Self {
        Self {
            http_client,
            oauth,
            credentials: Arc::new(RwLock::new(None)),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.oauth.has_client_credentials()
    }

    pub fn authorization_url(&self) -> Result<AuthorizationUrl, CredentialError> {
        let client_id = self
            .oauth
            .client_id
            .as_deref()
            .filter(|_| self.is_configured())
            .ok_or(CredentialError::NotConfigured)?;
        let state = Uuid::new_v4().simple().to_string();

        let mut url = Url::parse(&self.oauth.auth_url)
            .map_err(|err| CredentialError::InvalidAuthUrl(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("scope", ACCOUNTING_SCOPE)
            .append_pair("redirect_uri", &self.oauth.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("state", &state);

        Ok(AuthorizationUrl {
            url: url.to_string(),
            state,
        })
    }

    /// Trades an authorization code for a token pair. The stored credentials
    /// are only replaced once the provider answered successfully.
    pub async fn exchange_code(
        &self,
        code: &str,
        realm_id: Option<&str>,
    ) -> Result<(), CredentialError> {
        let issued = self
            .request_tokens(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.oauth.redirect_uri.as_str()),
            ])
            .await?;

        let refresh_token = issued.refresh_token.ok_or_else(|| {
            CredentialError::InvalidResponse("missing refresh_token".to_string())
        })?;

        self.replace(Credentials {
            access_token: issued.access_token,
            refresh_token,
            realm_id: realm_id
                .map(str::trim)
                .filter(|realm| !realm.is_empty())
                .map(ToString::to_string),
            expires_at: issued.expires_in.map(|seconds| Utc::now() + Duration::seconds(seconds)),
        });
        info!(realm_id = realm_id.unwrap_or_default(), "quickbooks session connected");

        Ok(())
    }

    pub async fn ensure_valid_token(&self) -> bool {
        self.ensure_valid_token_at(Utc::now()).await
    }

    pub async fn ensure_valid_token_at(&self, now: DateTime<Utc>) -> bool {
        let Some(current) = self.snapshot() else {
            return false;
        };

        if !current.needs_refresh_at(now) {
            return true;
        }

        match self.refresh(&current.refresh_token, now).await {
            Ok(refreshed) => {
                let mut guard = self.credentials.write().expect("credential lock poisoned");
                // A disconnect or a newer session may have landed while the
                // refresh was in flight; only replace the session we refreshed.
                match guard.as_mut() {
                    Some(stored) if stored.refresh_token == current.refresh_token => {
                        stored.access_token = refreshed.access_token;
                        stored.refresh_token = refreshed.refresh_token;
                        stored.expires_at = refreshed.expires_at;
                        true
                    }
                    Some(_) => true,
                    None => false,
                }
            }
            Err(err) => {
                warn!(error = %err, "quickbooks token refresh failed");
                false
            }
        }
    }

    /// Valid credentials for a live call, refreshed if needed.
    pub async fn live_session(&self) -> Option<LiveSession> {
        if !self.ensure_valid_token().await {
            return None;
        }

        let credentials = self.snapshot()?;
        let Some(realm_id) = credentials.realm_id else {
            warn!("quickbooks session has no realm id");
            return None;
        };

        Some(LiveSession {
            access_token: credentials.access_token,
            realm_id,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated_at(Utc::now())
    }

    pub fn is_authenticated_at(&self, now: DateTime<Utc>) -> bool {
        self.snapshot()
            .and_then(|credentials| credentials.expires_at)
            .is_some_and(|expires_at| expires_at > now)
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> CredentialState {
        match self.snapshot() {
            None => CredentialState::Disconnected,
            Some(credentials) if credentials.needs_refresh_at(now) => CredentialState::NearExpiry,
            Some(_) => CredentialState::Connected,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        let authenticated = self.is_authenticated();
        ConnectionStatus {
            authenticated,
            realm_id: self
                .snapshot()
                .filter(|_| authenticated)
                .and_then(|credentials| credentials.realm_id),
        }
    }

    pub fn snapshot(&self) -> Option<Credentials> {
        self.credentials
            .read()
            .expect("credential lock poisoned")
            .clone()
    }

    /// Installs a complete session in one assignment.
    pub fn replace(&self, credentials: Credentials) {
        *self.credentials.write().expect("credential lock poisoned") = Some(credentials);
    }

    /// Clears the session in one assignment, then revokes the refresh token
    /// at the provider. Revocation failures are logged only.
    pub async fn disconnect(&self) {
        let previous = self
            .credentials
            .write()
            .expect("credential lock poisoned")
            .take();

        let Some(previous) = previous else {
            return;
        };
        info!("quickbooks session disconnected");

        if let Err(err) = self.revoke(&previous.refresh_token).await {
            warn!(error = %err, "quickbooks token revoke failed");
        }
    }

    async fn refresh(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Credentials, CredentialError> {
        let issued = self
            .request_tokens(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .await?;

        Ok(Credentials {
            access_token: issued.access_token,
            refresh_token: issued
                .refresh_token
                .unwrap_or_else(|| refresh_token.to_string()),
            realm_id: None,
            expires_at: issued.expires_in.map(|seconds| now + Duration::seconds(seconds)),
        })
    }

    async fn request_tokens(&self, form: &[(&str, &str)]) -> Result<TokenResponse, CredentialError> {
        let (client_id, client_secret) = self.client_credentials()?;

        let response = self
            .http_client
            .post(&self.oauth.token_url)
            .basic_auth(client_id, Some(client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(|err| CredentialError::ProviderUnavailable(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let parsed = serde_json::from_str::<OAuthErrorBody>(&body).ok();
            return Err(CredentialError::ProviderRejected {
                status: status.as_u16(),
                error: parsed.as_ref().and_then(|body| body.error.clone()),
                description: parsed.and_then(|body| body.error_description),
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|err| CredentialError::InvalidResponse(err.to_string()))
    }

    async fn revoke(&self, refresh_token: &str) -> Result<(), CredentialError> {
        let (client_id, client_secret) = self.client_credentials()?;

        let response = self
            .http_client
            .post(&self.oauth.revoke_url)
            .basic_auth(client_id, Some(client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&serde_json::json!({ "token": refresh_token }))
            .send()
            .await
            .map_err(|err| CredentialError::ProviderUnavailable(err.to_string()))?;

        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<OAuthErrorBody>(&body).ok();
        Err(CredentialError::ProviderRejected {
            status: status.as_u16(),
            error: parsed.as_ref().and_then(|body| body.error.clone()),
            description: parsed.and_then(|body| body.error_description),
        })
    }

    fn client_credentials(&self) -> Result<(&str, &str), CredentialError> {
        match (
            self.oauth.client_id.as_deref(),
            self.oauth.client_secret.as_deref(),
        ) {
            (Some(id), Some(secret)) => Ok((id, secret)),
            _ => Err(CredentialError::NotConfigured),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuickBooksEnvironment;

    fn oauth_config(client_id: Option<&str>) -> QuickBooksConfig {
        QuickBooksConfig {
            client_id: client_id.map(ToString::to_string),
            client_secret: client_id.map(|_| "secret".to_string()),
            redirect_uri: "http://localhost:3001/callback".to_string(),
            environment: QuickBooksEnvironment::Sandbox,
            auth_url: "https://appcenter.intuit.com/connect/oauth2".to_string(),
            token_url: "http://127.0.0.1:9/token".to_string(),
            revoke_url: "http://127.0.0.1:9/revoke".to_string(),
            api_base_url: "http://127.0.0.1:9".to_string(),
            minor_version: 65,
            default_item_id: "1".to_string(),
            http_timeout_ms: 1_000,
        }
    }

    fn credentials(expires_at: Option<DateTime<Utc>>) -> Credentials {
        Credentials {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            realm_id: Some("realm-1".to_string()),
            expires_at,
        }
    }

    #[test]
    fn refresh_window_is_inclusive_at_five_minutes() {
        let now = Utc::now();
        assert!(credentials(None).needs_refresh_at(now));
        assert!(credentials(Some(now)).needs_refresh_at(now));
        assert!(credentials(Some(now + Duration::seconds(300))).needs_refresh_at(now));
        assert!(!credentials(Some(now + Duration::seconds(301))).needs_refresh_at(now));
    }

    #[test]
    fn authorization_url_carries_scope_and_fresh_state() {
        let manager = CredentialManager::new(reqwest::Client::new(), oauth_config(Some("client")));

        let first = manager.authorization_url().expect("configured");
        let second = manager.authorization_url().expect("configured");
        assert_ne!(first.state, second.state);

        let parsed = Url::parse(&first.url).expect("valid url");
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        assert!(pairs.contains(&("client_id".to_string(), "client".to_string())));
        assert!(pairs.contains(&("scope".to_string(), ACCOUNTING_SCOPE.to_string())));
        assert!(pairs.contains(&("response_type".to_string(), "code".to_string())));
        assert!(pairs.contains(&("state".to_string(), first.state.clone())));
        assert_eq!(manager.snapshot(), None);
    }

    #[test]
    fn authorization_url_requires_client_configuration() {
        let manager = CredentialManager::new(reqwest::Client::new(), oauth_config(None));
        assert!(matches!(
            manager.authorization_url(),
            Err(CredentialError::NotConfigured)
        ));
    }

    #[test]
    fn state_machine_tracks_expiry() {
        let manager = CredentialManager::new(reqwest::Client::new(), oauth_config(Some("client")));
        let now = Utc::now();
        assert_eq!(manager.state_at(now), CredentialState::Disconnected);
        assert!(!manager.is_authenticated_at(now));

        manager.replace(credentials(Some(now + Duration::hours(1))));
        assert_eq!(manager.state_at(now), CredentialState::Connected);
        assert!(manager.is_authenticated_at(now));

        manager.replace(credentials(Some(now + Duration::seconds(60))));
        assert_eq!(manager.state_at(now), CredentialState::NearExpiry);
        assert!(manager.is_authenticated_at(now));
    }

    #[tokio::test]
    async fn disconnect_clears_everything_at_once() {
        let manager = CredentialManager::new(reqwest::Client::new(), oauth_config(Some("client")));
        manager.replace(credentials(Some(Utc::now() + Duration::hours(1))));

        manager.disconnect().await;

        assert_eq!(manager.snapshot(), None);
        assert!(!manager.ensure_valid_token().await);
        assert_eq!(
            manager.status(),
            ConnectionStatus {
                authenticated: false,
                realm_id: None
            }
        );
    }

    #[tokio::test]
    async fn far_expiry_skips_the_network() {
        // The token endpoint points at a closed port, so any refresh attempt
        // would fail and return false.
        let manager = CredentialManager::new(reqwest::Client::new(), oauth_config(Some("client")));
        manager.replace(credentials(Some(Utc::now() + Duration::hours(1))));

        assert!(manager.ensure_valid_token().await);
        assert_eq!(
            manager.live_session().await,
            Some(LiveSession {
                access_token: "access".to_string(),
                realm_id: "realm-1".to_string()
            })
        );
    }

    #[tokio::test]
    async fn failed_refresh_keeps_existing_tokens() {
        let manager = CredentialManager::new(reqwest::Client::new(), oauth_config(Some("client")));
        let stale = credentials(Some(Utc::now() + Duration::seconds(30)));
        manager.replace(stale.clone());

        assert!(!manager.ensure_valid_token().await);
        assert_eq!(manager.snapshot(), Some(stale));
    }
}
