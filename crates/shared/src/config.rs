use std::time::Duration;

use thiserror::Error;

use crate::config_env::{
    ensure_http_url, optional_trimmed_env, parse_u32_env, parse_u64_env, parse_url_env,
};
use crate::coordinator::TimeoutPolicy;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3001";
const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";
const DEFAULT_REDIRECT_URI: &str = "http://localhost:3001/callback";
const DEFAULT_AUTH_URL: &str = "https://appcenter.intuit.com/connect/oauth2";
const DEFAULT_TOKEN_URL: &str = "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";
const DEFAULT_REVOKE_URL: &str = "https://developer.api.intuit.com/v2/oauth2/tokens/revoke";
const SANDBOX_API_BASE_URL: &str = "https://sandbox-quickbooks.api.intuit.com";
const PRODUCTION_API_BASE_URL: &str = "https://quickbooks.api.intuit.com";
const DEFAULT_MINOR_VERSION: u32 = 65;
const DEFAULT_ITEM_ID: &str = "1";
const DEFAULT_QUICKBOOKS_HTTP_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_TOOL_DEADLINE_MS: u64 = 5_000;
const DEFAULT_INTERACTION_RETENTION_SECONDS: u64 = 300;
const DEFAULT_OAUTH_STATE_TTL_SECONDS: u64 = 600;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    pub frontend_url: String,
    pub quickbooks: QuickBooksConfig,
    pub tool_deadline_ms: u64,
    pub tool_timeout_policy: TimeoutPolicy,
    pub interaction_retention_seconds: u64,
    pub oauth_state_ttl_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuickBooksEnvironment {
    Sandbox,
    Production,
}

impl QuickBooksEnvironment {
    pub fn api_base_url(self) -> &'static str {
        match self {
            Self::Sandbox => SANDBOX_API_BASE_URL,
            Self::Production => PRODUCTION_API_BASE_URL,
        }
    }

    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Self::Sandbox),
            "production" => Ok(Self::Production),
            _ => Err(ConfigError::InvalidConfiguration(format!(
                "QUICKBOOKS_ENVIRONMENT must be sandbox or production, got {raw}"
            ))),
        }
    }
}

/// OAuth client settings plus the REST endpoints of the accounting provider.
///
/// Client id and secret are optional: without them the service never leaves
/// fallback mode and the authorization endpoint reports a configuration error.
#[derive(Debug, Clone)]
pub struct QuickBooksConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub environment: QuickBooksEnvironment,
    pub auth_url: String,
    pub token_url: String,
    pub revoke_url: String,
    pub api_base_url: String,
    pub minor_version: u32,
    pub default_item_id: String,
    pub http_timeout_ms: u64,
}

impl QuickBooksConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = match optional_trimmed_env("QUICKBOOKS_ENVIRONMENT") {
            Some(raw) => QuickBooksEnvironment::parse(&raw)?,
            None => QuickBooksEnvironment::Sandbox,
        };

        Ok(Self {
            client_id: optional_trimmed_env("QUICKBOOKS_CLIENT_ID"),
            client_secret: optional_trimmed_env("QUICKBOOKS_CLIENT_SECRET"),
            redirect_uri: parse_url_env("QUICKBOOKS_REDIRECT_URI", DEFAULT_REDIRECT_URI)?,
            environment,
            auth_url: parse_url_env("QUICKBOOKS_AUTH_URL", DEFAULT_AUTH_URL)?,
            token_url: parse_url_env("QUICKBOOKS_TOKEN_URL", DEFAULT_TOKEN_URL)?,
            revoke_url: parse_url_env("QUICKBOOKS_REVOKE_URL", DEFAULT_REVOKE_URL)?,
            api_base_url: parse_url_env("QUICKBOOKS_API_BASE_URL", environment.api_base_url())?,
            minor_version: parse_u32_env("QUICKBOOKS_MINOR_VERSION", DEFAULT_MINOR_VERSION)?,
            default_item_id: optional_trimmed_env("QUICKBOOKS_DEFAULT_ITEM_ID")
                .unwrap_or_else(|| DEFAULT_ITEM_ID.to_string()),
            http_timeout_ms: parse_u64_env(
                "QUICKBOOKS_HTTP_TIMEOUT_MS",
                DEFAULT_QUICKBOOKS_HTTP_TIMEOUT_MS,
            )?,
        })
    }

    pub fn has_client_credentials(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingVar(String),
    #[error("invalid integer in env var {0}")]
    ParseInt(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to load .env file: {0}")]
    Dotenv(String),
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let frontend_url =
            optional_trimmed_env("FRONTEND_URL").unwrap_or_else(|| DEFAULT_FRONTEND_URL.to_string());
        ensure_http_url("FRONTEND_URL", &frontend_url)?;

        let tool_timeout_policy = match optional_trimmed_env("TOOL_TIMEOUT_POLICY") {
            Some(raw) => raw.parse::<TimeoutPolicy>().map_err(|_| {
                ConfigError::InvalidConfiguration(format!(
                    "TOOL_TIMEOUT_POLICY must be detach or cancel, got {raw}"
                ))
            })?,
            None => TimeoutPolicy::default(),
        };

        let tool_deadline_ms = parse_u64_env("TOOL_DEADLINE_MS", DEFAULT_TOOL_DEADLINE_MS)?;
        if tool_deadline_ms == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "TOOL_DEADLINE_MS must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            bind_addr: optional_trimmed_env("API_BIND_ADDR")
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
            quickbooks: QuickBooksConfig::from_env()?,
            tool_deadline_ms,
            tool_timeout_policy,
            interaction_retention_seconds: parse_u64_env(
                "INTERACTION_RETENTION_SECONDS",
                DEFAULT_INTERACTION_RETENTION_SECONDS,
            )?,
            oauth_state_ttl_seconds: parse_u64_env(
                "OAUTH_STATE_TTL_SECONDS",
                DEFAULT_OAUTH_STATE_TTL_SECONDS,
            )?,
        })
    }

    pub fn tool_deadline(&self) -> Duration {
        Duration::from_millis(self.tool_deadline_ms)
    }

    pub fn interaction_retention(&self) -> Duration {
        Duration::from_secs(self.interaction_retention_seconds)
    }
}

/// Loads a `.env` file from the working directory when one exists.
pub fn load_dotenv() -> Result<(), ConfigError> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(ConfigError::Dotenv(err.to_string())),
    }
}
