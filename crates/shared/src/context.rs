use std::sync::Arc;

use thiserror::Error;

use crate::config::ApiConfig;
use crate::coordinator::ToolCoordinator;
use crate::credentials::CredentialManager;
use crate::data_source::DataSourceResolver;
use crate::interactions::InteractionRegistry;
use crate::llm::{LlmGateway, ToolDefinition};
use crate::quickbooks::{LiveLedger, QuickBooksClient};
use crate::records::FallbackStore;
use crate::stream::StreamMultiplexer;
use crate::tools::{RegistryError, invoice_registry};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to build http client: {0}")]
    HttpClient(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Everything a request needs, created once at startup and shared by handle.
///
/// The credential set, fallback store and interaction registry live here
/// instead of in module-level state, so tests can build isolated instances.
#[derive(Clone)]
pub struct AppContext {
    credentials: CredentialManager,
    resolver: DataSourceResolver,
    multiplexer: StreamMultiplexer,
    interactions: InteractionRegistry,
    llm: Arc<dyn LlmGateway>,
}

impl AppContext {
    /// Wires the default QuickBooks client and a seeded fallback store.
    pub fn from_config(config: &ApiConfig, llm: Arc<dyn LlmGateway>) -> Result<Self, ContextError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.quickbooks.http_timeout())
            .build()
            .map_err(|err| ContextError::HttpClient(err.to_string()))?;
        let ledger = Arc::new(QuickBooksClient::new(
            http_client.clone(),
            &config.quickbooks,
        ));
        Self::new(config, http_client, ledger, FallbackStore::seeded(), llm)
    }

    pub fn new(
        config: &ApiConfig,
        http_client: reqwest::Client,
        ledger: Arc<dyn LiveLedger>,
        fallback: FallbackStore,
        llm: Arc<dyn LlmGateway>,
    ) -> Result<Self, ContextError> {
        let credentials = CredentialManager::new(http_client, config.quickbooks.clone());
        let resolver = DataSourceResolver::new(credentials.clone(), ledger, fallback);
        let registry = invoice_registry(resolver.clone())?;
        let coordinator = ToolCoordinator::new(
            Arc::new(registry),
            config.tool_deadline(),
            config.tool_timeout_policy,
        );

        Ok(Self {
            credentials,
            resolver,
            multiplexer: StreamMultiplexer::new(coordinator),
            interactions: InteractionRegistry::new(config.interaction_retention()),
            llm,
        })
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    pub fn resolver(&self) -> &DataSourceResolver {
        &self.resolver
    }

    pub fn fallback(&self) -> &FallbackStore {
        self.resolver.fallback()
    }

    pub fn multiplexer(&self) -> &StreamMultiplexer {
        &self.multiplexer
    }

    pub fn interactions(&self) -> &InteractionRegistry {
        &self.interactions
    }

    pub fn llm(&self) -> &Arc<dyn LlmGateway> {
        &self.llm
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.multiplexer.coordinator().registry().definitions()
    }
}
