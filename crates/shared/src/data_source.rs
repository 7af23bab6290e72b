use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::credentials::CredentialManager;
use crate::quickbooks::LiveLedger;
use crate::records::{
    FallbackStore, Invoice, InvoicePatch, InvoiceStatusFilter, NewInvoice, StoreError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Live,
    Fallback,
}

impl DataSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value together with the store that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub data_source: DataSource,
}

impl<T> Sourced<T> {
    fn live(value: T) -> Self {
        Self {
            value,
            data_source: DataSource::Live,
        }
    }

    fn fallback(value: T) -> Self {
        Self {
            value,
            data_source: DataSource::Fallback,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Invoice not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for ResolveError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
        }
    }
}

/// Routes invoice operations to the live ledger when a valid session exists
/// and to the fallback store otherwise. Live failures are logged and fall
/// through to the fallback store.
///
/// Live writes are mirrored into the fallback store after they succeed. The
/// two writes are independent: nothing is rolled back when one side fails.
#[derive(Clone)]
pub struct DataSourceResolver {
    credentials: CredentialManager,
    live: Arc<dyn LiveLedger>,
    fallback: FallbackStore,
}

impl DataSourceResolver {
    pub fn new(
        credentials: CredentialManager,
        live: Arc<dyn LiveLedger>,
        fallback: FallbackStore,
    ) -> Self {
        Self {
            credentials,
            live,
            fallback,
        }
    }

    pub fn fallback(&self) -> &FallbackStore {
        &self.fallback
    }

    pub async fn list_invoices(&self, filter: InvoiceStatusFilter) -> Sourced<Vec<Invoice>> {
        if let Some(session) = self.credentials.live_session().await {
            match self.live.list_invoices(&session).await {
                Ok(invoices) => {
                    let matching = invoices
                        .into_iter()
                        .filter(|invoice| filter.matches(invoice.status))
                        .collect();
                    return Sourced::live(matching);
                }
                Err(err) => warn!(
                    error = %err,
                    operation = "list_invoices",
                    "live ledger failed, using fallback"
                ),
            }
        }

        Sourced::fallback(self.fallback.filter(filter))
    }

    pub async fn get_invoice(&self, invoice_id: &str) -> Result<Sourced<Invoice>, ResolveError> {
        if let Some(session) = self.credentials.live_session().await {
            match self.live.get_invoice(&session, invoice_id).await {
                Ok(Some(invoice)) => return Ok(Sourced::live(invoice)),
                Ok(None) => debug!(invoice_id, "invoice missing from live ledger"),
                Err(err) => warn!(
                    error = %err,
                    operation = "get_invoice",
                    "live ledger failed, using fallback"
                ),
            }
        }

        self.fallback
            .find(invoice_id)
            .map(Sourced::fallback)
            .ok_or_else(|| ResolveError::NotFound(invoice_id.to_string()))
    }

    pub async fn create_invoice(&self, new_invoice: NewInvoice) -> Sourced<Invoice> {
        if let Some(session) = self.credentials.live_session().await {
            match self.live.create_invoice(&session, &new_invoice).await {
                Ok(created) => {
                    self.fallback.upsert(created.clone());
                    return Sourced::live(created);
                }
                Err(err) => warn!(
                    error = %err,
                    operation = "create_invoice",
                    "live ledger failed, using fallback"
                ),
            }
        }

        Sourced::fallback(self.fallback.insert(new_invoice))
    }

    pub async fn update_invoice(
        &self,
        invoice_id: &str,
        patch: &InvoicePatch,
    ) -> Result<Sourced<Invoice>, ResolveError> {
        if let Some(session) = self.credentials.live_session().await {
            match self.live.update_invoice(&session, invoice_id, patch).await {
                Ok(updated) => {
                    self.fallback.upsert(updated.clone());
                    return Ok(Sourced::live(updated));
                }
                Err(err) => warn!(
                    error = %err,
                    operation = "update_invoice",
                    "live ledger failed, using fallback"
                ),
            }
        }

        Ok(Sourced::fallback(self.fallback.update(invoice_id, patch)?))
    }

    /// Deletes an invoice. A live delete also drops the mirrored copy; an id the
    /// live ledger does not know is looked up in the fallback store.
    pub async fn delete_invoice(
        &self,
        invoice_id: &str,
    ) -> Result<Sourced<Invoice>, ResolveError> {
        if let Some(session) = self.credentials.live_session().await {
            match self.live.delete_invoice(&session, invoice_id).await {
                Ok(Some(deleted)) => {
                    self.fallback.remove(invoice_id);
                    return Ok(Sourced::live(deleted));
                }
                Ok(None) => debug!(invoice_id, "invoice missing from live ledger"),
                Err(err) => warn!(
                    error = %err,
                    operation = "delete_invoice",
                    "live ledger failed, using fallback"
                ),
            }
        }

        self.fallback
            .remove(invoice_id)
            .map(Sourced::fallback)
            .ok_or_else(|| ResolveError::NotFound(invoice_id.to_string()))
    }
}
