mod types;

use std::future::Future;
use std::pin::Pin;

use chrono::Utc;
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::QuickBooksConfig;
use crate::credentials::LiveSession;
use crate::records::{Invoice, InvoicePatch, LineItem, NewInvoice};

use types::{
    CreateInvoiceBody, DeleteInvoiceBody, FaultEnvelope, InvoiceEnvelope, OBJECT_NOT_FOUND_CODE,
    QboInvoice, QboLine, QboRef, QueryEnvelope, QueryResponse, SparseUpdateBody,
};

pub type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LedgerError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("accounting api unavailable: {0}")]
    Unavailable(String),
    #[error("accounting api request failed: status={status} code={code}")]
    RequestFailed { status: u16, code: String },
    #[error("accounting api returned an invalid payload: {0}")]
    InvalidResponse(String),
    #[error("accounting api rejected the request: {0}")]
    Business(String),
    #[error("operation not supported by the accounting api: {0}")]
    Unsupported(String),
}

/// Invoice operations against the live accounting service.
pub trait LiveLedger: Send + Sync {
    fn list_invoices<'a>(&'a self, session: &'a LiveSession) -> LedgerFuture<'a, Vec<Invoice>>;

    fn get_invoice<'a>(
        &'a self,
        session: &'a LiveSession,
        invoice_id: &'a str,
    ) -> LedgerFuture<'a, Option<Invoice>>;

    fn create_invoice<'a>(
        &'a self,
        session: &'a LiveSession,
        invoice: &'a NewInvoice,
    ) -> LedgerFuture<'a, Invoice>;

    fn update_invoice<'a>(
        &'a self,
        session: &'a LiveSession,
        invoice_id: &'a str,
        patch: &'a InvoicePatch,
    ) -> LedgerFuture<'a, Invoice>;

    /// Deletes an invoice, returning it as it was. `None` when it does not exist.
    fn delete_invoice<'a>(
        &'a self,
        session: &'a LiveSession,
        invoice_id: &'a str,
    ) -> LedgerFuture<'a, Option<Invoice>>;
}

/// QuickBooks Online v3 REST client.
#[derive(Clone)]
pub struct QuickBooksClient {
    http_client: reqwest::Client,
    api_base_url: String,
    minor_version: u32,
    default_item_id: String,
}

impl QuickBooksClient {
    pub fn new(http_client: reqwest::Client, config: &QuickBooksConfig) -> Self {
        Self {
            http_client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            minor_version: config.minor_version,
            default_item_id: config.default_item_id.clone(),
        }
    }

    fn company_url(&self, session: &LiveSession, path: &str) -> String {
        format!(
            "{}/v3/company/{}/{path}",
            self.api_base_url, session.realm_id
        )
    }

    async fn query(
        &self,
        session: &LiveSession,
        statement: &str,
    ) -> Result<QueryResponse, LedgerError> {
        let request = self
            .http_client
            .get(self.company_url(session, "query"))
            .query(&[
                ("query", statement.to_string()),
                ("minorversion", self.minor_version.to_string()),
            ]);
        let envelope: QueryEnvelope = self.send(request, session).await?;
        Ok(envelope.query_response)
    }

    async fn read_invoice(
        &self,
        session: &LiveSession,
        invoice_id: &str,
    ) -> Result<Option<QboInvoice>, LedgerError> {
        let request = self
            .http_client
            .get(self.company_url(session, &format!("invoice/{invoice_id}")))
            .query(&[("minorversion", self.minor_version.to_string())]);

        match self.send::<InvoiceEnvelope>(request, session).await {
            Ok(envelope) => Ok(Some(envelope.invoice)),
            Err(LedgerError::RequestFailed { status: 404, .. }) => Ok(None),
            Err(LedgerError::RequestFailed { code, .. }) if code == OBJECT_NOT_FOUND_CODE => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn write_invoice<B: Serialize>(
        &self,
        session: &LiveSession,
        body: &B,
    ) -> Result<QboInvoice, LedgerError> {
        let request = self
            .http_client
            .post(self.company_url(session, "invoice"))
            .query(&[("minorversion", self.minor_version.to_string())])
            .json(body);
        let envelope: InvoiceEnvelope = self.send(request, session).await?;
        Ok(envelope.invoice)
    }

    async fn find_customer(
        &self,
        session: &LiveSession,
        display_name: &str,
    ) -> Result<QboRef, LedgerError> {
        let escaped = display_name.replace('\'', "\\'");
        let response = self
            .query(
                session,
                &format!("select * from Customer where DisplayName = '{escaped}'"),
            )
            .await?;

        let customer = response
            .customer
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::Business(format!("Customer not found: {display_name}")))?;

        Ok(QboRef {
            value: customer.id,
            name: customer.display_name,
        })
    }

    fn lines_for(&self, description: &str, amount: f64, items: &[LineItem]) -> Vec<QboLine> {
        if items.is_empty() {
            return vec![QboLine::sales_item(
                description.to_string(),
                1.0,
                amount,
                &self.default_item_id,
            )];
        }

        items
            .iter()
            .map(|item| {
                QboLine::sales_item(
                    item.description.clone(),
                    item.quantity,
                    item.price,
                    &self.default_item_id,
                )
            })
            .collect()
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        session: &LiveSession,
    ) -> Result<T, LedgerError> {
        let response = request
            .bearer_auth(&session.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| LedgerError::Unavailable(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| LedgerError::InvalidResponse(err.to_string()))?;

        if !status.is_success() {
            return Err(fault_error(status, &body));
        }

        serde_json::from_str::<T>(&body).map_err(|err| LedgerError::InvalidResponse(err.to_string()))
    }
}

impl LiveLedger for QuickBooksClient {
    fn list_invoices<'a>(&'a self, session: &'a LiveSession) -> LedgerFuture<'a, Vec<Invoice>> {
        Box::pin(async move {
            let today = Utc::now().date_naive();
            let response = self.query(session, "select * from Invoice").await?;
            Ok(response
                .invoice
                .into_iter()
                .map(|invoice| invoice.into_invoice(today))
                .collect())
        })
    }

    fn get_invoice<'a>(
        &'a self,
        session: &'a LiveSession,
        invoice_id: &'a str,
    ) -> LedgerFuture<'a, Option<Invoice>> {
        Box::pin(async move {
            let today = Utc::now().date_naive();
            Ok(self
                .read_invoice(session, invoice_id)
                .await?
                .map(|invoice| invoice.into_invoice(today)))
        })
    }

    fn create_invoice<'a>(
        &'a self,
        session: &'a LiveSession,
        invoice: &'a NewInvoice,
    ) -> LedgerFuture<'a, Invoice> {
        Box::pin(async move {
            let customer_ref = self.find_customer(session, &invoice.customer).await?;
            let body = CreateInvoiceBody {
                customer_ref,
                line: self.lines_for(
                    &format!("Invoice for {}", invoice.customer),
                    invoice.amount,
                    &invoice.items,
                ),
                txn_date: invoice.date,
            };

            let created = self.write_invoice(session, &body).await?;
            Ok(created.into_invoice(Utc::now().date_naive()))
        })
    }

    fn update_invoice<'a>(
        &'a self,
        session: &'a LiveSession,
        invoice_id: &'a str,
        patch: &'a InvoicePatch,
    ) -> LedgerFuture<'a, Invoice> {
        Box::pin(async move {
            if patch.status.is_some() {
                return Err(LedgerError::Unsupported(
                    "invoice status is derived from payments".to_string(),
                ));
            }
            if patch.customer.is_some() {
                return Err(LedgerError::Unsupported(
                    "changing the invoice customer".to_string(),
                ));
            }

            let current = self
                .read_invoice(session, invoice_id)
                .await?
                .ok_or_else(|| LedgerError::Business(format!("Invoice not found: {invoice_id}")))?;
            let sync_token = current
                .sync_token
                .clone()
                .ok_or_else(|| LedgerError::InvalidResponse("missing SyncToken".to_string()))?;

            let line = match (&patch.items, patch.amount) {
                (Some(items), amount) => {
                    self.lines_for("Invoice amount", amount.unwrap_or(current.total_amt), items)
                }
                (None, Some(amount)) => self.lines_for("Invoice amount", amount, &[]),
                (None, None) => {
                    let today = Utc::now().date_naive();
                    return Ok(current.into_invoice(today));
                }
            };

            let body = SparseUpdateBody {
                id: current.id.clone(),
                sync_token,
                sparse: true,
                line,
            };
            let updated = self.write_invoice(session, &body).await?;
            Ok(updated.into_invoice(Utc::now().date_naive()))
        })
    }

    fn delete_invoice<'a>(
        &'a self,
        session: &'a LiveSession,
        invoice_id: &'a str,
    ) -> LedgerFuture<'a, Option<Invoice>> {
        Box::pin(async move {
            let Some(current) = self.read_invoice(session, invoice_id).await? else {
                return Ok(None);
            };
            let sync_token = current
                .sync_token
                .clone()
                .ok_or_else(|| LedgerError::InvalidResponse("missing SyncToken".to_string()))?;

            let body = DeleteInvoiceBody {
                id: current.id.clone(),
                sync_token,
            };
            let request = self
                .http_client
                .post(self.company_url(session, "invoice"))
                .query(&[
                    ("operation", "delete".to_string()),
                    ("minorversion", self.minor_version.to_string()),
                ])
                .json(&body);
            // The delete response only echoes the id and a status.
            let _: serde_json::Value = self.send(request, session).await?;

            Ok(Some(current.into_invoice(Utc::now().date_naive())))
        })
    }
}

fn fault_error(status: StatusCode, body: &str) -> LedgerError {
    let first = serde_json::from_str::<FaultEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.fault)
        .and_then(|fault| fault.error.into_iter().next());

    match first {
        Some(fault) if status == StatusCode::BAD_REQUEST
            && fault.code.as_deref() != Some(OBJECT_NOT_FOUND_CODE) =>
        {
            LedgerError::Business(
                fault
                    .detail
                    .or(fault.message)
                    .unwrap_or_else(|| "validation fault".to_string()),
            )
        }
        Some(fault) => LedgerError::RequestFailed {
            status: status.as_u16(),
            code: fault.code.unwrap_or_else(|| "unknown".to_string()),
        },
        None => LedgerError::RequestFailed {
            status: status.as_u16(),
            code: "unknown".to_string(),
        },
    }
}
