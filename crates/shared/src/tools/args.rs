use schemars::JsonSchema;
use serde::Deserialize;

use crate::records::{InvoiceStatus, InvoiceStatusFilter, LineItem};

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetInvoiceDetailsArgs {
    /// Identifier of the invoice, for example INV-2024-001.
    #[schemars(length(min = 1))]
    pub invoice_id: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoiceArgs {
    /// Customer name as it appears on the invoice.
    #[schemars(length(min = 1))]
    pub customer: String,
    /// Invoice total in dollars.
    #[schemars(range(min = 0))]
    pub amount: f64,
    /// Initial invoice status.
    pub status: InvoiceStatus,
    /// Optional line items.
    #[serde(default)]
    pub items: Option<Vec<LineItem>>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInvoiceArgs {
    /// Identifier of the invoice to change.
    #[schemars(length(min = 1))]
    pub invoice_id: String,
    /// New status.
    #[serde(default)]
    pub status: Option<InvoiceStatus>,
    /// New total in dollars.
    #[serde(default)]
    #[schemars(range(min = 0))]
    pub amount: Option<f64>,
    /// Replacement line items.
    #[serde(default)]
    pub items: Option<Vec<LineItem>>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetTotalInvoicesArgs {
    /// Which invoices to count; `all` when omitted.
    #[serde(default)]
    pub status: InvoiceStatusFilter,
}
