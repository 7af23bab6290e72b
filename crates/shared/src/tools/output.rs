use serde::Serialize;

use crate::data_source::{DataSource, Sourced};
use crate::records::{Invoice, InvoiceStatusFilter};

/// Result of one tool execution. Each variant has its own rendering in the
/// outbound stream.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    /// Plain text, written to the stream verbatim.
    Message(String),
    /// A created or updated invoice, written as structured JSON.
    Invoice(InvoiceResult),
    /// A single invoice rendered as a label/value block with line items.
    InvoiceDetail(InvoiceResult),
    /// Aggregate over a status filter, rendered as grouped tables.
    InvoiceSummary(InvoiceSummary),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceResult {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub data_source: DataSource,
}

impl From<Sourced<Invoice>> for InvoiceResult {
    fn from(sourced: Sourced<Invoice>) -> Self {
        Self {
            invoice: sourced.value,
            data_source: sourced.data_source,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSummary {
    pub status: InvoiceStatusFilter,
    pub count: usize,
    pub total: f64,
    pub formatted: String,
    pub invoices: Vec<Invoice>,
    pub data_source: DataSource,
}
