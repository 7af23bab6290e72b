use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::records::{Invoice, InvoiceStatus, LineItem};

pub(super) const SALES_ITEM_LINE: &str = "SalesItemLineDetail";
pub(super) const OBJECT_NOT_FOUND_CODE: &str = "610";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct QueryEnvelope {
    pub query_response: QueryResponse,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct QueryResponse {
    #[serde(default)]
    pub invoice: Vec<QboInvoice>,
    #[serde(default)]
    pub customer: Vec<QboCustomer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct InvoiceEnvelope {
    pub invoice: QboInvoice,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct QboInvoice {
    pub id: String,
    pub sync_token: Option<String>,
    pub txn_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub total_amt: f64,
    #[serde(default)]
    pub balance: f64,
    pub customer_ref: Option<QboRef>,
    #[serde(default)]
    pub line: Vec<QboLine>,
}

impl QboInvoice {
    pub fn into_invoice(self, today: NaiveDate) -> Invoice {
        let status = derive_status(self.balance, self.due_date, today);
        let customer = self
            .customer_ref
            .and_then(|reference| reference.name)
            .unwrap_or_default();
        let items = self
            .line
            .into_iter()
            .filter_map(|line| {
                let detail = line.sales_item_line_detail?;
                let quantity = detail.qty.unwrap_or(1.0);
                let price = detail.unit_price.unwrap_or(line.amount / quantity.max(1.0));
                Some(LineItem {
                    description: line.description.unwrap_or_default(),
                    quantity,
                    price,
                })
            })
            .collect();

        Invoice {
            id: self.id,
            customer,
            amount: self.total_amt,
            date: self.txn_date.unwrap_or(today),
            status,
            items,
        }
    }
}

/// Live invoices carry no status field; it follows from balance and due date.
pub(super) fn derive_status(
    balance: f64,
    due_date: Option<NaiveDate>,
    today: NaiveDate,
) -> InvoiceStatus {
    if balance <= 0.0 {
        return InvoiceStatus::Paid;
    }
    match due_date {
        Some(due) if due < today => InvoiceStatus::Overdue,
        _ => InvoiceStatus::Pending,
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct QboCustomer {
    pub id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct QboRef {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct QboLine {
    #[serde(default)]
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub detail_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sales_item_line_detail: Option<QboSalesItemLineDetail>,
}

impl QboLine {
    pub fn sales_item(description: String, quantity: f64, price: f64, item_id: &str) -> Self {
        Self {
            amount: round_cents(quantity * price),
            description: Some(description),
            detail_type: SALES_ITEM_LINE.to_string(),
            sales_item_line_detail: Some(QboSalesItemLineDetail {
                item_ref: Some(QboRef {
                    value: item_id.to_string(),
                    name: None,
                }),
                qty: Some(quantity),
                unit_price: Some(price),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct QboSalesItemLineDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_ref: Option<QboRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct CreateInvoiceBody {
    pub customer_ref: QboRef,
    pub line: Vec<QboLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct SparseUpdateBody {
    pub id: String,
    pub sync_token: String,
    #[serde(rename = "sparse")]
    pub sparse: bool,
    pub line: Vec<QboLine>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DeleteInvoiceBody {
    pub id: String,
    pub sync_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct FaultEnvelope {
    pub fault: Option<Fault>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct Fault {
    #[serde(default)]
    pub error: Vec<FaultError>,
}

#[derive(Debug, Deserialize)]
pub(super) struct FaultError {
    #[serde(rename = "Message")]
    pub message: Option<String>,
    #[serde(rename = "Detail")]
    pub detail: Option<String>,
    pub code: Option<String>,
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
