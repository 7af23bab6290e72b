use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use chrono::{Datelike, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Overdue,
}

impl InvoiceStatus {
    /// Display order used wherever invoices are grouped by status.
    pub const ORDER: [InvoiceStatus; 3] = [Self::Pending, Self::Paid, Self::Overdue];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Paid => "Paid",
            Self::Overdue => "Overdue",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatusFilter {
    #[default]
    All,
    Paid,
    Pending,
    Overdue,
}

impl InvoiceStatusFilter {
    pub fn status(self) -> Option<InvoiceStatus> {
        match self {
            Self::All => None,
            Self::Paid => Some(InvoiceStatus::Paid),
            Self::Pending => Some(InvoiceStatus::Pending),
            Self::Overdue => Some(InvoiceStatus::Overdue),
        }
    }

    pub fn matches(self, status: InvoiceStatus) -> bool {
        self.status().is_none_or(|wanted| wanted == status)
    }

    pub fn label(self) -> &'static str {
        match self.status() {
            Some(status) => status.label(),
            None => "All",
        }
    }
}

impl FromStr for InvoiceStatusFilter {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "paid" => Ok(Self::Paid),
            "pending" => Ok(Self::Pending),
            "overdue" => Ok(Self::Overdue),
            other => Err(format!("unknown invoice status {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LineItem {
    /// What was sold.
    pub description: String,
    /// Number of units.
    pub quantity: f64,
    /// Price per unit.
    pub price: f64,
}

impl LineItem {
    pub fn line_total(&self) -> f64 {
        self.quantity * self.price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub customer: String,
    pub amount: f64,
    pub date: NaiveDate,
    pub status: InvoiceStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<LineItem>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewInvoice {
    pub customer: String,
    pub amount: f64,
    pub status: InvoiceStatus,
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InvoicePatch {
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub status: Option<InvoiceStatus>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub items: Option<Vec<LineItem>>,
}

impl InvoicePatch {
    pub fn is_empty(&self) -> bool {
        self.customer.is_none()
            && self.status.is_none()
            && self.amount.is_none()
            && self.items.is_none()
    }

    pub fn apply_to(&self, invoice: &mut Invoice) {
        if let Some(customer) = &self.customer {
            invoice.customer = customer.clone();
        }
        if let Some(status) = self.status {
            invoice.status = status;
        }
        if let Some(amount) = self.amount {
            invoice.amount = amount;
        }
        if let Some(items) = &self.items {
            invoice.items = items.clone();
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Invoice not found: {0}")]
    NotFound(String),
}

/// Insertion-ordered in-memory invoice set used whenever the live ledger is
/// unavailable, and kept warm by mirrored live writes.
#[derive(Clone, Default)]
pub struct FallbackStore {
    invoices: Arc<RwLock<Vec<Invoice>>>,
}

impl FallbackStore {
    pub fn new(invoices: Vec<Invoice>) -> Self {
        Self {
            invoices: Arc::new(RwLock::new(invoices)),
        }
    }

    pub fn seeded() -> Self {
        Self::new(sample_invoices())
    }

    pub fn all(&self) -> Vec<Invoice> {
        self.invoices
            .read()
            .expect("fallback store lock poisoned")
            .clone()
    }

    pub fn filter(&self, filter: InvoiceStatusFilter) -> Vec<Invoice> {
        self.invoices
            .read()
            .expect("fallback store lock poisoned")
            .iter()
            .filter(|invoice| filter.matches(invoice.status))
            .cloned()
            .collect()
    }

    pub fn find(&self, id: &str) -> Option<Invoice> {
        self.invoices
            .read()
            .expect("fallback store lock poisoned")
            .iter()
            .find(|invoice| invoice.id == id)
            .cloned()
    }

    pub fn insert(&self, new_invoice: NewInvoice) -> Invoice {
        self.insert_on(new_invoice, Utc::now().date_naive())
    }

    pub fn insert_on(&self, new_invoice: NewInvoice, today: NaiveDate) -> Invoice {
        let mut invoices = self.invoices.write().expect("fallback store lock poisoned");
        let invoice = Invoice {
            id: next_invoice_id(&invoices, today.year()),
            customer: new_invoice.customer,
            amount: new_invoice.amount,
            date: new_invoice.date.unwrap_or(today),
            status: new_invoice.status,
            items: new_invoice.items,
        };
        invoices.push(invoice.clone());
        invoice
    }

    /// Replaces the invoice with the same id in place, or appends it.
    pub fn upsert(&self, invoice: Invoice) {
        let mut invoices = self.invoices.write().expect("fallback store lock poisoned");
        match invoices.iter_mut().find(|existing| existing.id == invoice.id) {
            Some(existing) => *existing = invoice,
            None => invoices.push(invoice),
        }
    }

    pub fn update(&self, id: &str, patch: &InvoicePatch) -> Result<Invoice, StoreError> {
        let mut invoices = self.invoices.write().expect("fallback store lock poisoned");
        let invoice = invoices
            .iter_mut()
            .find(|invoice| invoice.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        patch.apply_to(invoice);
        Ok(invoice.clone())
    }

    /// Removes the invoice with `id`, keeping the order of the rest.
    pub fn remove(&self, id: &str) -> Option<Invoice> {
        let mut invoices = self.invoices.write().expect("fallback store lock poisoned");
        let index = invoices.iter().position(|invoice| invoice.id == id)?;
        Some(invoices.remove(index))
    }

    pub fn len(&self) -> usize {
        self.invoices.read().expect("fallback store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn next_invoice_id(invoices: &[Invoice], year: i32) -> String {
    let taken: HashSet<&str> = invoices.iter().map(|invoice| invoice.id.as_str()).collect();
    let mut sequence = invoices.len() + 1;
    loop {
        let candidate = format!("INV-{year}-{sequence:03}");
        if !taken.contains(candidate.as_str()) {
            return candidate;
        }
        sequence += 1;
    }
}

fn sample_invoices() -> Vec<Invoice> {
    let sample = |id: &str, customer: &str, amount: f64, day: u32, status: InvoiceStatus| Invoice {
        id: id.to_string(),
        customer: customer.to_string(),
        amount,
        date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap_or_default(),
        status,
        items: Vec::new(),
    };

    vec![
        sample("INV-2024-001", "Acme Corporation", 1500.00, 15, InvoiceStatus::Pending),
        sample("INV-2024-002", "TechStart Inc.", 2750.50, 14, InvoiceStatus::Paid),
        sample("INV-2024-003", "Global Solutions", 950.25, 10, InvoiceStatus::Overdue),
        sample("INV-2024-004", "Digital Dynamics", 3200.00, 13, InvoiceStatus::Paid),
        sample("INV-2024-005", "Innovation Labs", 1875.75, 12, InvoiceStatus::Pending),
    ]
}
