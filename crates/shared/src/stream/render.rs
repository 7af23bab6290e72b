use chrono::NaiveDate;

use crate::records::{Invoice, InvoiceStatus, LineItem};
use crate::tools::{InvoiceResult, InvoiceSummary, ToolOutput};

const ID_WIDTH: usize = 14;
const CUSTOMER_WIDTH: usize = 22;
const AMOUNT_WIDTH: usize = 14;
const DATE_WIDTH: usize = 14;
const STATUS_WIDTH: usize = 10;

const DESCRIPTION_WIDTH: usize = 28;
const QUANTITY_WIDTH: usize = 8;
const PRICE_WIDTH: usize = 14;
const LINE_TOTAL_WIDTH: usize = 14;

const NO_INVOICES: &str = "No invoices found.";

/// `$1,234.50`, with a leading minus for negative amounts.
pub fn format_currency(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, digit) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

/// `Mar 15, 2024`.
pub fn format_display_date(date: NaiveDate) -> String {
    date.format("%b %-d, %Y").to_string()
}

/// Text written after a tool's result marker.
pub fn render_output(output: &ToolOutput) -> String {
    match output {
        ToolOutput::Message(text) => text.clone(),
        ToolOutput::Invoice(result) => {
            serde_json::to_string_pretty(result).unwrap_or_else(|_| format!("{result:?}"))
        }
        ToolOutput::InvoiceDetail(result) => render_invoice_detail(result),
        ToolOutput::InvoiceSummary(summary) => render_invoice_summary(summary),
    }
}

fn render_invoice_summary(summary: &InvoiceSummary) -> String {
    let mut out = String::new();
    out.push_str(&summary.formatted);
    out.push('\n');
    out.push_str(&format!("Status: {}\n", summary.status.label()));
    out.push_str(&format!("Count: {}\n", summary.count));
    out.push_str(&format!("Total Value: {}\n", format_currency(summary.total)));
    out.push_str(&format!("Data Source: {}\n", summary.data_source));

    if summary.invoices.is_empty() {
        out.push('\n');
        out.push_str(NO_INVOICES);
        return out;
    }

    match summary.status.status() {
        Some(status) => {
            let rows: Vec<&Invoice> = summary.invoices.iter().collect();
            out.push('\n');
            push_status_section(&mut out, status, &rows);
        }
        None => {
            for status in InvoiceStatus::ORDER {
                let rows: Vec<&Invoice> = summary
                    .invoices
                    .iter()
                    .filter(|invoice| invoice.status == status)
                    .collect();
                if rows.is_empty() {
                    continue;
                }
                out.push('\n');
                push_status_section(&mut out, status, &rows);
            }
        }
    }

    out.trim_end().to_string()
}

fn push_status_section(out: &mut String, status: InvoiceStatus, rows: &[&Invoice]) {
    out.push_str(&format!("{} Invoices ({})\n", status.label(), rows.len()));
    let header = format!(
        "{}{}{}{}{}",
        pad("ID", ID_WIDTH),
        pad("Customer", CUSTOMER_WIDTH),
        pad("Amount", AMOUNT_WIDTH),
        pad("Date", DATE_WIDTH),
        "Status"
    );
    out.push_str(&header);
    out.push('\n');
    out.push_str(&"-".repeat(ID_WIDTH + CUSTOMER_WIDTH + AMOUNT_WIDTH + DATE_WIDTH + STATUS_WIDTH));
    out.push('\n');

    for invoice in rows {
        out.push_str(&format!(
            "{}{}{}{}{}\n",
            pad(&invoice.id, ID_WIDTH),
            pad(&invoice.customer, CUSTOMER_WIDTH),
            pad(&format_currency(invoice.amount), AMOUNT_WIDTH),
            pad(&format_display_date(invoice.date), DATE_WIDTH),
            invoice.status
        ));
    }
}

fn render_invoice_detail(result: &InvoiceResult) -> String {
    let invoice = &result.invoice;
    let mut out = format!(
        "Invoice: {}\nCustomer: {}\nAmount: {}\nDate: {}\nStatus: {}\nData Source: {}",
        invoice.id,
        invoice.customer,
        format_currency(invoice.amount),
        format_display_date(invoice.date),
        invoice.status.label(),
        result.data_source
    );

    if invoice.items.is_empty() {
        return out;
    }

    out.push_str("\n\nLine Items\n");
    out.push_str(&format!(
        "{}{}{}{}\n",
        pad("Description", DESCRIPTION_WIDTH),
        pad("Qty", QUANTITY_WIDTH),
        pad("Unit Price", PRICE_WIDTH),
        "Total"
    ));
    out.push_str(&"-".repeat(DESCRIPTION_WIDTH + QUANTITY_WIDTH + PRICE_WIDTH + LINE_TOTAL_WIDTH));
    for item in &invoice.items {
        out.push('\n');
        out.push_str(&line_item_row(item));
    }
    out
}

fn line_item_row(item: &LineItem) -> String {
    format!(
        "{}{}{}{}",
        pad(&item.description, DESCRIPTION_WIDTH),
        pad(&format_quantity(item.quantity), QUANTITY_WIDTH),
        pad(&format_currency(item.price), PRICE_WIDTH),
        format_currency(item.line_total())
    )
}

fn format_quantity(quantity: f64) -> String {
    if quantity.fract() == 0.0 {
        format!("{quantity:.0}")
    } else {
        format!("{quantity:.2}")
    }
}

/// Left-aligns `value` in a column of `width` characters, truncating so at
/// least one space separates it from the next column.
fn pad(value: &str, width: usize) -> String {
    let limit = width.saturating_sub(1);
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated:<width$}")
}
