use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::data_source::{DataSource, ResolveError};
use shared::records::{Invoice, InvoicePatch, InvoiceStatusFilter, NewInvoice};
use shared::tools::InvoiceResult;

use super::AppState;
use super::errors::{invalid_argument_response, not_found_response};

const REQUIRED_CREATE_FIELDS: [&str; 3] = ["customer", "amount", "status"];

#[derive(Debug, Deserialize)]
pub(crate) struct ListInvoicesQuery {
    status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvoiceListResponse {
    invoices: Vec<Invoice>,
    data_source: DataSource,
}

pub(crate) async fn list_invoices(
    State(state): State<AppState>,
    Query(query): Query<ListInvoicesQuery>,
) -> Response {
    let filter = match query.status.as_deref().unwrap_or_default().parse::<InvoiceStatusFilter>() {
        Ok(filter) => filter,
        Err(message) => return invalid_argument_response(&message, &["status"]),
    };

    let listed = state.context.resolver().list_invoices(filter).await;
    (
        StatusCode::OK,
        Json(InvoiceListResponse {
            invoices: listed.value,
            data_source: listed.data_source,
        }),
    )
        .into_response()
}

pub(crate) async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<String>,
) -> Response {
    match state.context.resolver().get_invoice(&invoice_id).await {
        Ok(found) => (StatusCode::OK, Json(InvoiceResult::from(found))).into_response(),
        Err(err) => resolve_error_response(err),
    }
}

pub(crate) async fn create_invoice(State(state): State<AppState>, body: Bytes) -> Response {
    let payload = match parse_object(&body) {
        Ok(payload) => payload,
        Err(response) => return response,
    };

    let missing: Vec<&str> = REQUIRED_CREATE_FIELDS
        .into_iter()
        .filter(|field| payload.get(*field).is_none_or(Value::is_null))
        .collect();
    if !missing.is_empty() {
        return invalid_argument_response("Missing required fields", &missing);
    }

    let new_invoice = match serde_json::from_value::<NewInvoice>(payload) {
        Ok(new_invoice) => new_invoice,
        Err(err) => return invalid_argument_response(&err.to_string(), &[]),
    };
    if new_invoice.customer.trim().is_empty() {
        return invalid_argument_response("Customer must not be empty", &["customer"]);
    }
    if new_invoice.amount < 0.0 {
        return invalid_argument_response("Amount must not be negative", &["amount"]);
    }

    let created = state.context.resolver().create_invoice(new_invoice).await;
    (StatusCode::CREATED, Json(InvoiceResult::from(created))).into_response()
}

pub(crate) async fn update_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<String>,
    body: Bytes,
) -> Response {
    let payload = match parse_object(&body) {
        Ok(payload) => payload,
        Err(response) => return response,
    };

    let patch = match serde_json::from_value::<InvoicePatch>(payload) {
        Ok(patch) => patch,
        Err(err) => return invalid_argument_response(&err.to_string(), &[]),
    };
    if patch.is_empty() {
        return invalid_argument_response("No fields to update", &[]);
    }

    match state
        .context
        .resolver()
        .update_invoice(&invoice_id, &patch)
        .await
    {
        Ok(updated) => (StatusCode::OK, Json(InvoiceResult::from(updated))).into_response(),
        Err(err) => resolve_error_response(err),
    }
}

pub(crate) async fn delete_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<String>,
) -> Response {
    match state.context.resolver().delete_invoice(&invoice_id).await {
        Ok(deleted) => (StatusCode::OK, Json(InvoiceResult::from(deleted))).into_response(),
        Err(err) => resolve_error_response(err),
    }
}

fn parse_object(body: &[u8]) -> Result<Value, Response> {
    match serde_json::from_slice::<Value>(body) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(invalid_argument_response("Request body must be a JSON object", &[])),
        Err(_) => Err(invalid_argument_response("Request body must be valid JSON", &[])),
    }
}

fn resolve_error_response(err: ResolveError) -> Response {
    match err {
        ResolveError::NotFound(_) => not_found_response("Invoice not found"),
    }
}
