use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use shared::errors::ServiceError;
use tracing::{error, warn};

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: bool,
    message: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

/// Short error body used where clients expect `{ error, message }`.
#[derive(Debug, Serialize)]
struct SimpleErrorBody {
    error: String,
    message: String,
}

pub(super) fn service_error_response(err: ServiceError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    match &err {
        ServiceError::Internal(message) => error!(error = %message, "request failed"),
        ServiceError::Integration { api, message, cause } => warn!(
            api = %api,
            error = %message,
            cause = cause.as_deref().unwrap_or_default(),
            "upstream integration failed"
        ),
        _ => {}
    }

    (
        status,
        Json(ErrorEnvelope {
            error: true,
            message: err.public_message(),
            code: err.code(),
            details: err.details(),
        }),
    )
        .into_response()
}

pub(super) fn not_found_response(message: &str) -> Response {
    service_error_response(ServiceError::NotFound(message.to_string()))
}

pub(super) fn invalid_argument_response(message: &str, invalid_fields: &[&str]) -> Response {
    service_error_response(ServiceError::invalid_argument(message, invalid_fields))
}

pub(super) fn not_configured_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(SimpleErrorBody {
            error: "QuickBooks is not configured".to_string(),
            message: "Set QUICKBOOKS_CLIENT_ID and QUICKBOOKS_CLIENT_SECRET to enable the integration"
                .to_string(),
        }),
    )
        .into_response()
}
