use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use shared::credentials::CredentialError;
use shared::errors::ServiceError;
use tracing::info;

use super::super::AppState;
use super::super::errors::{not_configured_response, service_error_response};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartConnectResponse {
    auth_url: String,
}

pub(crate) async fn start_quickbooks_connect(State(state): State<AppState>) -> Response {
    let authorization = match state.context.credentials().authorization_url() {
        Ok(authorization) => authorization,
        Err(CredentialError::NotConfigured) => return not_configured_response(),
        Err(err) => return service_error_response(ServiceError::Internal(err.to_string())),
    };

    state.oauth_states.issue(&authorization.state);
    info!("issued quickbooks authorization url");

    (
        StatusCode::OK,
        Json(StartConnectResponse {
            auth_url: authorization.url,
        }),
    )
        .into_response()
}
