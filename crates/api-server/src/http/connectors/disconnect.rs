use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use super::super::AppState;

#[derive(Debug, Serialize)]
struct DisconnectResponse {
    success: bool,
}

pub(crate) async fn disconnect_quickbooks(State(state): State<AppState>) -> Response {
    state.context.credentials().disconnect().await;
    (StatusCode::OK, Json(DisconnectResponse { success: true })).into_response()
}
