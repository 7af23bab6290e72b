use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::super::AppState;

pub(crate) async fn quickbooks_status(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Json(state.context.credentials().status())).into_response()
}
