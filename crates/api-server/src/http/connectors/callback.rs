use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use tracing::warn;

use super::super::AppState;
use super::helpers::frontend_redirect;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    realm_id: Option<String>,
    error: Option<String>,
    #[serde(rename = "error_description")]
    error_description: Option<String>,
}

pub(crate) async fn complete_quickbooks_connect(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let frontend_url = state.frontend_url.as_str();

    if let Some(error) = query.error.as_deref() {
        warn!(error, "quickbooks authorization was not granted");
        let description = query
            .error_description
            .as_deref()
            .unwrap_or("QuickBooks authorization failed");
        return frontend_redirect(frontend_url, &[("error", error), ("description", description)]);
    }

    let state_valid = query
        .state
        .as_deref()
        .is_some_and(|value| state.oauth_states.consume(value));
    if !state_valid {
        return frontend_redirect(
            frontend_url,
            &[
                ("error", "invalid_state"),
                ("description", "OAuth state is invalid or expired"),
            ],
        );
    }

    let Some(code) = query
        .code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())
    else {
        return frontend_redirect(
            frontend_url,
            &[
                ("error", "missing_code"),
                ("description", "Authorization code is missing"),
            ],
        );
    };

    match state
        .context
        .credentials()
        .exchange_code(code, query.realm_id.as_deref())
        .await
    {
        Ok(()) => frontend_redirect(frontend_url, &[("connected", "true")]),
        Err(err) => {
            warn!(error = %err, "quickbooks token exchange failed");
            let description = err.description();
            frontend_redirect(
                frontend_url,
                &[("error", "token_exchange_failed"), ("description", &description)],
            )
        }
    }
}
