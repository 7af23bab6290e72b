use std::convert::Infallible;

use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::stream;
use serde::Deserialize;
use serde_json::Value;
use shared::errors::ServiceError;
use shared::interactions::{InteractionError, InteractionRegistry, InteractionTracker};
use shared::llm::{ChatMessage, LlmGatewayError, LlmGatewayRequest, INVOICE_ASSISTANT_SYSTEM_PROMPT};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::errors::{invalid_argument_response, not_found_response, service_error_response};
use super::{AppState, INTERACTION_ID_HEADER};

const STREAM_BUFFER: usize = 64;

/// Fails an interaction that was begun but never handed to a stream task,
/// which happens when the client goes away while the handler is suspended.
struct PendingInteraction {
    interactions: InteractionRegistry,
    id: String,
    armed: bool,
}

impl PendingInteraction {
    fn new(interactions: InteractionRegistry, id: String) -> Self {
        Self {
            interactions,
            id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingInteraction {
    fn drop(&mut self) {
        if self.armed {
            warn!(interaction_id = %self.id, "client disconnected before the stream started");
            self.interactions.fail(&self.id, "client disconnected");
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    messages: Option<Value>,
    interaction_id: Option<String>,
}

pub(crate) async fn chat(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match serde_json::from_slice::<ChatRequest>(&body) {
        Ok(request) => request,
        Err(_) => return invalid_argument_response("Request body must be valid JSON", &[]),
    };

    let messages = match parse_messages(request.messages) {
        Ok(messages) => messages,
        Err(response) => return response,
    };

    let interactions = state.context.interactions().clone();
    let interaction_id = match interactions.begin(request.interaction_id.as_deref(), messages.clone())
    {
        Ok(interaction_id) => interaction_id,
        Err(InteractionError::Busy(id)) => {
            return service_error_response(ServiceError::Conflict(format!(
                "Interaction {id} already has an active stream"
            )));
        }
    };
    let pending = PendingInteraction::new(interactions.clone(), interaction_id.clone());

    let gateway_request = LlmGatewayRequest {
        system_prompt: INVOICE_ASSISTANT_SYSTEM_PROMPT.to_string(),
        messages,
        tools: state.context.tool_definitions(),
    };

    let events = match state.context.llm().stream_chat(gateway_request).await {
        Ok(events) => events,
        Err(err) => {
            pending.disarm();
            interactions.fail(&interaction_id, err.to_string());
            return service_error_response(gateway_error(err));
        }
    };
    pending.disarm();

    let (tx, rx) = mpsc::channel::<String>(STREAM_BUFFER);
    let multiplexer = state.context.multiplexer().clone();
    let tracked_id = interaction_id.clone();
    tokio::spawn(async move {
        let tracker = InteractionTracker::new(interactions.clone(), tracked_id.clone());
        let report = multiplexer.run(events, &tx, &tracker).await;

        match &report.stream_error {
            Some(err) => interactions.fail(&tracked_id, err.to_string()),
            None => {
                if let Some(message) = report.last_tool_error() {
                    interactions.record_error(&tracked_id, message);
                }
                interactions.complete(&tracked_id);
            }
        }

        info!(
            interaction_id = %tracked_id,
            tool_calls = report.invocations.len(),
            failed = report.stream_error.is_some(),
            client_disconnected = report.client_disconnected,
            "chat stream finished"
        );
    });

    let body = Body::from_stream(stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<_, Infallible>(chunk), rx))
    }));

    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(&interaction_id) {
        headers.insert(INTERACTION_ID_HEADER, value);
    }
    response
}

pub(crate) async fn progress(
    State(state): State<AppState>,
    Path(interaction_id): Path<String>,
) -> Response {
    match state.context.interactions().progress(&interaction_id) {
        Some(progress) => (StatusCode::OK, Json(progress)).into_response(),
        None => not_found_response("Interaction not found"),
    }
}

fn parse_messages(raw: Option<Value>) -> Result<Vec<ChatMessage>, Response> {
    let Some(Value::Array(items)) = raw else {
        return Err(invalid_argument_response(
            "Messages array is required",
            &["messages"],
        ));
    };

    items
        .into_iter()
        .map(serde_json::from_value::<ChatMessage>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| {
            invalid_argument_response(
                "Each message needs a role of system, user or assistant and a string content",
                &["messages"],
            )
        })
}

fn gateway_error(err: LlmGatewayError) -> ServiceError {
    match err {
        LlmGatewayError::RateLimited => {
            warn!("llm provider rate limited the chat request");
            ServiceError::integration(
                "llm",
                "Rate limit exceeded, please retry shortly",
                Some(err.to_string()),
            )
        }
        other => ServiceError::integration("llm", "Model request failed", Some(other.to_string())),
    }
}
