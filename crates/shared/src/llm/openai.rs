use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::warn;

use super::gateway::{
    LlmGateway, LlmGatewayError, LlmGatewayFuture, LlmGatewayRequest, ModelEvent,
    ModelEventStream,
};
use crate::config::ConfigError;
use crate::config_env::{
    optional_trimmed_env, parse_u32_env, parse_u64_env, parse_url_env, require_non_empty_env,
};
use crate::coordinator::ToolCall;

const DEFAULT_CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_BASE_BACKOFF_MS: u64 = 250;
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone)]
pub struct OpenAiGatewayConfig {
    pub chat_completions_url: String,
    pub api_key: String,
    pub model: String,
    pub connect_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_backoff_ms: u64,
}

impl OpenAiGatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            chat_completions_url: parse_url_env(
                "LLM_CHAT_COMPLETIONS_URL",
                DEFAULT_CHAT_COMPLETIONS_URL,
            )?,
            api_key: require_non_empty_env("LLM_API_KEY")?,
            model: optional_trimmed_env("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            connect_timeout_ms: parse_u64_env("LLM_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS)?,
            max_retries: parse_u32_env("LLM_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            retry_base_backoff_ms: parse_u64_env(
                "LLM_RETRY_BASE_BACKOFF_MS",
                DEFAULT_RETRY_BASE_BACKOFF_MS,
            )?,
        })
    }
}

/// Streaming client for OpenAI-compatible chat completion endpoints.
///
/// Retries happen only before the response body starts; once tokens flow,
/// failures surface as stream errors.
#[derive(Clone)]
pub struct OpenAiChatGateway {
    client: reqwest::Client,
    config: OpenAiGatewayConfig,
}

impl OpenAiChatGateway {
    pub fn new(config: OpenAiGatewayConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .map_err(|err| {
                ConfigError::InvalidConfiguration(format!("failed to build llm http client: {err}"))
            })?;

        Ok(Self { client, config })
    }

    async fn open_stream(
        &self,
        request: &LlmGatewayRequest,
    ) -> Result<reqwest::Response, LlmGatewayError> {
        let body = request_body(&self.config.model, request);
        let mut attempt = 0_u32;

        loop {
            match self.send_once(&body).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if err.retryable && attempt < self.config.max_retries {
                        let backoff_multiplier = 2_u64.saturating_pow(attempt);
                        let backoff_ms = self
                            .config
                            .retry_base_backoff_ms
                            .saturating_mul(backoff_multiplier);
                        warn!(attempt, backoff_ms, error = %err.error, "retrying llm request");
                        sleep(Duration::from_millis(backoff_ms)).await;
                        attempt = attempt.saturating_add(1);
                        continue;
                    }

                    return Err(err.error);
                }
            }
        }
    }

    async fn send_once(&self, body: &Value) -> Result<reqwest::Response, SendAttemptError> {
        let response = self
            .client
            .post(&self.config.chat_completions_url)
            .bearer_auth(&self.config.api_key)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    SendAttemptError::retryable(LlmGatewayError::Timeout)
                } else {
                    SendAttemptError::retryable(LlmGatewayError::ProviderFailure(
                        "request_unavailable".to_string(),
                    ))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = if status == StatusCode::TOO_MANY_REQUESTS {
            LlmGatewayError::RateLimited
        } else {
            LlmGatewayError::ProviderFailure(format!(
                "status={} code={}",
                status.as_u16(),
                parse_provider_error_code(&body)
            ))
        };

        Err(SendAttemptError {
            error,
            retryable: is_retryable_status(status),
        })
    }
}

impl LlmGateway for OpenAiChatGateway {
    fn stream_chat<'a>(&'a self, request: LlmGatewayRequest) -> LlmGatewayFuture<'a> {
        Box::pin(async move {
            let response = self.open_stream(&request).await?;
            Ok(decode_event_stream(response.bytes_stream().eventsource().boxed()))
        })
    }
}

fn request_body(model: &str, request: &LlmGatewayRequest) -> Value {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    messages.push(json!({ "role": "system", "content": request.system_prompt }));
    messages.extend(
        request
            .messages
            .iter()
            .map(|message| json!({ "role": message.role, "content": message.content })),
    );

    let mut body = json!({
        "model": model,
        "stream": true,
        "messages": messages,
    });

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
        body["tool_choice"] = json!("auto");
    }

    body
}

type SseEvents = BoxStream<'static, Result<Event, EventStreamError<reqwest::Error>>>;

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl PartialToolCall {
    fn finish(self, index: usize) -> ToolCall {
        let raw = self.arguments.trim();
        let arguments = if raw.is_empty() {
            json!({})
        } else {
            // Malformed arguments are passed through as a string so schema
            // validation reports them as an in-band tool error.
            serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        };

        ToolCall {
            id: self.id.unwrap_or_else(|| format!("call_{index}")),
            name: self.name,
            arguments,
        }
    }
}

struct DecodeState {
    events: SseEvents,
    tool_calls: BTreeMap<usize, PartialToolCall>,
    queued: VecDeque<ModelEvent>,
    finished: bool,
}

impl DecodeState {
    fn absorb(&mut self, chunk: ChatCompletionChunk) {
        for choice in chunk.choices {
            let Some(delta) = choice.delta else {
                continue;
            };

            if let Some(content) = delta.content
                && !content.is_empty()
            {
                self.queued.push_back(ModelEvent::TextDelta(content));
            }

            for fragment in delta.tool_calls.unwrap_or_default() {
                let entry = self.tool_calls.entry(fragment.index).or_default();
                if let Some(id) = fragment.id {
                    entry.id = Some(id);
                }
                if let Some(function) = fragment.function {
                    if let Some(name) = function.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }
        }
    }

    fn flush_tool_calls(&mut self) {
        let tool_calls = std::mem::take(&mut self.tool_calls);
        self.queued.extend(
            tool_calls
                .into_iter()
                .filter(|(_, partial)| !partial.name.is_empty())
                .map(|(index, partial)| ModelEvent::ToolCall(partial.finish(index))),
        );
        self.finished = true;
    }
}

/// Turns raw SSE events into text deltas followed by completed tool calls.
fn decode_event_stream(events: SseEvents) -> ModelEventStream {
    let state = DecodeState {
        events,
        tool_calls: BTreeMap::new(),
        queued: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queued.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }

            match state.events.next().await {
                Some(Ok(event)) => {
                    let data = event.data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    if data == DONE_SENTINEL {
                        state.flush_tool_calls();
                        continue;
                    }

                    match serde_json::from_str::<ChatCompletionChunk>(data) {
                        Ok(chunk) if chunk.error.is_some() => {
                            state.finished = true;
                            let code = chunk
                                .error
                                .and_then(|error| error.code.or(error.message))
                                .map(|value| match value {
                                    Value::String(text) => text,
                                    other => other.to_string(),
                                })
                                .unwrap_or_else(|| "unknown".to_string());
                            return Some((
                                Err(LlmGatewayError::ProviderFailure(format!(
                                    "stream_error code={code}"
                                ))),
                                state,
                            ));
                        }
                        Ok(chunk) => state.absorb(chunk),
                        Err(_) => {
                            state.finished = true;
                            return Some((
                                Err(LlmGatewayError::InvalidProviderPayload(
                                    "chunk_json_parse_failed".to_string(),
                                )),
                                state,
                            ));
                        }
                    }
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(LlmGatewayError::ProviderFailure(err.to_string())), state));
                }
                None => state.flush_tool_calls(),
            }
        }
    }))
}

#[derive(Debug)]
struct SendAttemptError {
    error: LlmGatewayError,
    retryable: bool,
}

impl SendAttemptError {
    fn retryable(error: LlmGatewayError) -> Self {
        Self {
            error,
            retryable: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallFragment {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionFragment>,
}

#[derive(Debug, Deserialize)]
struct FunctionFragment {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    code: Option<Value>,
    message: Option<Value>,
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn parse_provider_error_code(body: &str) -> String {
    #[derive(Deserialize)]
    struct ProviderErrorEnvelope {
        error: Option<ProviderErrorDetails>,
    }

    #[derive(Deserialize)]
    struct ProviderErrorDetails {
        code: Option<Value>,
    }

    let parsed = serde_json::from_str::<ProviderErrorEnvelope>(body).ok();
    let Some(provider_error_code) = parsed
        .and_then(|envelope| envelope.error)
        .and_then(|details| details.code)
    else {
        return "unknown".to_string();
    };

    match provider_error_code {
        Value::String(code) => code,
        Value::Number(code) => code.to_string(),
        _ => "unknown".to_string(),
    }
}
