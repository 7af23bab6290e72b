use std::future::Future;
use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::coordinator::ToolCall;

pub type ModelEventStream =
    Pin<Box<dyn Stream<Item = Result<ModelEvent, LlmGatewayError>> + Send + 'static>>;

pub type LlmGatewayFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ModelEventStream, LlmGatewayError>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Tool description offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct LlmGatewayRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// One item of a streamed generation. Text arrives incrementally; tool calls
/// arrive complete, after all text of the pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    TextDelta(String),
    ToolCall(ToolCall),
}

#[derive(Debug, Clone, Error)]
pub enum LlmGatewayError {
    #[error("llm provider request timed out")]
    Timeout,
    #[error("llm provider rate limit exceeded")]
    RateLimited,
    #[error("llm provider request failed: {0}")]
    ProviderFailure(String),
    #[error("llm provider returned an invalid payload: {0}")]
    InvalidProviderPayload(String),
}

pub trait LlmGateway: Send + Sync {
    /// Starts a generation. Errors before the first byte are returned here;
    /// errors after that are yielded by the stream.
    fn stream_chat<'a>(&'a self, request: LlmGatewayRequest) -> LlmGatewayFuture<'a>;
}
