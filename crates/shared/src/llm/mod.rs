pub mod gateway;
pub mod openai;
pub mod prompts;

pub use gateway::{
    ChatMessage, ChatRole, LlmGateway, LlmGatewayError, LlmGatewayFuture, LlmGatewayRequest,
    ModelEvent, ModelEventStream, ToolDefinition,
};
pub use openai::{OpenAiChatGateway, OpenAiGatewayConfig};
pub use prompts::INVOICE_ASSISTANT_SYSTEM_PROMPT;
