//! Model gateway: the narrow interface to the generation model.

pub mod anthropic;
pub mod types;

use async_trait::async_trait;

use crate::errors::GatewayError;

pub use anthropic::AnthropicGateway;
pub use types::{
    ContentBlock, GenerateRequest, Message, ModelResponse, Role, ToolCall, ToolChoice,
    ToolDefinition,
};

/// `generate(system, messages, tools, temperature) -> {text, tool_calls}`.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<ModelResponse, GatewayError>;
}
