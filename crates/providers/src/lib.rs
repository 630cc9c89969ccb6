pub mod factory;
pub mod openai;

use async_trait::async_trait;
use demopilot_core::types::{ChatMessage, LLMResponse};
use demopilot_core::Result;
use serde_json::Value;

/// Chat backend used by the agent loop. `tools` carries the action schemas
/// in the `{"type": "function", ...}` envelope.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<LLMResponse>;
}

pub use factory::create_provider;
pub use openai::OpenAIProvider;
