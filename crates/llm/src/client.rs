//! Provider-agnostic request/response/chunk types and the [`LlmClient`]
//! trait. Every adapter translates between these and its wire format.

use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sw_domain::message::Message;
use sw_domain::run::ToolChoice;
use sw_domain::tool::{ToolCall, ToolDefinition};
use sw_domain::Result;

/// A boxed async stream, used for streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    #[serde(other)]
    Unknown,
}

/// One fragment of a tool call inside a streamed chunk. Fragments sharing
/// an `index` belong to the same call; `arguments` carries a piece of the
/// JSON arguments string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// One chunk of a streamed response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallFragment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl LlmChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Self::default()
        }
    }
}

/// A complete (non-streaming) response.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
}

/// A provider-agnostic generation request.
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Provider-shaped tool definitions (the output of `format_tools`).
    pub tools: Vec<Value>,
    pub tool_choice: ToolChoice,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// The LLM capability consumed by the agent core.
///
/// Implementations must be safe for concurrent calls; a shared client
/// serves every run in the process.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Non-streaming generation.
    async fn generate(&self, req: LlmRequest) -> Result<LlmResponse>;

    /// Streaming generation: a lazy, finite, non-restartable chunk
    /// sequence.
    async fn generate_stream(&self, req: LlmRequest) -> Result<BoxStream<'static, Result<LlmChunk>>>;

    /// Project tool definitions into this provider's wire shape.
    fn format_tools(&self, definitions: &[ToolDefinition]) -> Vec<Value>;

    /// Count (or estimate) prompt tokens for a message list. Consumers
    /// must tolerate overcounting.
    fn count_tokens(&self, messages: &[Message], model: &str) -> Result<u32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_parses_known_and_unknown() {
        let r: FinishReason = serde_json::from_value(serde_json::json!("tool_calls")).unwrap();
        assert_eq!(r, FinishReason::ToolCalls);
        let r: FinishReason = serde_json::from_value(serde_json::json!("weird_reason")).unwrap();
        assert_eq!(r, FinishReason::Unknown);
    }

    #[test]
    fn chunk_deserializes_openai_delta_shape() {
        let chunk: LlmChunk = serde_json::from_value(serde_json::json!({
            "tool_calls": [
                { "index": 0, "id": "call_1", "type": "function", "name": "lookup", "arguments": "{\"q\":" }
            ]
        }))
        .unwrap();
        assert_eq!(chunk.tool_calls.len(), 1);
        assert_eq!(chunk.tool_calls[0].id.as_deref(), Some("call_1"));
        assert_eq!(chunk.tool_calls[0].arguments.as_deref(), Some("{\"q\":"));
    }
}
