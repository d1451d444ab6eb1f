//! LLM client capability — the trait the agent core calls, the wire chunk
//! types it consumes, an OpenAI-compatible HTTP adapter, and a scripted
//! client for tests.

pub mod client;
pub mod openai;
pub mod script;
mod sse;

pub use client::{
    BoxStream, FinishReason, LlmChunk, LlmClient, LlmRequest, LlmResponse, ToolCallFragment, Usage,
};
pub use openai::OpenAiCompatClient;
pub use script::ScriptedClient;
