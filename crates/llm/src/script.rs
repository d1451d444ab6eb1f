//! Scripted LLM client for tests.
//!
//! Replays pre-programmed chunk sequences in order, one script per
//! `generate`/`generate_stream` call, and records every request it
//! receives so tests can assert on the prompts the core actually built.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde_json::{json, Value};

use sw_domain::error::{Error, LlmErrorKind};
use sw_domain::message::Message;
use sw_domain::tool::{ToolCall, ToolDefinition};
use sw_domain::Result;

use crate::client::{BoxStream, FinishReason, LlmChunk, LlmClient, LlmRequest, LlmResponse};
use crate::openai::estimate_tokens;

/// One scripted model turn: the chunks a streaming call will yield, in
/// order. `Err` entries surface as stream errors.
pub type Script = Vec<Result<LlmChunk>>;

#[derive(Default)]
pub struct ScriptedClient {
    scripts: Mutex<VecDeque<Script>>,
    /// Overrides for `count_tokens`, consumed in order; falls back to the
    /// heuristic estimate when empty.
    token_counts: Mutex<VecDeque<u32>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a scripted turn.
    pub fn push_script(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }

    /// Queue a plain-text turn that streams `text` in one chunk and stops.
    pub fn push_text(&self, text: &str) {
        self.push_script(vec![
            Ok(LlmChunk::text(text)),
            Ok(LlmChunk::finish(FinishReason::Stop)),
        ]);
    }

    /// Queue a turn that emits one complete tool call and finishes with
    /// `tool_calls`.
    pub fn push_tool_call(&self, id: &str, name: &str, arguments: &str) {
        self.push_script(vec![
            Ok(LlmChunk {
                tool_calls: vec![crate::client::ToolCallFragment {
                    index: 0,
                    id: Some(id.into()),
                    kind: Some("function".into()),
                    name: Some(name.into()),
                    arguments: Some(arguments.into()),
                }],
                ..LlmChunk::default()
            }),
            Ok(LlmChunk::finish(FinishReason::ToolCalls)),
        ]);
    }

    /// Queue the next `count_tokens` result.
    pub fn push_token_count(&self, count: u32) {
        self.token_counts.lock().push_back(count);
    }

    /// Requests observed so far, oldest first.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining_scripts(&self) -> usize {
        self.scripts.lock().len()
    }

    fn next_script(&self) -> Result<Script> {
        self.scripts.lock().pop_front().ok_or_else(|| {
            Error::llm(
                LlmErrorKind::Other,
                "scripted client has no more queued turns",
            )
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedClient {
    async fn generate(&self, req: LlmRequest) -> Result<LlmResponse> {
        self.requests.lock().push(req);
        let script = self.next_script()?;

        // Aggregate the script the way a non-streaming provider would.
        let mut response = LlmResponse::default();
        let mut pending: Vec<(Option<String>, Option<String>, String)> = Vec::new();
        for entry in script {
            let chunk = entry?;
            if let Some(text) = chunk.content {
                response.content.push_str(&text);
            }
            for frag in chunk.tool_calls {
                while pending.len() <= frag.index {
                    pending.push((None, None, String::new()));
                }
                let slot = &mut pending[frag.index];
                if frag.id.is_some() {
                    slot.0 = frag.id;
                }
                if frag.name.is_some() {
                    slot.1 = frag.name;
                }
                if let Some(args) = frag.arguments {
                    slot.2.push_str(&args);
                }
            }
            if chunk.finish_reason.is_some() {
                response.finish_reason = chunk.finish_reason;
            }
            if chunk.usage.is_some() {
                response.usage = chunk.usage;
            }
        }
        for (i, (id, name, args)) in pending.into_iter().enumerate() {
            response.tool_calls.push(ToolCall {
                id: id.unwrap_or_else(|| format!("call_{i}")),
                name: name.unwrap_or_default(),
                arguments: args,
            });
        }
        Ok(response)
    }

    async fn generate_stream(
        &self,
        req: LlmRequest,
    ) -> Result<BoxStream<'static, Result<LlmChunk>>> {
        self.requests.lock().push(req);
        let script = self.next_script()?;
        Ok(Box::pin(script_stream(script)))
    }

    fn format_tools(&self, definitions: &[ToolDefinition]) -> Vec<Value> {
        definitions
            .iter()
            .map(|def| {
                json!({
                    "type": "function",
                    "function": {
                        "name": def.name,
                        "description": def.description,
                        "parameters": def.parameters_schema(),
                    },
                })
            })
            .collect()
    }

    fn count_tokens(&self, messages: &[Message], _model: &str) -> Result<u32> {
        if let Some(count) = self.token_counts.lock().pop_front() {
            return Ok(count);
        }
        Ok(estimate_tokens(messages))
    }
}

fn script_stream(script: Script) -> impl futures_core::Stream<Item = Result<LlmChunk>> {
    async_stream::stream! {
        for entry in script {
            yield entry;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use uuid::Uuid;

    #[tokio::test]
    async fn replays_scripts_in_order() {
        let client = ScriptedClient::new();
        client.push_text("one");
        client.push_text("two");

        let req = LlmRequest {
            model: "m".into(),
            messages: vec![Message::user(Uuid::new_v4(), "hi")],
            ..LlmRequest::default()
        };

        let first = client.generate(req.clone()).await.unwrap();
        assert_eq!(first.content, "one");
        let second = client.generate(req).await.unwrap();
        assert_eq!(second.content, "two");
        assert_eq!(client.requests().len(), 2);
    }

    #[tokio::test]
    async fn aggregates_tool_call_fragments() {
        let client = ScriptedClient::new();
        client.push_tool_call("call_1", "lookup", "{\"q\":\"x\"}");

        let resp = client
            .generate(LlmRequest {
                model: "m".into(),
                ..LlmRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "lookup");
        assert_eq!(resp.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[tokio::test]
    async fn stream_yields_chunks_lazily() {
        let client = ScriptedClient::new();
        client.push_text("hello");

        let mut stream = client
            .generate_stream(LlmRequest {
                model: "m".into(),
                ..LlmRequest::default()
            })
            .await
            .unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.content.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn exhausted_scripts_error() {
        let client = ScriptedClient::new();
        let err = client
            .generate(LlmRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "llm");
    }

    #[test]
    fn token_count_overrides_then_estimates() {
        let client = ScriptedClient::new();
        client.push_token_count(150);
        let msgs = vec![Message::user(Uuid::new_v4(), "hello")];
        assert_eq!(client.count_tokens(&msgs, "m").unwrap(), 150);
        assert!(client.count_tokens(&msgs, "m").unwrap() < 150);
    }
}
