//! OpenAI-compatible chat-completions adapter.
//!
//! Works against any endpoint speaking the `/chat/completions` dialect
//! (OpenAI, Azure-style gateways, vLLM, LiteLLM proxies). Streaming uses
//! SSE with `stream_options.include_usage` so the final frame carries
//! token usage.

use serde_json::{json, Value};

use sw_domain::error::{Error, LlmErrorKind};
use sw_domain::message::{Message, Role};
use sw_domain::run::ToolChoice;
use sw_domain::tool::{ToolCall, ToolDefinition};
use sw_domain::Result;

use crate::client::{
    BoxStream, FinishReason, LlmChunk, LlmClient, LlmRequest, LlmResponse, ToolCallFragment, Usage,
};
use crate::sse::sse_chunk_stream;

pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    // ── Request construction ──────────────────────────────────────

    fn build_body(&self, req: &LlmRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(wire_message).collect();

        let mut body = json!({
            "model": req.model,
            "messages": messages,
        });

        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.clone());
            body["tool_choice"] = wire_tool_choice(&req.tool_choice);
        }
        if let Some(t) = req.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = req.max_tokens {
            body["max_tokens"] = json!(m);
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }

        body
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut rb = self.http.post(self.chat_url()).json(body);
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }
        rb
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let kind = match status.as_u16() {
            401 | 403 => LlmErrorKind::Authentication,
            429 => LlmErrorKind::RateLimit,
            400..=499 => LlmErrorKind::InvalidRequest,
            _ => LlmErrorKind::Other,
        };
        tracing::warn!(status = status.as_u16(), "chat completion request rejected");
        Err(Error::llm(kind, format!("{status}: {text}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire conversion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn wire_message(msg: &Message) -> Value {
    match msg.role {
        Role::System => json!({ "role": "system", "content": msg.content }),
        Role::User => json!({ "role": "user", "content": msg.content }),
        Role::Assistant => {
            let mut v = json!({ "role": "assistant", "content": msg.content });
            if !msg.metadata.tool_calls.is_empty() {
                let calls: Vec<Value> = msg
                    .metadata
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": { "name": tc.name, "arguments": tc.arguments },
                        })
                    })
                    .collect();
                v["tool_calls"] = Value::Array(calls);
            }
            v
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.metadata.tool_call_id.as_deref().unwrap_or(""),
            "content": msg.content,
        }),
    }
}

fn wire_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Force(name) => json!({
            "type": "function",
            "function": { "name": name },
        }),
    }
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

fn parse_finish_reason(raw: &str) -> FinishReason {
    match raw {
        "stop" => FinishReason::Stop,
        "tool_calls" => FinishReason::ToolCalls,
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE frame parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse one `data:` payload into chunks. `[DONE]` closes the stream and
/// produces nothing; usage-only frames (from `include_usage`) become a
/// bare usage chunk.
fn parse_sse_data(data: &str) -> Vec<Result<LlmChunk>> {
    if data.trim() == "[DONE]" {
        return Vec::new();
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    let Some(choice) = choice else {
        if let Some(usage) = v.get("usage").and_then(parse_usage) {
            return vec![Ok(LlmChunk {
                usage: Some(usage),
                ..LlmChunk::default()
            })];
        }
        return Vec::new();
    };

    let delta = choice.get("delta").unwrap_or(&Value::Null);
    let mut chunk = LlmChunk {
        role: delta
            .get("role")
            .and_then(|r| r.as_str())
            .map(str::to_string),
        content: delta
            .get("content")
            .and_then(|c| c.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        ..LlmChunk::default()
    };

    if let Some(tc_arr) = delta.get("tool_calls").and_then(|t| t.as_array()) {
        for tc in tc_arr {
            let function = tc.get("function").unwrap_or(&Value::Null);
            chunk.tool_calls.push(ToolCallFragment {
                index: tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize,
                id: tc.get("id").and_then(|i| i.as_str()).map(str::to_string),
                kind: tc.get("type").and_then(|t| t.as_str()).map(str::to_string),
                name: function
                    .get("name")
                    .and_then(|n| n.as_str())
                    .map(str::to_string),
                arguments: function
                    .get("arguments")
                    .and_then(|a| a.as_str())
                    .map(str::to_string),
            });
        }
    }

    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        chunk.finish_reason = Some(parse_finish_reason(fr));
    }
    chunk.usage = v.get("usage").and_then(parse_usage);

    if chunk.role.is_none()
        && chunk.content.is_none()
        && chunk.tool_calls.is_empty()
        && chunk.finish_reason.is_none()
        && chunk.usage.is_none()
    {
        return Vec::new();
    }
    vec![Ok(chunk)]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn generate(&self, req: LlmRequest) -> Result<LlmResponse> {
        let body = self.build_body(&req, false);
        let response = self
            .request(&body)
            .send()
            .await
            .map_err(|e| Error::llm(LlmErrorKind::Network, e.to_string()))?;
        let response = Self::check_status(response).await?;
        let v: Value = response
            .json()
            .await
            .map_err(|e| Error::llm(LlmErrorKind::Other, e.to_string()))?;

        let choice = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .ok_or_else(|| Error::llm(LlmErrorKind::Other, "response has no choices"))?;
        let message = choice.get("message").unwrap_or(&Value::Null);

        let tool_calls = message
            .get("tool_calls")
            .and_then(|t| t.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|tc| {
                        let function = tc.get("function")?;
                        Some(ToolCall {
                            id: tc.get("id")?.as_str()?.to_string(),
                            name: function.get("name")?.as_str()?.to_string(),
                            arguments: function
                                .get("arguments")
                                .and_then(|a| a.as_str())
                                .unwrap_or("{}")
                                .to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content: message
                .get("content")
                .and_then(|c| c.as_str())
                .unwrap_or("")
                .to_string(),
            tool_calls,
            finish_reason: choice
                .get("finish_reason")
                .and_then(|f| f.as_str())
                .map(parse_finish_reason),
            usage: v.get("usage").and_then(parse_usage),
        })
    }

    async fn generate_stream(
        &self,
        req: LlmRequest,
    ) -> Result<BoxStream<'static, Result<LlmChunk>>> {
        let body = self.build_body(&req, true);
        let response = self
            .request(&body)
            .send()
            .await
            .map_err(|e| Error::llm(LlmErrorKind::Network, e.to_string()))?;
        let response = Self::check_status(response).await?;
        Ok(sse_chunk_stream(response, parse_sse_data))
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
        Ok(estimate_tokens(messages))
    }
}

/// Rough token estimate: ~4 chars per token plus per-message framing
/// overhead. Deliberately biased high; the context manager tolerates
/// overcounting.
pub fn estimate_tokens(messages: &[Message]) -> u32 {
    let mut total: u32 = 8;
    for msg in messages {
        let mut chars = msg.content.chars().count();
        for tc in &msg.metadata.tool_calls {
            chars += tc.name.chars().count() + tc.arguments.chars().count();
        }
        total += (chars as u32).div_ceil(4) + 6;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn thread() -> Uuid {
        Uuid::new_v4()
    }

    #[test]
    fn body_includes_tools_and_choice() {
        let client = OpenAiCompatClient::new("http://localhost:9999/v1", None);
        let req = LlmRequest {
            model: "test-model".into(),
            messages: vec![Message::user(thread(), "hi")],
            tools: vec![json!({ "type": "function", "function": { "name": "t" } })],
            tool_choice: ToolChoice::Force("t".into()),
            temperature: Some(0.2),
            max_tokens: Some(100),
        };
        let body = client.build_body(&req, true);
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["tool_choice"]["function"]["name"], "t");
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn body_omits_tool_choice_without_tools() {
        let client = OpenAiCompatClient::new("http://localhost:9999/v1", None);
        let req = LlmRequest {
            model: "m".into(),
            messages: vec![Message::user(thread(), "hi")],
            ..LlmRequest::default()
        };
        let body = client.build_body(&req, false);
        assert!(body.get("tool_choice").is_none());
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn assistant_message_carries_tool_calls_on_wire() {
        let msg = Message::assistant(thread(), "").with_tool_calls(vec![ToolCall {
            id: "call_1".into(),
            name: "lookup".into(),
            arguments: "{\"q\":1}".into(),
        }]);
        let v = wire_message(&msg);
        assert_eq!(v["tool_calls"][0]["function"]["name"], "lookup");
        assert_eq!(v["tool_calls"][0]["function"]["arguments"], "{\"q\":1}");
    }

    #[test]
    fn tool_message_carries_call_id() {
        let msg = Message::tool_result(thread(), "call_9", "lookup", "result");
        let v = wire_message(&msg);
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "call_9");
    }

    #[test]
    fn sse_text_delta() {
        let chunks =
            parse_sse_data(r#"{"choices":[{"delta":{"content":"Hello"},"index":0}]}"#);
        assert_eq!(chunks.len(), 1);
        let chunk = chunks[0].as_ref().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn sse_tool_call_fragments() {
        let start = parse_sse_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"lookup","arguments":""}}]}}]}"#,
        );
        let frag = &start[0].as_ref().unwrap().tool_calls[0];
        assert_eq!(frag.id.as_deref(), Some("call_1"));
        assert_eq!(frag.name.as_deref(), Some("lookup"));

        let delta = parse_sse_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"q\":\"x\"}"}}]}}]}"#,
        );
        let frag = &delta[0].as_ref().unwrap().tool_calls[0];
        assert!(frag.id.is_none());
        assert_eq!(frag.arguments.as_deref(), Some("{\"q\":\"x\"}"));
    }

    #[test]
    fn sse_finish_and_usage_frames() {
        let finish = parse_sse_data(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#);
        assert_eq!(
            finish[0].as_ref().unwrap().finish_reason,
            Some(FinishReason::ToolCalls)
        );

        let usage = parse_sse_data(
            r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
        );
        assert_eq!(usage[0].as_ref().unwrap().usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn sse_done_sentinel_is_silent() {
        assert!(parse_sse_data("[DONE]").is_empty());
    }

    #[test]
    fn sse_bad_json_is_an_error() {
        let chunks = parse_sse_data("{not json");
        assert!(chunks[0].is_err());
    }

    #[test]
    fn estimate_grows_with_content() {
        let t = thread();
        let small = estimate_tokens(&[Message::user(t, "hi")]);
        let large = estimate_tokens(&[Message::user(t, "hi ".repeat(500))]);
        assert!(large > small);
    }
}
