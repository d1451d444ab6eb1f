//! Response parser — a stream transducer from LLM wire chunks to parser
//! events the run loop consumes.
//!
//! Tool-call fragments sharing an index accumulate until a subsequent
//! fragment changes index, the model reports a finish reason, or the
//! stream ends; only then is the call surfaced. Malformed argument JSON
//! and nameless calls terminate the stream with an error event.

use std::collections::BTreeMap;

use futures_util::StreamExt;

use sw_domain::error::Error;
use sw_domain::tool::ToolCall;
use sw_llm::{BoxStream, FinishReason, LlmChunk, LlmResponse, ToolCallFragment, Usage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events produced lazily while consuming one LLM response.
#[derive(Debug)]
pub enum ParserEvent {
    TextChunk {
        text: String,
    },
    /// A complete tool call with validated JSON arguments.
    ToolCallDetected {
        tool_call: ToolCall,
    },
    StreamEnd {
        finish_reason: Option<FinishReason>,
        usage: Option<Usage>,
    },
    /// Terminal: the consumer must stop after this.
    Error {
        error: Error,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Accumulation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
struct Accumulator {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl Accumulator {
    fn absorb(&mut self, frag: ToolCallFragment) {
        if frag.id.is_some() {
            self.id = frag.id;
        }
        if frag.name.is_some() {
            self.name = frag.name;
        }
        if let Some(args) = frag.arguments {
            self.arguments.push_str(&args);
        }
    }

    /// Validate and convert into a finished tool call.
    fn finish(self, index: usize) -> Result<ToolCall, Error> {
        let Some(name) = self.name else {
            return Err(Error::Validation(format!(
                "tool call at index {index} ended without a name"
            )));
        };
        // Some providers stream no argument bytes for zero-argument tools.
        let arguments = if self.arguments.trim().is_empty() {
            "{}".to_string()
        } else {
            self.arguments
        };
        if let Err(e) = serde_json::from_str::<serde_json::Value>(&arguments) {
            return Err(Error::Validation(format!(
                "tool call '{name}' has malformed JSON arguments: {e}"
            )));
        }
        Ok(ToolCall {
            id: self.id.unwrap_or_else(|| format!("call_{index}")),
            name,
            arguments,
        })
    }
}

/// Drain every open accumulator in index order.
fn finish_all(open: &mut BTreeMap<usize, Accumulator>) -> Result<Vec<ToolCall>, Error> {
    let mut calls = Vec::new();
    for (index, acc) in std::mem::take(open) {
        calls.push(acc.finish(index)?);
    }
    Ok(calls)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream transduction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Transduce a lazy chunk stream into parser events.
///
/// An `Error` event is always the last one produced; `StreamEnd` closes a
/// healthy stream.
pub fn parse_stream(
    mut chunks: BoxStream<'static, sw_domain::Result<LlmChunk>>,
) -> BoxStream<'static, ParserEvent> {
    let stream = async_stream::stream! {
        let mut open: BTreeMap<usize, Accumulator> = BTreeMap::new();
        let mut current_index: Option<usize> = None;
        let mut finish_reason: Option<FinishReason> = None;
        let mut usage: Option<Usage> = None;

        while let Some(item) = chunks.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(error) => {
                    yield ParserEvent::Error { error };
                    return;
                }
            };

            if let Some(text) = chunk.content {
                yield ParserEvent::TextChunk { text };
            }

            for frag in chunk.tool_calls {
                // An index change finalizes the previously open call.
                if let Some(prev) = current_index {
                    if prev != frag.index {
                        if let Some(acc) = open.remove(&prev) {
                            match acc.finish(prev) {
                                Ok(tool_call) => yield ParserEvent::ToolCallDetected { tool_call },
                                Err(error) => {
                                    yield ParserEvent::Error { error };
                                    return;
                                }
                            }
                        }
                    }
                }
                current_index = Some(frag.index);
                open.entry(frag.index).or_default().absorb(frag);
            }

            if let Some(reason) = chunk.finish_reason {
                finish_reason = Some(reason);
                match finish_all(&mut open) {
                    Ok(calls) => {
                        for tool_call in calls {
                            yield ParserEvent::ToolCallDetected { tool_call };
                        }
                    }
                    Err(error) => {
                        yield ParserEvent::Error { error };
                        return;
                    }
                }
            }

            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
        }

        // End of stream: finalize anything still open.
        match finish_all(&mut open) {
            Ok(calls) => {
                for tool_call in calls {
                    yield ParserEvent::ToolCallDetected { tool_call };
                }
            }
            Err(error) => {
                yield ParserEvent::Error { error };
                return;
            }
        }

        yield ParserEvent::StreamEnd { finish_reason, usage };
    };

    Box::pin(stream)
}

/// Decompose a non-streaming response into the same event sequence (text,
/// then detected tool calls, then stream end) so consumers need only one
/// code path.
pub fn parse_response(response: LlmResponse) -> Vec<ParserEvent> {
    let mut events = Vec::new();

    if !response.content.is_empty() {
        events.push(ParserEvent::TextChunk {
            text: response.content,
        });
    }

    for tool_call in response.tool_calls {
        let arguments = if tool_call.arguments.trim().is_empty() {
            "{}".to_string()
        } else {
            tool_call.arguments.clone()
        };
        if let Err(e) = serde_json::from_str::<serde_json::Value>(&arguments) {
            events.push(ParserEvent::Error {
                error: Error::Validation(format!(
                    "tool call '{}' has malformed JSON arguments: {e}",
                    tool_call.name
                )),
            });
            return events;
        }
        events.push(ParserEvent::ToolCallDetected {
            tool_call: ToolCall {
                arguments,
                ..tool_call
            },
        });
    }

    events.push(ParserEvent::StreamEnd {
        finish_reason: response.finish_reason,
        usage: response.usage,
    });
    events
}
