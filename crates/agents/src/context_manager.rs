//! Context manager — assembles the message list for one LLM turn and keeps
//! it inside the token budget via summarization and tail-truncation.
//!
//! The system prompt and the current-cycle messages are never dropped or
//! summarized; everything else is fair game, oldest first.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use sw_domain::error::Error;
use sw_domain::message::{Message, Role};
use sw_domain::run::ContextConfig;
use sw_domain::Result;
use sw_llm::{LlmClient, LlmRequest};
use sw_stores::{MessageStore, SortOrder};

/// Below this many candidate messages, summarization is not worth an LLM
/// call and truncation handles overflow directly.
const MIN_SUMMARIZABLE_MESSAGES: usize = 3;

pub struct ContextManager {
    llm: Arc<dyn LlmClient>,
    messages: Arc<dyn MessageStore>,
    config: ContextConfig,
    model: String,
}

impl ContextManager {
    /// Rejects budgets where the threshold cannot hold a summary plus
    /// reserve.
    pub fn new(
        llm: Arc<dyn LlmClient>,
        messages: Arc<dyn MessageStore>,
        config: ContextConfig,
        model: impl Into<String>,
    ) -> Result<Self> {
        if config.token_threshold <= config.summary_target_tokens + config.reserved_tokens {
            return Err(Error::Configuration(format!(
                "token_threshold ({}) must exceed summary_target_tokens ({}) + reserved_tokens ({})",
                config.token_threshold, config.summary_target_tokens, config.reserved_tokens
            )));
        }
        Ok(Self {
            llm,
            messages,
            config,
            model: model.into(),
        })
    }

    /// Produce `[system, summary?, history_after_summary, current_cycle]`,
    /// shrunk to the token budget.
    pub async fn prepare(
        &self,
        thread_id: Uuid,
        system: Message,
        current_cycle: &[Message],
    ) -> Result<Vec<Message>> {
        // 1. Recent history, newest-first window reversed to chronological.
        let mut history = self
            .messages
            .get_messages(thread_id, Some(self.config.history_limit), SortOrder::Descending)
            .await?;
        history.reverse();

        // Current-cycle messages may already be persisted; history must not
        // repeat them.
        let cycle_ids: HashSet<Uuid> = current_cycle.iter().map(|m| m.id).collect();
        history.retain(|m| !cycle_ids.contains(&m.id));

        // 2. Preserve the latest summary and drop everything older.
        let (summary, after_summary) = split_at_last_summary(history);

        let mut assembled = assemble(&system, summary.as_ref(), &after_summary, current_cycle);
        let mut count = self.llm.count_tokens(&assembled, &self.model)?;
        if count <= self.config.token_threshold {
            return Ok(assembled);
        }

        // 3. Summarize the old prefix, keeping the newest turns verbatim.
        // Histories too small to justify an LLM call are returned as
        // assembled; the budget tolerates overcounting.
        let keep = self.config.keep_recent_messages.min(after_summary.len());
        let split = after_summary.len() - keep;
        let (to_summarize, kept) = after_summary.split_at(split);
        if to_summarize.len() < MIN_SUMMARIZABLE_MESSAGES {
            return Ok(assembled);
        }

        match self.summarize(thread_id, to_summarize).await {
            Ok(summary_msg) => {
                // Persist so later turns reuse the condensation instead of
                // re-summarizing.
                if let Err(e) = self.messages.add_message(summary_msg.clone()).await {
                    tracing::warn!(error = %e, "failed to persist summary message");
                }

                let mut preserved: Vec<Message> = Vec::new();
                if let Some(old) = &summary {
                    preserved.push(old.clone());
                }
                preserved.push(summary_msg);
                preserved.extend_from_slice(kept);

                assembled = assemble_flat(&system, &preserved, current_cycle);
                count = self.llm.count_tokens(&assembled, &self.model)?;
                if count <= self.config.token_threshold {
                    return Ok(assembled);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "summarization failed, falling back to truncation");
            }
        }

        // 4. Tail-truncation: drop the oldest droppable message until the
        // budget (minus reserve) holds.
        let budget = self
            .config
            .token_threshold
            .saturating_sub(self.config.reserved_tokens);
        while count > budget {
            let Some(pos) = assembled.iter().position(|m| {
                !cycle_ids.contains(&m.id) && !m.is_summary() && m.role != Role::System
            }) else {
                break;
            };
            assembled.remove(pos);
            count = self.llm.count_tokens(&assembled, &self.model)?;
        }

        Ok(assembled)
    }

    async fn summarize(&self, thread_id: Uuid, to_summarize: &[Message]) -> Result<Message> {
        let conversation = conversation_text(to_summarize);
        let prompt = format!(
            "You are a conversation summarizer. Condense the following \
             conversation history into a concise summary that preserves:\n\
             1. The current goal being worked on\n\
             2. Key decisions and results from tool calls\n\
             3. Open questions or unfinished threads\n\
             4. Important facts learned about the user or task\n\n\
             Be concise but keep all actionable context. Write in present \
             tense. Omit greetings.\n\nCONVERSATION:\n{conversation}"
        );

        let request = LlmRequest {
            model: self.model.clone(),
            messages: vec![Message::user(thread_id, prompt)],
            temperature: Some(0.1),
            max_tokens: Some(self.config.summary_target_tokens),
            ..LlmRequest::default()
        };

        let response = self.llm.generate(request).await?;
        tracing::info!(
            thread_id = %thread_id,
            summarized = to_summarize.len(),
            summary_len = response.content.len(),
            "history condensed"
        );
        Ok(Message::summary(thread_id, response.content))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Split chronological history at its last summary message: the summary is
/// preserved, everything before it is dropped.
fn split_at_last_summary(history: Vec<Message>) -> (Option<Message>, Vec<Message>) {
    let Some(idx) = history.iter().rposition(Message::is_summary) else {
        return (None, history);
    };
    let after = history[idx + 1..].to_vec();
    let summary = history.into_iter().nth(idx);
    (summary, after)
}

fn assemble(
    system: &Message,
    summary: Option<&Message>,
    history: &[Message],
    current_cycle: &[Message],
) -> Vec<Message> {
    let mut out = Vec::with_capacity(2 + history.len() + current_cycle.len());
    out.push(system.clone());
    if let Some(s) = summary {
        out.push(s.clone());
    }
    out.extend_from_slice(history);
    out.extend_from_slice(current_cycle);
    out
}

fn assemble_flat(system: &Message, middle: &[Message], current_cycle: &[Message]) -> Vec<Message> {
    let mut out = Vec::with_capacity(1 + middle.len() + current_cycle.len());
    out.push(system.clone());
    out.extend_from_slice(middle);
    out.extend_from_slice(current_cycle);
    out
}

fn conversation_text(messages: &[Message]) -> String {
    let mut buf = String::new();
    for msg in messages {
        let label = match msg.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
            Role::System => "System",
        };
        buf.push_str(label);
        buf.push_str(": ");
        // Long tool results get clipped so the condensation prompt stays
        // manageable.
        if msg.content.len() > 2000 {
            let mut head_end = 1000;
            while !msg.content.is_char_boundary(head_end) {
                head_end -= 1;
            }
            let mut tail_start = msg.content.len() - 500;
            while !msg.content.is_char_boundary(tail_start) {
                tail_start += 1;
            }
            buf.push_str(&msg.content[..head_end]);
            buf.push_str(" [...] ");
            buf.push_str(&msg.content[tail_start..]);
        } else {
            buf.push_str(&msg.content);
        }
        buf.push('\n');
    }
    buf
}
