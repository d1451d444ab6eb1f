//! The run loop — a cooperative scheduler driving one run.
//!
//! Entry point: [`BaseAgent::run`] spawns the async loop and returns a
//! channel of ordered [`AgentEvent`]s. Each iteration persists the cycle's
//! input messages, assembles the prompt, streams one LLM response through
//! the parser, and either executes the requested tools and loops, pauses
//! at `requires_action`, or terminates.
//!
//! Cancellation is cooperative: the run's stop signal is honored at loop
//! top, between parser events, and between tool-execution batches. A
//! partial assistant message observed by cancellation is never marked
//! completed.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use sw_domain::error::{Error, LlmErrorKind};
use sw_domain::event::{
    AgentEvent, EventData, MessageDelta, RequiredAction, RequiredActionKind, RunError,
};
use sw_domain::message::{Message, Role};
use sw_domain::run::{Run, RunStatus, RunUsage};
use sw_domain::tool::{ToolCall, ToolDefinition};
use sw_domain::Result;
use sw_llm::{FinishReason, LlmRequest};
use sw_stores::{RunPatch, SortOrder};

use crate::context::{Agent, AgentContext, RunHandle, ToolOutput};
use crate::context_manager::ContextManager;
use crate::executor::ToolExecutor;
use crate::interrupt::{InterruptHub, StopSignal};
use crate::parser::{self, ParserEvent};

/// Extra loop iterations tolerated beyond the continuation budget before
/// the safety guard trips.
const SAFETY_BUFFER: u32 = 5;

/// Event channel capacity; the loop blocks here when the subscriber lags.
const EVENT_BUFFER: usize = 64;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Use the available tools when they help you \
     answer; otherwise answer directly.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BaseAgent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The general-purpose agent. Planner and worker agents reuse this loop
/// with different environments, not different code.
pub struct BaseAgent {
    interrupts: Arc<InterruptHub>,
    agent_type: String,
    /// Set on worker agents: the run that delegated to them, so
    /// interrupting the parent cascades here.
    parent_run: Option<Uuid>,
}

impl BaseAgent {
    pub fn new() -> Self {
        Self::with_interrupts(Arc::new(InterruptHub::new()))
    }

    /// Share an interruption hub across agents so planner→worker chains
    /// cascade.
    pub fn with_interrupts(interrupts: Arc<InterruptHub>) -> Self {
        Self {
            interrupts,
            agent_type: "base".into(),
            parent_run: None,
        }
    }

    pub fn with_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = agent_type.into();
        self
    }

    /// Link every run of this agent under a delegating run.
    pub fn with_parent_run(mut self, parent_run: Uuid) -> Self {
        self.parent_run = Some(parent_run);
        self
    }

    pub fn interrupts(&self) -> Arc<InterruptHub> {
        self.interrupts.clone()
    }

    fn spawn_loop(
        &self,
        ctx: AgentContext,
        run_id: Uuid,
        thread_id: Uuid,
        current_cycle: Vec<Message>,
        resumed: bool,
    ) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let stop = self.interrupts.enroll(run_id, self.parent_run);
        let interrupts = self.interrupts.clone();

        let span = tracing::info_span!("run", %run_id, %thread_id, agent = %self.agent_type);
        tokio::spawn(
            async move {
                let run_loop = RunLoop {
                    ctx,
                    run_id,
                    thread_id,
                    tx,
                    stop,
                };
                run_loop.drive(current_cycle, resumed).await;
                interrupts.retire(run_id);
            }
            .instrument(span),
        );

        rx
    }
}

impl Default for BaseAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Agent for BaseAgent {
    async fn run(
        &self,
        ctx: AgentContext,
        thread_id: Uuid,
        messages: Vec<Message>,
    ) -> Result<RunHandle> {
        ctx.config.validate()?;

        let mut run = Run::new(thread_id, self.agent_type.clone(), (*ctx.config).clone());
        run.input_preview = messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| truncate_preview(&m.content, 200));
        let run_id = run.id;
        ctx.runs.create_run(run).await?;

        let events = self.spawn_loop(ctx, run_id, thread_id, messages, false);
        Ok(RunHandle { run_id, events })
    }

    async fn submit_tool_outputs(
        &self,
        ctx: AgentContext,
        run_id: Uuid,
        outputs: Vec<ToolOutput>,
    ) -> Result<RunHandle> {
        let run = ctx
            .runs
            .get_run(run_id)
            .await?
            .ok_or_else(|| Error::InvalidState(format!("run {run_id} not found")))?;
        if run.status != RunStatus::RequiresAction {
            return Err(Error::InvalidState(format!(
                "run {run_id} is {:?}, not requires_action",
                run.status
            )));
        }

        // Resolve tool names from the persisted assistant message that
        // requested the calls.
        let recent = ctx
            .messages
            .get_messages(run.thread_id, Some(50), SortOrder::Descending)
            .await?;
        let resolve_name = |call_id: &str| {
            recent.iter().find_map(|m| {
                m.metadata
                    .tool_calls
                    .iter()
                    .find(|tc| tc.id == call_id)
                    .map(|tc| tc.name.clone())
            })
        };

        let messages: Vec<Message> = outputs
            .into_iter()
            .map(|o| {
                let name = o
                    .tool_name
                    .clone()
                    .or_else(|| resolve_name(&o.tool_call_id))
                    .unwrap_or_else(|| "unknown".into());
                Message::tool_result(run.thread_id, o.tool_call_id, name, o.output)
            })
            .collect();
        if messages.is_empty() {
            return Err(Error::Validation("no tool outputs submitted".into()));
        }

        ctx.runs
            .update_run(run_id, RunPatch::status(RunStatus::InProgress))
            .await?;

        let events = self.spawn_loop(ctx, run_id, run.thread_id, messages, true);
        Ok(RunHandle { run_id, events })
    }

    fn cancel(&self, run_id: Uuid) -> bool {
        self.interrupts.interrupt(run_id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RunLoop — per-run state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct RunLoop {
    ctx: AgentContext,
    run_id: Uuid,
    thread_id: Uuid,
    tx: mpsc::Sender<AgentEvent>,
    stop: StopSignal,
}

/// Non-error loop outcomes; failures travel as `Err`.
enum Outcome {
    Completed,
    Cancelled,
    Paused,
}

impl RunLoop {
    async fn emit(&self, data: EventData) {
        let event = AgentEvent::new(self.run_id, self.thread_id, data);
        let _ = self.tx.send(event).await;
    }

    async fn drive(&self, current_cycle: Vec<Message>, resumed: bool) {
        match self.drive_inner(current_cycle, resumed).await {
            Ok(_) => {}
            Err(err) => self.fail(err).await,
        }
    }

    async fn drive_inner(&self, mut current_cycle: Vec<Message>, resumed: bool) -> Result<Outcome> {
        let config = self.ctx.config.clone();

        if resumed {
            self.emit(EventData::RunStatusChanged {
                current_status: RunStatus::InProgress,
                details: Some("resumed with submitted tool outputs".into()),
            })
            .await;
        } else {
            if let Some(user) = current_cycle.iter().find(|m| m.role == Role::User) {
                self.emit(EventData::RunCreated {
                    message: user.clone(),
                })
                .await;
            }
            // The queued→in_progress move is implied by `run.created`; only
            // intermediate transitions are emitted as status changes.
            self.ctx
                .runs
                .update_run(self.run_id, RunPatch::status(RunStatus::InProgress))
                .await?;
        }

        let context_manager = ContextManager::new(
            self.ctx.llm.clone(),
            self.ctx.messages.clone(),
            config.context,
            config.model.clone(),
        )?;

        let mut turn: u32 = 0;
        let mut total_usage = RunUsage::default();

        loop {
            // 1. Cancellation check at loop top.
            if self.stop.is_raised() {
                return self.cancelled().await;
            }

            // 2. Iteration guard.
            turn += 1;
            if turn > config.max_tool_call_continuations + SAFETY_BUFFER {
                return Err(Error::IterationLimitExceeded(turn));
            }

            // One step = one LLM turn.
            let step_id = Uuid::new_v4();
            self.emit(EventData::StepCreated {
                step_id,
                details: format!("turn {turn}"),
            })
            .await;

            // 3. Persist this cycle's input messages.
            for msg in &mut current_cycle {
                msg.metadata.run_id = Some(self.run_id);
                self.ctx.messages.add_message(msg.clone()).await?;
                self.emit(EventData::MessageCreated {
                    message: msg.clone(),
                })
                .await;
            }

            // 4. Assemble the prompt under the token budget.
            let system = Message::system(
                self.thread_id,
                config
                    .system_prompt
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
            );
            let prompt = context_manager
                .prepare(self.thread_id, system, &current_cycle)
                .await?;

            // 5. Project tools into the provider shape.
            self.ctx.tool_provider.ensure_initialized().await?;
            let definitions: Vec<ToolDefinition> = self
                .ctx
                .tool_provider
                .tools()
                .iter()
                .map(|t| t.definition())
                .collect();
            let formatted = self.ctx.llm.format_tools(&definitions);
            let tool_choice = if formatted.is_empty() {
                sw_domain::run::ToolChoice::None
            } else {
                config.tool_choice.clone()
            };

            // 6. Call the LLM (streaming).
            let request = LlmRequest {
                model: config.model.clone(),
                messages: prompt,
                tools: formatted,
                tool_choice,
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            };
            let stream = self.ctx.llm.generate_stream(request).await?;

            // 7. Assistant shell, completed only when the stream survives.
            let mut assistant =
                Message::assistant(self.thread_id, "").with_run(self.run_id, Some(step_id));
            assistant.metadata.in_progress = true;
            self.emit(EventData::MessageCreated {
                message: assistant.clone(),
            })
            .await;

            // 8. Drive the parser.
            let mut events = parser::parse_stream(stream);
            let mut content = String::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();
            let mut finish: Option<FinishReason> = None;
            let mut cancelled_mid_stream = false;

            while let Some(event) = events.next().await {
                if self.stop.is_raised() {
                    cancelled_mid_stream = true;
                    break;
                }
                match event {
                    ParserEvent::TextChunk { text } => {
                        content.push_str(&text);
                        self.emit(EventData::MessageDelta {
                            message_id: assistant.id,
                            delta: MessageDelta {
                                content_chunk: Some(text),
                                tool_calls_chunk: None,
                            },
                        })
                        .await;
                    }
                    ParserEvent::ToolCallDetected { tool_call } => {
                        self.emit(EventData::ToolCallCreated {
                            step_id,
                            tool_call: tool_call.clone(),
                        })
                        .await;
                        self.emit(EventData::ToolCallCompletedByLlm {
                            step_id,
                            tool_call: tool_call.clone(),
                        })
                        .await;
                        self.emit(EventData::MessageDelta {
                            message_id: assistant.id,
                            delta: MessageDelta {
                                content_chunk: None,
                                tool_calls_chunk: Some(vec![tool_call.clone()]),
                            },
                        })
                        .await;
                        tool_calls.push(tool_call);
                    }
                    ParserEvent::StreamEnd {
                        finish_reason,
                        usage,
                    } => {
                        finish = finish_reason;
                        if let Some(u) = usage {
                            total_usage.add(RunUsage {
                                prompt_tokens: u.prompt_tokens,
                                completion_tokens: u.completion_tokens,
                                total_tokens: u.total_tokens,
                            });
                        }
                    }
                    ParserEvent::Error { error } => return Err(error),
                }
            }

            if cancelled_mid_stream {
                return self.cancelled().await;
            }

            // 9. Persist the finished assistant message.
            assistant.content = content.clone();
            assistant.metadata.in_progress = false;
            assistant.metadata.tool_calls = tool_calls.clone();
            self.ctx.messages.add_message(assistant.clone()).await?;
            self.emit(EventData::MessageCompleted {
                message: assistant.clone(),
            })
            .await;

            // 10. Branch on the finish reason.
            if matches!(finish, Some(FinishReason::ToolCalls)) && !tool_calls.is_empty() {
                if turn >= config.max_tool_call_continuations {
                    // Continuation budget exhausted: pause instead of
                    // executing.
                    self.ctx
                        .runs
                        .update_run(
                            self.run_id,
                            RunPatch {
                                status: Some(RunStatus::RequiresAction),
                                usage: Some(total_usage),
                                ..RunPatch::default()
                            },
                        )
                        .await?;
                    self.emit(EventData::RunRequiresAction {
                        required_action: RequiredAction {
                            kind: RequiredActionKind::SubmitToolOutputs,
                            tool_calls,
                        },
                    })
                    .await;
                    return Ok(Outcome::Paused);
                }

                self.emit(EventData::RunRequiresAction {
                    required_action: RequiredAction {
                        kind: RequiredActionKind::SubmitToolOutputs,
                        tool_calls: tool_calls.clone(),
                    },
                })
                .await;

                if self.stop.is_raised() {
                    return self.cancelled().await;
                }

                current_cycle = self.execute_tools(step_id, &tool_calls).await?;
                self.emit(EventData::RunStatusChanged {
                    current_status: RunStatus::InProgress,
                    details: Some("continuing after tool execution".into()),
                })
                .await;
                continue;
            }

            return match finish {
                None | Some(FinishReason::Stop) => {
                    self.ctx
                        .runs
                        .update_run(
                            self.run_id,
                            RunPatch {
                                status: Some(RunStatus::Completed),
                                usage: Some(total_usage),
                                output_preview: Some(truncate_preview(&content, 200)),
                                ..RunPatch::default()
                            },
                        )
                        .await?;
                    self.emit(EventData::RunCompleted {
                        final_messages: vec![assistant],
                    })
                    .await;
                    Ok(Outcome::Completed)
                }
                Some(other) => Err(Error::llm(
                    LlmErrorKind::FinishReason,
                    format!("model stopped with reason {other:?}"),
                )),
            };
        }
    }

    /// Execute one cycle's batch and convert the outcomes into the next
    /// cycle's tool-role messages.
    async fn execute_tools(&self, step_id: Uuid, tool_calls: &[ToolCall]) -> Result<Vec<Message>> {
        let executor = ToolExecutor::new(
            self.ctx.tool_provider.clone(),
            self.ctx.config.executor.strategy,
            self.ctx.tool_context(self.run_id, self.thread_id),
        );
        let outcomes = executor.execute(tool_calls).await;

        let mut next_cycle = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            self.emit(EventData::ToolExecutionStarted {
                step_id,
                tool_call_id: outcome.tool_call_id.clone(),
                tool_name: outcome.tool_name.clone(),
                input: outcome.input.clone(),
            })
            .await;
            self.emit(EventData::ToolExecutionCompleted {
                step_id,
                tool_call_id: outcome.tool_call_id.clone(),
                tool_name: outcome.tool_name.clone(),
                result: outcome.result.clone(),
            })
            .await;

            // Delegation results carry the sub-run identity in metadata.
            if let (Some(sub_run), Some(specialist)) = (
                outcome
                    .result
                    .metadata_value("sub_agent_run_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok()),
                outcome
                    .result
                    .metadata_value("specialist_id")
                    .and_then(|v| v.as_str()),
            ) {
                self.emit(EventData::SubAgentInvocationCompleted {
                    planner_step_id: step_id,
                    tool_call_id: outcome.tool_call_id.clone(),
                    specialist_id: specialist.to_string(),
                    sub_agent_run_id: sub_run,
                    result: outcome.result.clone(),
                })
                .await;
            }

            // A failure with neither error text nor data gives the model
            // nothing to react to; such an outcome contributes no message.
            let content = if outcome.result.success {
                Some(
                    serde_json::to_string(&outcome.result.data)
                        .unwrap_or_else(|_| outcome.result.data.to_string()),
                )
            } else if let Some(error) = &outcome.result.error {
                Some(format!("Error: {error}"))
            } else if !outcome.result.data.is_null() {
                Some(format!("Error: {}", outcome.result.data))
            } else {
                tracing::warn!(
                    tool = %outcome.tool_name,
                    "failed tool call produced no reportable output"
                );
                None
            };
            if let Some(content) = content {
                next_cycle.push(
                    Message::tool_result(
                        self.thread_id,
                        outcome.tool_call_id,
                        outcome.tool_name,
                        content,
                    )
                    .with_run(self.run_id, Some(step_id)),
                );
            }
        }

        // Every call failed without any usable output: there is nothing to
        // hand the model for a continuation.
        if next_cycle.is_empty() {
            return Err(Error::AllToolsFailed(tool_calls.len()));
        }
        Ok(next_cycle)
    }

    /// Emit the cancellation pair and mark the run cancelled. Partial
    /// output is abandoned, never completed.
    async fn cancelled(&self) -> Result<Outcome> {
        self.emit(EventData::RunStatusChanged {
            current_status: RunStatus::Cancelling,
            details: None,
        })
        .await;

        if let Err(e) = self
            .ctx
            .runs
            .update_run(self.run_id, RunPatch::status(RunStatus::Cancelling))
            .await
        {
            tracing::warn!(run_id = %self.run_id, error = %e, "failed to persist cancelling status");
        }
        if let Err(e) = self
            .ctx
            .runs
            .update_run(self.run_id, RunPatch::status(RunStatus::Cancelled))
            .await
        {
            tracing::warn!(run_id = %self.run_id, error = %e, "failed to persist cancelled status");
        }

        self.emit(EventData::RunStatusChanged {
            current_status: RunStatus::Cancelled,
            details: None,
        })
        .await;
        Ok(Outcome::Cancelled)
    }

    /// Terminal failure: best-effort status update, then exactly one
    /// `run.failed`.
    async fn fail(&self, err: Error) {
        tracing::error!(run_id = %self.run_id, error = %err, "run failed");

        if let Err(e) = self
            .ctx
            .runs
            .update_run(
                self.run_id,
                RunPatch::status(RunStatus::Failed).with_error(err.to_string()),
            )
            .await
        {
            tracing::warn!(run_id = %self.run_id, error = %e, "failed to persist failed status");
        }

        self.emit(EventData::RunFailed {
            error: RunError::from_error(&err),
        })
        .await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// UTF-8-boundary-safe preview truncation.
pub(crate) fn truncate_preview(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_preview_ascii() {
        assert_eq!(truncate_preview("hello", 10), "hello");
        assert_eq!(truncate_preview("hello world", 5), "hello...");
    }

    #[test]
    fn truncate_preview_multibyte_no_split() {
        let s = "h\u{00e9}llo";
        assert_eq!(truncate_preview(s, 2), "h...");
    }

    #[test]
    fn truncate_preview_zero_max() {
        assert_eq!(truncate_preview("abc", 0), "...");
    }
}
