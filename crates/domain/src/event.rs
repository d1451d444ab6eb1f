//! Agent lifecycle events — the tagged union shared by the run loop
//! (producer) and the HTTP façade / tests (consumers).
//!
//! Within a single run, events are emitted strictly in production order and
//! exactly one terminal event closes the stream (or the run pauses at
//! `run.requires_action`).

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::message::Message;
use crate::run::RunStatus;
use crate::tool::{ToolCall, ToolResult};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One event in a run's ordered stream.
#[derive(Debug, Clone, Serialize)]
pub struct AgentEvent {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub thread_id: Uuid,
    #[serde(flatten)]
    pub data: EventData,
}

impl AgentEvent {
    pub fn new(run_id: Uuid, thread_id: Uuid, data: EventData) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id,
            thread_id,
            data,
        }
    }

    /// Whether this event closes the stream. Cancellation is conveyed as a
    /// status change to `cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.data,
            EventData::RunCompleted { .. }
                | EventData::RunFailed { .. }
                | EventData::RunStatusChanged {
                    current_status: RunStatus::Cancelled,
                    ..
                }
        )
    }

    /// Wire name of the event type (the serde tag).
    pub fn kind(&self) -> &'static str {
        self.data.kind()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Incremental content attached to `message.delta`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_chunk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls_chunk: Option<Vec<ToolCall>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredActionKind {
    SubmitToolOutputs,
}

/// Pending work the caller must perform before the run can resume.
#[derive(Debug, Clone, Serialize)]
pub struct RequiredAction {
    #[serde(rename = "type")]
    pub kind: RequiredActionKind,
    pub tool_calls: Vec<ToolCall>,
}

/// Failure payload carried by `run.failed`.
#[derive(Debug, Clone, Serialize)]
pub struct RunError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl RunError {
    pub fn from_error(err: &crate::error::Error) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            details: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum EventData {
    /// First event of a run that begins with user input.
    #[serde(rename = "run.created")]
    RunCreated { message: Message },

    /// Intermediate status transitions (continuation, cancelling, ...).
    #[serde(rename = "run.status.changed")]
    RunStatusChanged {
        current_status: RunStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },

    /// Start of one LLM turn.
    #[serde(rename = "run.step.created")]
    StepCreated { step_id: Uuid, details: String },

    /// A message was persisted (possibly an in-progress shell).
    #[serde(rename = "message.created")]
    MessageCreated { message: Message },

    #[serde(rename = "message.delta")]
    MessageDelta {
        message_id: Uuid,
        delta: MessageDelta,
    },

    /// Final persisted state of a message.
    #[serde(rename = "message.completed")]
    MessageCompleted { message: Message },

    #[serde(rename = "tool_call.created")]
    ToolCallCreated { step_id: Uuid, tool_call: ToolCall },

    /// The model finished emitting a tool-call structure.
    #[serde(rename = "tool_call.completed_by_llm")]
    ToolCallCompletedByLlm { step_id: Uuid, tool_call: ToolCall },

    #[serde(rename = "tool.execution.started")]
    ToolExecutionStarted {
        step_id: Uuid,
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },

    #[serde(rename = "tool.execution.completed")]
    ToolExecutionCompleted {
        step_id: Uuid,
        tool_call_id: String,
        tool_name: String,
        result: ToolResult,
    },

    /// A delegated worker run finished and its result flowed back to the
    /// planner.
    #[serde(rename = "sub_agent.invocation.completed")]
    SubAgentInvocationCompleted {
        planner_step_id: Uuid,
        tool_call_id: String,
        specialist_id: String,
        sub_agent_run_id: Uuid,
        result: ToolResult,
    },

    /// The run paused with pending tool calls.
    #[serde(rename = "run.requires_action")]
    RunRequiresAction { required_action: RequiredAction },

    #[serde(rename = "run.completed")]
    RunCompleted { final_messages: Vec<Message> },

    #[serde(rename = "run.failed")]
    RunFailed { error: RunError },
}

impl EventData {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RunCreated { .. } => "run.created",
            Self::RunStatusChanged { .. } => "run.status.changed",
            Self::StepCreated { .. } => "run.step.created",
            Self::MessageCreated { .. } => "message.created",
            Self::MessageDelta { .. } => "message.delta",
            Self::MessageCompleted { .. } => "message.completed",
            Self::ToolCallCreated { .. } => "tool_call.created",
            Self::ToolCallCompletedByLlm { .. } => "tool_call.completed_by_llm",
            Self::ToolExecutionStarted { .. } => "tool.execution.started",
            Self::ToolExecutionCompleted { .. } => "tool.execution.completed",
            Self::SubAgentInvocationCompleted { .. } => "sub_agent.invocation.completed",
            Self::RunRequiresAction { .. } => "run.requires_action",
            Self::RunCompleted { .. } => "run.completed",
            Self::RunFailed { .. } => "run.failed",
        }
    }
}
