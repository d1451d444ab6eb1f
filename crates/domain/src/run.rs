//! Run records and run configuration.
//!
//! A run is one execution of an agent over a thread, persisted with a
//! monotonic status. The configuration is immutable for the duration of a
//! run once accepted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthOverride;
use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `next` is a legal successor. Transitions are monotonic:
    /// terminal states accept nothing, and the only backward edge is
    /// `requires_action → in_progress` (resumption).
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        match self {
            Queued => matches!(next, InProgress | Failed | Cancelled),
            InProgress => matches!(
                next,
                RequiresAction | Cancelling | Completed | Failed | Cancelled
            ),
            RequiresAction => matches!(next, InProgress | Failed | Cancelled),
            Cancelling => matches!(next, Cancelled | Failed),
            Completed | Failed | Cancelled => false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token usage accumulated over a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl RunUsage {
    pub fn add(&mut self, other: RunUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub thread_id: Uuid,
    /// "base", "planner", or "worker:<specialist_id>".
    pub agent_type: String,
    pub status: RunStatus,
    /// Immutable once the run is accepted. Not persisted to the run log
    /// (auth overrides may carry deferred token producers).
    #[serde(skip, default)]
    pub config: RunConfig,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub usage: RunUsage,
    /// First ~200 chars of the triggering user message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_preview: Option<String>,
    /// First ~200 chars of the final assistant response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_preview: Option<String>,
}

impl Run {
    pub fn new(thread_id: Uuid, agent_type: impl Into<String>, config: RunConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id,
            agent_type: agent_type.into(),
            status: RunStatus::Queued,
            config,
            created_at: Utc::now(),
            completed_at: None,
            last_error: None,
            usage: RunUsage::default(),
            input_preview: None,
            output_preview: None,
        }
    }

    /// Advance the status, rejecting non-monotonic transitions.
    pub fn advance(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "run {} cannot move {:?} -> {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the model is allowed to use tools for a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
    /// Force a specific tool by name: `{"force": "tool_name"}`.
    Force(String),
}

/// Tool dispatch strategy for one cycle's batch of calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    #[default]
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub strategy: ExecutionStrategy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            strategy: ExecutionStrategy::Sequential,
        }
    }
}

/// Response-parser knobs. Free-text (XML convention) tool calling is
/// reserved; the parser currently requires native tool calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(default = "default_true")]
    pub native_tool_calls: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            native_tool_calls: true,
        }
    }
}

/// Context-manager budget. `token_threshold` must exceed
/// `summary_target_tokens + reserved_tokens`; [`RunConfig::validate`]
/// rejects violations at construction time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContextConfig {
    pub token_threshold: u32,
    pub summary_target_tokens: u32,
    pub reserved_tokens: u32,
    /// Bound on how much history is fetched per turn.
    pub history_limit: usize,
    /// Recent turns kept verbatim (excluded from summarization).
    pub keep_recent_messages: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_threshold: 8_000,
            summary_target_tokens: 1_024,
            reserved_tokens: 512,
            history_limit: 100,
            keep_recent_messages: 4,
        }
    }
}

/// Immutable per-run configuration.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub model: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tool_choice: ToolChoice,
    /// Extra LLM calls allowed after tool execution within the same run.
    pub max_tool_call_continuations: u32,
    pub parser: ParserConfig,
    pub executor: ExecutorConfig,
    pub context: ContextConfig,
    /// Per-provider credential overlay, applied to tool calls in this run
    /// only. Keyed by provider/source id.
    pub request_auth_overrides: HashMap<String, AuthOverride>,
    /// Opaque request-scoped values threaded through to tools.
    pub request_context: Value,
}

impl RunConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tool_call_continuations: 10,
            ..Self::default()
        }
    }

    /// Construction-time validation. A config that fails here never starts
    /// a run.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::Configuration("model must not be empty".into()));
        }
        let c = &self.context;
        if c.token_threshold <= c.summary_target_tokens + c.reserved_tokens {
            return Err(Error::Configuration(format!(
                "token_threshold ({}) must exceed summary_target_tokens ({}) + reserved_tokens ({})",
                c.token_threshold, c.summary_target_tokens, c.reserved_tokens
            )));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::Configuration(format!(
                    "temperature {t} out of range 0.0..=2.0"
                )));
            }
        }
        Ok(())
    }
}
