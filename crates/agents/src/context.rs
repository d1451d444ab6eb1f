//! Agent capability and per-run context.
//!
//! `AgentContext` is a passive record of capabilities (LLM client, tool
//! provider, stores, config). There is no global state; every run carries
//! its own context, which is what makes per-request auth overrides and
//! concurrent runs cheap.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use sw_domain::event::AgentEvent;
use sw_domain::message::Message;
use sw_domain::run::RunConfig;
use sw_domain::tool::{ToolContext, ToolProvider};
use sw_domain::Result;
use sw_llm::LlmClient;
use sw_stores::{MessageStore, RunStore, ThreadStore};

/// Capabilities for one run.
#[derive(Clone)]
pub struct AgentContext {
    pub llm: Arc<dyn LlmClient>,
    pub tool_provider: Arc<dyn ToolProvider>,
    pub messages: Arc<dyn MessageStore>,
    pub threads: Arc<dyn ThreadStore>,
    pub runs: Arc<dyn RunStore>,
    pub config: Arc<RunConfig>,
}

impl AgentContext {
    /// The slice of context tools see during execution.
    pub fn tool_context(&self, run_id: Uuid, thread_id: Uuid) -> ToolContext {
        ToolContext {
            run_id,
            thread_id,
            config: self.config.clone(),
        }
    }

}

/// A started run: its id plus the ordered event stream.
pub struct RunHandle {
    pub run_id: Uuid,
    pub events: mpsc::Receiver<AgentEvent>,
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .finish()
    }
}

/// One tool output submitted to resume a paused run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
    pub tool_name: Option<String>,
}

/// An agent: given a context and initial messages, produces a lazy ordered
/// event sequence and eventually terminates (or pauses at
/// `run.requires_action`).
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    /// Begin a run over `thread_id` with the given new input messages.
    async fn run(
        &self,
        ctx: AgentContext,
        thread_id: Uuid,
        messages: Vec<Message>,
    ) -> Result<RunHandle>;

    /// Resume a run paused at `requires_action` with tool outputs.
    async fn submit_tool_outputs(
        &self,
        ctx: AgentContext,
        run_id: Uuid,
        outputs: Vec<ToolOutput>,
    ) -> Result<RunHandle>;

    /// Request cooperative cancellation. Returns true if the run was
    /// active.
    fn cancel(&self, run_id: Uuid) -> bool;
}
