//! Planner agent — the same loop as [`BaseAgent`], configured with exactly
//! one tool (the delegation tool) and a system prompt that lists the
//! available specialists.

use std::sync::Arc;

use uuid::Uuid;

use sw_domain::message::Message;
use sw_domain::run::RunConfig;
use sw_domain::tool::{Tool, ToolProvider};
use sw_domain::Result;
use sw_llm::LlmClient;
use sw_stores::{MessageStore, RunStore, ThreadStore};

use crate::context::{Agent, AgentContext, RunHandle, ToolOutput};
use crate::delegate::{DelegateTool, DELEGATE_TOOL_NAME};
use crate::interrupt::InterruptHub;
use crate::orchestrator::ToolsetOrchestrator;
use crate::run_loop::BaseAgent;

/// A provider exposing a single tool (the planner's environment).
struct SingleToolProvider {
    tool: Arc<dyn Tool>,
}

#[async_trait::async_trait]
impl ToolProvider for SingleToolProvider {
    async fn ensure_initialized(&self) -> Result<()> {
        Ok(())
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![self.tool.clone()]
    }

    fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        (self.tool.definition().name == name).then(|| self.tool.clone())
    }
}

pub struct PlannerAgent {
    base: BaseAgent,
    orchestrator: Arc<ToolsetOrchestrator>,
    delegate: Arc<DelegateTool>,
}

impl PlannerAgent {
    pub fn new(
        orchestrator: Arc<ToolsetOrchestrator>,
        llm: Arc<dyn LlmClient>,
        messages: Arc<dyn MessageStore>,
        threads: Arc<dyn ThreadStore>,
        runs: Arc<dyn RunStore>,
    ) -> Self {
        Self::with_interrupts(
            orchestrator,
            llm,
            messages,
            threads,
            runs,
            Arc::new(InterruptHub::new()),
        )
    }

    /// Share an interruption hub so interrupting the planner cascades down
    /// its delegation chain.
    pub fn with_interrupts(
        orchestrator: Arc<ToolsetOrchestrator>,
        llm: Arc<dyn LlmClient>,
        messages: Arc<dyn MessageStore>,
        threads: Arc<dyn ThreadStore>,
        runs: Arc<dyn RunStore>,
        interrupts: Arc<InterruptHub>,
    ) -> Self {
        let delegate = Arc::new(DelegateTool::new(
            orchestrator.clone(),
            llm,
            messages,
            threads,
            runs,
            interrupts.clone(),
        ));
        Self {
            base: BaseAgent::with_interrupts(interrupts).with_agent_type("planner"),
            orchestrator,
            delegate,
        }
    }

    /// The planning system prompt: pick a specialist, describe the
    /// sub-task, assemble the final answer from specialist results.
    pub fn planner_prompt(&self) -> String {
        let mut prompt = format!(
            "You are a planning agent. You do not execute tasks yourself; \
             you break the user's request into sub-tasks and delegate each \
             one with the `{DELEGATE_TOOL_NAME}` tool, then assemble the \
             specialists' answers into one final response.\n\n\
             Available specialists:\n"
        );
        for set in self.orchestrator.list() {
            prompt.push_str(&format!(
                "- {} ({}): {} [{} tools]\n",
                set.id,
                set.name,
                set.description,
                set.tools.len()
            ));
        }
        prompt.push_str(
            "\nAlways pass a complete, self-contained sub_task_description; \
             the specialist cannot see this conversation.",
        );
        prompt
    }

    /// The planner's environment: delegation tool only, planning prompt
    /// unless the caller set one.
    fn planner_context(&self, ctx: AgentContext) -> AgentContext {
        let mut config: RunConfig = (*ctx.config).clone();
        if config.system_prompt.is_none() {
            config.system_prompt = Some(self.planner_prompt());
        }
        AgentContext {
            tool_provider: Arc::new(SingleToolProvider {
                tool: self.delegate.clone(),
            }),
            config: Arc::new(config),
            ..ctx
        }
    }
}

#[async_trait::async_trait]
impl Agent for PlannerAgent {
    async fn run(
        &self,
        ctx: AgentContext,
        thread_id: Uuid,
        messages: Vec<Message>,
    ) -> Result<RunHandle> {
        self.base.run(self.planner_context(ctx), thread_id, messages).await
    }

    async fn submit_tool_outputs(
        &self,
        ctx: AgentContext,
        run_id: Uuid,
        outputs: Vec<ToolOutput>,
    ) -> Result<RunHandle> {
        self.base
            .submit_tool_outputs(self.planner_context(ctx), run_id, outputs)
            .await
    }

    fn cancel(&self, run_id: Uuid) -> bool {
        self.base.cancel(run_id)
    }
}
