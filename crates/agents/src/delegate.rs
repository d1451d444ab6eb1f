//! The delegation tool — lets a planner hand a sub-task to a specialist
//! worker agent and get its final answer back as a tool result.
//!
//! A worker run is an ordinary run on the same loop: fresh thread, the
//! specialist's tools only, a synthesized system prompt, and the planner's
//! remaining configuration. Worker failures come back as failed tool
//! results, never as errors unwinding the planner.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use sw_domain::event::EventData;
use sw_domain::message::{Message, Thread};
use sw_domain::run::{RunConfig, ToolChoice};
use sw_domain::tool::{
    Tool, ToolContext, ToolDefinition, ToolParameter, ToolResult, ToolSet,
};
use sw_llm::LlmClient;
use sw_stores::{MessageStore, RunStore, ThreadStore};

use crate::context::{Agent, AgentContext};
use crate::interrupt::InterruptHub;
use crate::orchestrator::{ToolSetProvider, ToolsetOrchestrator};
use crate::run_loop::BaseAgent;

pub const DELEGATE_TOOL_NAME: &str = "delegateToSpecialistAgent";

#[derive(Debug, Deserialize)]
struct DelegateArgs {
    specialist_id: String,
    sub_task_description: String,
    #[serde(default)]
    required_output_format: Option<String>,
}

pub struct DelegateTool {
    orchestrator: Arc<ToolsetOrchestrator>,
    llm: Arc<dyn LlmClient>,
    messages: Arc<dyn MessageStore>,
    threads: Arc<dyn ThreadStore>,
    runs: Arc<dyn RunStore>,
    interrupts: Arc<InterruptHub>,
}

impl DelegateTool {
    pub fn new(
        orchestrator: Arc<ToolsetOrchestrator>,
        llm: Arc<dyn LlmClient>,
        messages: Arc<dyn MessageStore>,
        threads: Arc<dyn ThreadStore>,
        runs: Arc<dyn RunStore>,
        interrupts: Arc<InterruptHub>,
    ) -> Self {
        Self {
            orchestrator,
            llm,
            messages,
            threads,
            runs,
            interrupts,
        }
    }

    /// System prompt for a worker, synthesized from the specialist's
    /// metadata and tool descriptions.
    fn worker_prompt(set: &ToolSet, output_format: Option<&str>) -> String {
        let mut prompt = format!(
            "You are a specialist agent: {}.\n{}\n\nYour tools:\n",
            set.name, set.description
        );
        for tool in &set.tools {
            let def = tool.definition();
            prompt.push_str(&format!("- {}: {}\n", def.name, def.description));
        }
        prompt.push_str(
            "\nComplete the given sub-task using your tools, then reply with \
             a single final answer.",
        );
        if let Some(format) = output_format {
            prompt.push_str(&format!("\nRequired output format: {format}"));
        }
        prompt
    }

    async fn run_worker(
        &self,
        args: &DelegateArgs,
        set: ToolSet,
        ctx: &ToolContext,
    ) -> ToolResult {
        let specialist_id = args.specialist_id.clone();

        let mut config: RunConfig = (*ctx.config).clone();
        config.system_prompt = Some(Self::worker_prompt(
            &set,
            args.required_output_format.as_deref(),
        ));
        config.tool_choice = ToolChoice::Auto;

        let thread = match self.threads.create_thread(Thread::new()).await {
            Ok(thread) => thread,
            Err(e) => return ToolResult::fail(format!("could not create worker thread: {e}")),
        };

        // Enrolling under the planner's run id makes a planner interrupt
        // reach this worker too.
        let worker = BaseAgent::with_interrupts(self.interrupts.clone())
            .with_agent_type(format!("worker:{specialist_id}"))
            .with_parent_run(ctx.run_id);
        let worker_ctx = AgentContext {
            llm: self.llm.clone(),
            tool_provider: Arc::new(ToolSetProvider::new(set)),
            messages: self.messages.clone(),
            threads: self.threads.clone(),
            runs: self.runs.clone(),
            config: Arc::new(config),
        };

        let mut task = args.sub_task_description.clone();
        if let Some(format) = &args.required_output_format {
            task.push_str(&format!("\n\nRespond in this format: {format}"));
        }

        let mut handle = match worker
            .run(worker_ctx, thread.id, vec![Message::user(thread.id, task)])
            .await
        {
            Ok(handle) => handle,
            Err(e) => return ToolResult::fail(format!("could not start worker run: {e}")),
        };

        let mut final_text: Option<String> = None;
        let mut failure: Option<String> = None;
        while let Some(event) = handle.events.recv().await {
            match event.data {
                EventData::RunCompleted { final_messages } => {
                    final_text = final_messages.last().map(|m| m.content.clone());
                }
                EventData::RunFailed { error } => {
                    failure = Some(format!("{} ({})", error.message, error.code));
                }
                EventData::RunStatusChanged { current_status, .. }
                    if current_status == sw_domain::run::RunStatus::Cancelled =>
                {
                    failure = Some("worker run was cancelled".into());
                }
                _ => {}
            }
        }

        let metadata = |mut result: ToolResult| {
            result = result
                .with_metadata("sub_agent_run_id", json!(handle.run_id.to_string()))
                .with_metadata("specialist_id", json!(specialist_id))
                .with_metadata("sub_task_description", json!(args.sub_task_description));
            result
        };

        match (final_text, failure) {
            (_, Some(error)) => metadata(ToolResult::fail(error)),
            (Some(text), None) => metadata(ToolResult::ok(Value::String(text))),
            (None, None) => metadata(ToolResult::fail(
                "worker run ended without a final answer",
            )),
        }
    }
}

#[async_trait::async_trait]
impl Tool for DelegateTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: DELEGATE_TOOL_NAME.into(),
            description: "Delegate a sub-task to a specialist agent that has \
                          the right tools for it. Returns the specialist's \
                          final answer."
                .into(),
            parameters: vec![
                ToolParameter {
                    name: "specialist_id".into(),
                    kind: "string".into(),
                    description: "Identifier of the specialist toolset to use".into(),
                    required: true,
                    schema: None,
                },
                ToolParameter {
                    name: "sub_task_description".into(),
                    kind: "string".into(),
                    description: "Complete, self-contained description of the sub-task".into(),
                    required: true,
                    schema: None,
                },
                ToolParameter {
                    name: "required_output_format".into(),
                    kind: "string".into(),
                    description: "Optional format the specialist's answer must follow".into(),
                    required: false,
                    schema: None,
                },
            ],
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let args: DelegateArgs = match serde_json::from_value(input) {
            Ok(args) => args,
            Err(e) => return ToolResult::fail(format!("invalid delegation arguments: {e}")),
        };

        let Some(set) = self.orchestrator.get(&args.specialist_id) else {
            return ToolResult::fail(format!("unknown specialist '{}'", args.specialist_id))
                .with_metadata("specialist_id", json!(args.specialist_id));
        };

        tracing::info!(
            specialist = %args.specialist_id,
            task_len = args.sub_task_description.len(),
            "delegating sub-task"
        );
        self.run_worker(&args, set, ctx).await
    }
}
