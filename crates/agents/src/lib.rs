//! The agent orchestration core — the per-run state machine that drives an
//! LLM conversation, parses its output incrementally, executes tools,
//! manages the context-window budget, and composes a planner with
//! specialist workers.
//!
//! Entry point: [`BaseAgent::run`] returns a [`RunHandle`] whose receiver
//! yields ordered [`sw_domain::event::AgentEvent`]s until exactly one
//! terminal event (or a pause at `run.requires_action`).

pub mod context;
pub mod context_manager;
pub mod delegate;
pub mod executor;
pub mod interrupt;
pub mod orchestrator;
pub mod parser;
pub mod planner;
pub mod run_loop;

pub use context::{Agent, AgentContext, RunHandle, ToolOutput};
pub use context_manager::ContextManager;
pub use delegate::{DelegateTool, DELEGATE_TOOL_NAME};
pub use executor::{ToolExecutor, ToolOutcome};
pub use interrupt::{InterruptHub, StopSignal};
pub use orchestrator::{
    AggregatedToolProvider, CreationStrategy, SourceConfig, ToolSetProvider, ToolsetOrchestrator,
};
pub use planner::PlannerAgent;
pub use run_loop::BaseAgent;
