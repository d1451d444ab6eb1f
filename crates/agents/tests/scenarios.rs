//! End-to-end run-loop scenarios driven through a scripted LLM client.

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use sw_agents::{
    Agent, AgentContext, BaseAgent, CreationStrategy, InterruptHub, PlannerAgent, SourceConfig,
    ToolOutput, ToolsetOrchestrator,
};
use sw_domain::event::{AgentEvent, EventData};
use sw_domain::message::{Message, Role};
use sw_domain::run::{RunConfig, RunStatus};
use sw_domain::tool::{Tool, ToolContext, ToolDefinition, ToolParameter, ToolProvider, ToolResult};
use sw_domain::Result;
use sw_llm::{FinishReason, LlmChunk, ScriptedClient, ToolCallFragment};
use sw_stores::{
    InMemoryMessageStore, InMemoryRunStore, InMemoryThreadStore, MessageStore, RunStore, SortOrder,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Harness {
    llm: Arc<ScriptedClient>,
    messages: Arc<InMemoryMessageStore>,
    threads: Arc<InMemoryThreadStore>,
    runs: Arc<InMemoryRunStore>,
}

impl Harness {
    fn new() -> Self {
        Self {
            llm: Arc::new(ScriptedClient::new()),
            messages: Arc::new(InMemoryMessageStore::new()),
            threads: Arc::new(InMemoryThreadStore::new()),
            runs: Arc::new(InMemoryRunStore::new()),
        }
    }

    fn ctx(&self, provider: Arc<dyn ToolProvider>, config: RunConfig) -> AgentContext {
        AgentContext {
            llm: self.llm.clone(),
            tool_provider: provider,
            messages: self.messages.clone(),
            threads: self.threads.clone(),
            runs: self.runs.clone(),
            config: Arc::new(config),
        }
    }
}

async fn collect(mut events: tokio::sync::mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut out = Vec::new();
    while let Some(event) = events.recv().await {
        out.push(event);
    }
    out
}

fn kinds(events: &[AgentEvent]) -> Vec<&'static str> {
    events.iter().map(AgentEvent::kind).collect()
}

/// Assert `expected` appears within `actual` in order (other events may be
/// interleaved).
fn assert_subsequence(actual: &[&'static str], expected: &[&'static str]) {
    let mut it = actual.iter();
    for want in expected {
        assert!(
            it.any(|k| k == want),
            "expected event '{want}' in order within {actual:?}"
        );
    }
}

// ── Test tools ──────────────────────────────────────────────────────

struct TestTool {
    name: String,
    result: ToolResult,
}

#[async_trait::async_trait]
impl Tool for TestTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: "A scripted test tool".into(),
            parameters: vec![ToolParameter {
                name: "query".into(),
                kind: "string".into(),
                description: String::new(),
                required: false,
                schema: None,
            }],
        }
    }

    async fn execute(&self, _input: Value, _ctx: &ToolContext) -> ToolResult {
        self.result.clone()
    }
}

/// Interrupts its own run from inside tool execution, making cancellation
/// deterministic in tests.
struct CancelTool {
    hub: Arc<InterruptHub>,
}

#[async_trait::async_trait]
impl Tool for CancelTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "cancel_tool".into(),
            description: String::new(),
            parameters: vec![],
        }
    }

    async fn execute(&self, _input: Value, ctx: &ToolContext) -> ToolResult {
        self.hub.interrupt(ctx.run_id);
        ToolResult::ok(json!({ "cancelled": true }))
    }
}

/// Fails without error text or data, so the cycle yields no tool message.
struct SilentFailureTool;

#[async_trait::async_trait]
impl Tool for SilentFailureTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "broken_tool".into(),
            description: String::new(),
            parameters: vec![],
        }
    }

    async fn execute(&self, _input: Value, _ctx: &ToolContext) -> ToolResult {
        ToolResult {
            success: false,
            data: Value::Null,
            error: None,
            metadata: None,
        }
    }
}

struct FixedProvider(Vec<Arc<dyn Tool>>);

#[async_trait::async_trait]
impl ToolProvider for FixedProvider {
    async fn ensure_initialized(&self) -> Result<()> {
        Ok(())
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.0.clone()
    }

    fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.0.iter().find(|t| t.definition().name == name).cloned()
    }
}

fn no_tools() -> Arc<dyn ToolProvider> {
    Arc::new(FixedProvider(Vec::new()))
}

fn test_tool_provider(result: ToolResult) -> Arc<dyn ToolProvider> {
    Arc::new(FixedProvider(vec![Arc::new(TestTool {
        name: "test_tool".into(),
        result,
    })]))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Seed scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn scenario_text_only_turn() {
    let h = Harness::new();
    h.llm.push_script(vec![
        Ok(LlmChunk::text("Hi ")),
        Ok(LlmChunk::text("there!")),
        Ok(LlmChunk::finish(FinishReason::Stop)),
    ]);

    let agent = BaseAgent::new();
    let thread_id = Uuid::new_v4();
    let handle = agent
        .run(
            h.ctx(no_tools(), RunConfig::new("test-model")),
            thread_id,
            vec![Message::user(thread_id, "Hello.")],
        )
        .await
        .unwrap();
    let run_id = handle.run_id;
    let events = collect(handle.events).await;

    assert_eq!(
        kinds(&events),
        vec![
            "run.created",
            "run.step.created",
            "message.created",
            "message.created",
            "message.delta",
            "message.delta",
            "message.completed",
            "run.completed",
        ]
    );

    match &events.last().unwrap().data {
        EventData::RunCompleted { final_messages } => {
            assert_eq!(final_messages[0].content, "Hi there!");
        }
        other => panic!("expected run.completed, got {other:?}"),
    }

    let run = h.runs.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.input_preview.as_deref(), Some("Hello."));
}

#[tokio::test]
async fn scenario_single_tool_call_and_completion() {
    let h = Harness::new();
    h.llm
        .push_tool_call("call_1", "test_tool", "{\"query\":\"test\"}");
    h.llm.push_text("Tool executed successfully.");

    let provider = test_tool_provider(ToolResult::ok(json!({ "result": "tool_was_called" })));
    let agent = BaseAgent::new();
    let thread_id = Uuid::new_v4();
    let handle = agent
        .run(
            h.ctx(provider, RunConfig::new("test-model")),
            thread_id,
            vec![Message::user(thread_id, "Use test_tool.")],
        )
        .await
        .unwrap();
    let events = collect(handle.events).await;
    let ks = kinds(&events);

    assert_subsequence(
        &ks,
        &[
            "run.created",
            "tool_call.created",
            "tool_call.completed_by_llm",
            "tool.execution.started",
            "tool.execution.completed",
            "message.completed",
            "run.completed",
        ],
    );

    let started = events
        .iter()
        .find_map(|e| match &e.data {
            EventData::ToolExecutionStarted { input, .. } => Some(input.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(started, json!({ "query": "test" }));

    let completed = events
        .iter()
        .find_map(|e| match &e.data {
            EventData::ToolExecutionCompleted { result, .. } => Some(result.clone()),
            _ => None,
        })
        .unwrap();
    assert!(completed.success);
    assert_eq!(completed.data["result"], "tool_was_called");

    // Persisted turn: user, assistant(with tool_calls), tool, assistant.
    let persisted = h
        .messages
        .get_messages(thread_id, None, SortOrder::Ascending)
        .await
        .unwrap();
    let roles: Vec<Role> = persisted.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    assert_eq!(persisted[1].metadata.tool_calls.len(), 1);
    assert_eq!(
        persisted[2].content,
        "{\"result\":\"tool_was_called\"}"
    );
    assert_eq!(persisted[2].metadata.tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(persisted[3].content, "Tool executed successfully.");
}

#[tokio::test]
async fn scenario_continuation_exhaustion_pauses() {
    let h = Harness::new();
    h.llm
        .push_tool_call("call_1", "test_tool", "{\"query\":\"x\"}");

    let mut config = RunConfig::new("test-model");
    config.max_tool_call_continuations = 1;

    let provider = test_tool_provider(ToolResult::ok(json!("unused")));
    let agent = BaseAgent::new();
    let thread_id = Uuid::new_v4();
    let handle = agent
        .run(
            h.ctx(provider.clone(), config.clone()),
            thread_id,
            vec![Message::user(thread_id, "Use test_tool.")],
        )
        .await
        .unwrap();
    let run_id = handle.run_id;
    let events = collect(handle.events).await;
    let ks = kinds(&events);

    assert!(ks.contains(&"run.requires_action"));
    assert!(!ks.contains(&"tool.execution.started"), "no execution");
    assert!(!ks.contains(&"run.completed"));
    assert!(!ks.contains(&"run.failed"));

    match &events.last().unwrap().data {
        EventData::RunRequiresAction { required_action } => {
            assert_eq!(required_action.tool_calls[0].name, "test_tool");
        }
        other => panic!("expected run.requires_action, got {other:?}"),
    }

    let run = h.runs.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::RequiresAction);

    // Resume with submitted outputs; the next turn answers and completes.
    h.llm.push_text("Thanks, done.");
    let handle = agent
        .submit_tool_outputs(
            h.ctx(provider, config),
            run_id,
            vec![ToolOutput {
                tool_call_id: "call_1".into(),
                output: "{\"answer\":42}".into(),
                tool_name: None,
            }],
        )
        .await
        .unwrap();
    let events = collect(handle.events).await;
    assert_eq!(events.last().unwrap().kind(), "run.completed");

    // The submitted output became a tool-role message with the resolved
    // tool name.
    let persisted = h
        .messages
        .get_messages(thread_id, None, SortOrder::Ascending)
        .await
        .unwrap();
    let tool_msg = persisted.iter().find(|m| m.role == Role::Tool).unwrap();
    assert_eq!(tool_msg.metadata.tool_name.as_deref(), Some("test_tool"));
    assert_eq!(tool_msg.content, "{\"answer\":42}");

    let run = h.runs.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
}

#[tokio::test]
async fn scenario_tool_failure_recovery() {
    let h = Harness::new();
    h.llm
        .push_tool_call("call_1", "test_tool", "{\"query\":\"x\"}");
    h.llm.push_text("Tool failed, but I can continue.");

    let mut config = RunConfig::new("test-model");
    config.max_tool_call_continuations = 2;

    let provider = test_tool_provider(ToolResult::fail("spectacular failure"));
    let agent = BaseAgent::new();
    let thread_id = Uuid::new_v4();
    let handle = agent
        .run(
            h.ctx(provider, config),
            thread_id,
            vec![Message::user(thread_id, "Try the tool.")],
        )
        .await
        .unwrap();
    let events = collect(handle.events).await;

    let completed = events
        .iter()
        .find_map(|e| match &e.data {
            EventData::ToolExecutionCompleted { result, .. } => Some(result.clone()),
            _ => None,
        })
        .unwrap();
    assert!(!completed.success);
    assert_eq!(completed.error.as_deref(), Some("spectacular failure"));

    assert_eq!(events.last().unwrap().kind(), "run.completed");

    let persisted = h
        .messages
        .get_messages(thread_id, None, SortOrder::Ascending)
        .await
        .unwrap();
    let tool_msg = persisted.iter().find(|m| m.role == Role::Tool).unwrap();
    assert_eq!(tool_msg.content, "Error: spectacular failure");
    assert_eq!(
        persisted.last().unwrap().content,
        "Tool failed, but I can continue."
    );
}

#[tokio::test]
async fn all_tools_failing_without_output_fails_the_run() {
    let h = Harness::new();
    h.llm.push_tool_call("call_1", "broken_tool", "{}");

    let provider: Arc<dyn ToolProvider> =
        Arc::new(FixedProvider(vec![Arc::new(SilentFailureTool)]));
    let agent = BaseAgent::new();
    let thread_id = Uuid::new_v4();
    let handle = agent
        .run(
            h.ctx(provider, RunConfig::new("test-model")),
            thread_id,
            vec![Message::user(thread_id, "Use broken_tool.")],
        )
        .await
        .unwrap();
    let run_id = handle.run_id;
    let events = collect(handle.events).await;

    // The execution was attempted and reported before the run failed.
    assert_subsequence(
        &kinds(&events),
        &["tool.execution.completed", "run.failed"],
    );
    match &events.last().unwrap().data {
        EventData::RunFailed { error } => assert_eq!(error.code, "all_tools_failed"),
        other => panic!("expected run.failed, got {other:?}"),
    }

    let run = h.runs.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(h.llm.remaining_scripts(), 0, "no continuation call");
}

#[tokio::test]
async fn scenario_planner_delegates_once() {
    let h = Harness::new();

    // Specialist toolset the orchestrator knows about.
    let orchestrator = Arc::new(ToolsetOrchestrator::new(None, "test-model"));
    orchestrator
        .register_source(&SourceConfig {
            id: "flight_specialist".into(),
            provider_type: "openapi".into(),
            provider: Arc::new(FixedProvider(vec![Arc::new(TestTool {
                name: "searchFlights".into(),
                result: ToolResult::ok(json!({ "flights": [] })),
            })])),
            creation_strategy: CreationStrategy::AllInOne,
            max_tools_per_logical_group: 10,
            all_in_one_name: Some("Flight search".into()),
            all_in_one_description: Some("Searches and books flights".into()),
        })
        .await
        .unwrap();

    // Planner turn 1: delegate. Worker turn: answers without tools.
    // Planner turn 2: final assembly.
    let delegate_args = json!({
        "specialist_id": "flight_specialist",
        "sub_task_description": "Search for a flight to Paris"
    })
    .to_string();
    h.llm
        .push_tool_call("call_1", "delegateToSpecialistAgent", &delegate_args);
    h.llm
        .push_text("Found flight AF123 to Paris on Tuesday at 10:00 AM.");
    h.llm
        .push_text("I found a flight: AF123 to Paris on Tuesday at 10:00 AM.");

    let planner = PlannerAgent::new(
        orchestrator,
        h.llm.clone(),
        h.messages.clone(),
        h.threads.clone(),
        h.runs.clone(),
    );
    let thread_id = Uuid::new_v4();
    let handle = planner
        .run(
            h.ctx(no_tools(), RunConfig::new("test-model")),
            thread_id,
            vec![Message::user(thread_id, "Find a flight to Paris.")],
        )
        .await
        .unwrap();
    let events = collect(handle.events).await;

    let sub_agent = events
        .iter()
        .find_map(|e| match &e.data {
            EventData::SubAgentInvocationCompleted {
                specialist_id,
                result,
                sub_agent_run_id,
                ..
            } => Some((specialist_id.clone(), result.clone(), *sub_agent_run_id)),
            _ => None,
        })
        .expect("sub_agent.invocation.completed was emitted");
    assert_eq!(sub_agent.0, "flight_specialist");
    assert_eq!(
        sub_agent.1.data,
        json!("Found flight AF123 to Paris on Tuesday at 10:00 AM.")
    );

    assert_eq!(events.last().unwrap().kind(), "run.completed");
    match &events.last().unwrap().data {
        EventData::RunCompleted { final_messages } => {
            assert_eq!(
                final_messages[0].content,
                "I found a flight: AF123 to Paris on Tuesday at 10:00 AM."
            );
        }
        other => panic!("expected run.completed, got {other:?}"),
    }

    // The worker run was persisted with its own identity.
    let worker_run = h.runs.get_run(sub_agent.2).await.unwrap().unwrap();
    assert_eq!(worker_run.agent_type, "worker:flight_specialist");
    assert_eq!(worker_run.status, RunStatus::Completed);

    // The planner saw the planning system prompt.
    let first_request = &h.llm.requests()[0];
    let system = &first_request.messages[0];
    assert_eq!(system.role, Role::System);
    assert!(system.content.contains("delegateToSpecialistAgent"));
    assert!(system.content.contains("flight_specialist"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Boundary behaviors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn empty_stop_only_stream_completes_with_empty_message() {
    let h = Harness::new();
    h.llm
        .push_script(vec![Ok(LlmChunk::finish(FinishReason::Stop))]);

    let agent = BaseAgent::new();
    let thread_id = Uuid::new_v4();
    let handle = agent
        .run(
            h.ctx(no_tools(), RunConfig::new("test-model")),
            thread_id,
            vec![Message::user(thread_id, "hi")],
        )
        .await
        .unwrap();
    let events = collect(handle.events).await;

    match &events.last().unwrap().data {
        EventData::RunCompleted { final_messages } => {
            assert_eq!(final_messages[0].content, "");
        }
        other => panic!("expected run.completed, got {other:?}"),
    }
}

#[tokio::test]
async fn stream_ending_mid_arguments_fails_with_validation() {
    let h = Harness::new();
    h.llm.push_script(vec![Ok(LlmChunk {
        tool_calls: vec![ToolCallFragment {
            index: 0,
            id: Some("call_1".into()),
            kind: Some("function".into()),
            name: Some("test_tool".into()),
            arguments: Some("{\"query\": \"unfin".into()),
        }],
        ..LlmChunk::default()
    })]);

    let agent = BaseAgent::new();
    let thread_id = Uuid::new_v4();
    let provider = test_tool_provider(ToolResult::ok(json!("unused")));
    let handle = agent
        .run(
            h.ctx(provider, RunConfig::new("test-model")),
            thread_id,
            vec![Message::user(thread_id, "hi")],
        )
        .await
        .unwrap();
    let run_id = handle.run_id;
    let events = collect(handle.events).await;

    match &events.last().unwrap().data {
        EventData::RunFailed { error } => assert_eq!(error.code, "validation"),
        other => panic!("expected run.failed, got {other:?}"),
    }
    // No message.completed for the broken assistant turn.
    assert!(!kinds(&events).contains(&"message.completed"));

    let run = h.runs.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.last_error.is_some());
}

#[tokio::test]
async fn length_finish_reason_fails_the_run() {
    let h = Harness::new();
    h.llm.push_script(vec![
        Ok(LlmChunk::text("truncated answ")),
        Ok(LlmChunk::finish(FinishReason::Length)),
    ]);

    let agent = BaseAgent::new();
    let thread_id = Uuid::new_v4();
    let handle = agent
        .run(
            h.ctx(no_tools(), RunConfig::new("test-model")),
            thread_id,
            vec![Message::user(thread_id, "hi")],
        )
        .await
        .unwrap();
    let events = collect(handle.events).await;

    match &events.last().unwrap().data {
        EventData::RunFailed { error } => {
            assert_eq!(error.code, "llm_finish_reason_error");
        }
        other => panic!("expected run.failed, got {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_between_batches_emits_cancelled_terminal() {
    let h = Harness::new();
    let agent = BaseAgent::new();
    let provider: Arc<dyn ToolProvider> = Arc::new(FixedProvider(vec![Arc::new(CancelTool {
        hub: agent.interrupts(),
    })]));

    h.llm.push_tool_call("call_1", "cancel_tool", "{}");

    let thread_id = Uuid::new_v4();
    let handle = agent
        .run(
            h.ctx(provider, RunConfig::new("test-model")),
            thread_id,
            vec![Message::user(thread_id, "stop yourself")],
        )
        .await
        .unwrap();
    let run_id = handle.run_id;
    let events = collect(handle.events).await;
    let ks = kinds(&events);

    assert_subsequence(
        &ks,
        &[
            "tool.execution.completed",
            "run.status.changed",
            "run.status.changed",
        ],
    );
    let last = events.last().unwrap();
    assert!(last.is_terminal());
    match &last.data {
        EventData::RunStatusChanged { current_status, .. } => {
            assert_eq!(*current_status, RunStatus::Cancelled);
        }
        other => panic!("expected cancelled status, got {other:?}"),
    }

    let run = h.runs.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(h.llm.remaining_scripts(), 0, "no second LLM call");
}

#[tokio::test]
async fn submit_tool_outputs_on_completed_run_is_invalid_state() {
    let h = Harness::new();
    h.llm.push_text("done");

    let agent = BaseAgent::new();
    let thread_id = Uuid::new_v4();
    let handle = agent
        .run(
            h.ctx(no_tools(), RunConfig::new("test-model")),
            thread_id,
            vec![Message::user(thread_id, "hi")],
        )
        .await
        .unwrap();
    let run_id = handle.run_id;
    collect(handle.events).await;

    let err = agent
        .submit_tool_outputs(
            h.ctx(no_tools(), RunConfig::new("test-model")),
            run_id,
            vec![ToolOutput {
                tool_call_id: "call_1".into(),
                output: "x".into(),
                tool_name: None,
            }],
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_state");
}

#[tokio::test]
async fn invalid_config_never_starts_a_run() {
    let h = Harness::new();
    let agent = BaseAgent::new();
    let thread_id = Uuid::new_v4();

    let mut config = RunConfig::new("test-model");
    config.context.token_threshold = 10; // below summary + reserve

    let err = agent
        .run(
            h.ctx(no_tools(), config),
            thread_id,
            vec![Message::user(thread_id, "hi")],
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "configuration");
    assert!(h.messages.is_empty(), "nothing persisted");
}

#[tokio::test]
async fn exactly_one_terminal_event_per_run() {
    let h = Harness::new();
    h.llm
        .push_tool_call("call_1", "test_tool", "{\"query\":\"x\"}");
    h.llm.push_text("all done");

    let provider = test_tool_provider(ToolResult::ok(json!({ "ok": true })));
    let agent = BaseAgent::new();
    let thread_id = Uuid::new_v4();
    let handle = agent
        .run(
            h.ctx(provider, RunConfig::new("test-model")),
            thread_id,
            vec![Message::user(thread_id, "go")],
        )
        .await
        .unwrap();
    let events = collect(handle.events).await;

    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1);
    assert!(events.last().unwrap().is_terminal());
}
