//! Tool executor — looks tools up by name, parses arguments, and invokes
//! them under the configured dispatch strategy.
//!
//! Every call produces exactly one outcome record in input order; lookup
//! misses, argument parse failures, and tool panics all become failed
//! results, never errors across the boundary.

use std::sync::Arc;

use serde_json::Value;

use sw_domain::run::ExecutionStrategy;
use sw_domain::tool::{Tool, ToolCall, ToolContext, ToolProvider, ToolResult};

/// One executed call: the parsed input plus the result record.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: Value,
    pub result: ToolResult,
}

pub struct ToolExecutor {
    provider: Arc<dyn ToolProvider>,
    strategy: ExecutionStrategy,
    ctx: ToolContext,
}

impl ToolExecutor {
    pub fn new(
        provider: Arc<dyn ToolProvider>,
        strategy: ExecutionStrategy,
        ctx: ToolContext,
    ) -> Self {
        Self {
            provider,
            strategy,
            ctx,
        }
    }

    /// Execute a batch of calls. Result order always matches input order;
    /// failures never halt the batch.
    pub async fn execute(&self, calls: &[ToolCall]) -> Vec<ToolOutcome> {
        match self.strategy {
            ExecutionStrategy::Sequential => {
                let mut outcomes = Vec::with_capacity(calls.len());
                for call in calls {
                    outcomes.push(self.execute_one(call).await);
                }
                outcomes
            }
            ExecutionStrategy::Parallel => {
                // join_all preserves input order regardless of completion
                // order.
                let futures: Vec<_> = calls.iter().map(|c| self.execute_one(c)).collect();
                futures_util::future::join_all(futures).await
            }
        }
    }

    async fn execute_one(&self, call: &ToolCall) -> ToolOutcome {
        let input = match parse_arguments(&call.arguments) {
            Ok(input) => input,
            Err(message) => {
                return ToolOutcome {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    input: Value::Null,
                    result: ToolResult::fail_marked(message, "validation_error"),
                };
            }
        };

        let Some(tool) = self.provider.tool(&call.name) else {
            tracing::warn!(tool = %call.name, "tool call for unknown tool");
            return ToolOutcome {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                input,
                result: ToolResult::fail_marked(
                    format!("no tool named '{}' is available", call.name),
                    "tool_not_found",
                ),
            };
        };

        let result = invoke_guarded(tool, input.clone(), self.ctx.clone()).await;

        ToolOutcome {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            input,
            result,
        }
    }
}

fn parse_arguments(raw: &str) -> Result<Value, String> {
    let raw = if raw.trim().is_empty() { "{}" } else { raw };
    serde_json::from_str(raw).map_err(|e| format!("tool arguments are not valid JSON: {e}"))
}

/// Invoke a tool on its own task so a panicking tool still produces a
/// result record.
async fn invoke_guarded(tool: Arc<dyn Tool>, input: Value, ctx: ToolContext) -> ToolResult {
    let name = tool.definition().name;
    let handle = tokio::spawn(async move { tool.execute(input, &ctx).await });
    match handle.await {
        Ok(result) => result,
        Err(join_err) => {
            tracing::error!(tool = %name, error = %join_err, "tool task panicked");
            ToolResult::fail_marked(format!("tool '{name}' panicked: {join_err}"), "panic")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use sw_domain::run::RunConfig;
    use sw_domain::tool::{ToolDefinition, ToolParameter};
    use sw_domain::Result;
    use uuid::Uuid;

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".into(),
                description: "Echo the input back".into(),
                parameters: vec![ToolParameter {
                    name: "value".into(),
                    kind: "string".into(),
                    description: String::new(),
                    required: true,
                    schema: None,
                }],
            }
        }

        async fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolResult {
            ToolResult::ok(input)
        }
    }

    struct SlowTool(u64);

    #[async_trait::async_trait]
    impl Tool for SlowTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: format!("slow_{}", self.0),
                description: String::new(),
                parameters: vec![],
            }
        }

        async fn execute(&self, _input: Value, _ctx: &ToolContext) -> ToolResult {
            tokio::time::sleep(Duration::from_millis(self.0)).await;
            ToolResult::ok(serde_json::json!({ "slept_ms": self.0 }))
        }
    }

    struct PanicTool;

    #[async_trait::async_trait]
    impl Tool for PanicTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "boom".into(),
                description: String::new(),
                parameters: vec![],
            }
        }

        async fn execute(&self, _input: Value, _ctx: &ToolContext) -> ToolResult {
            panic!("kaboom");
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

    fn executor(tools: Vec<Arc<dyn Tool>>, strategy: ExecutionStrategy) -> ToolExecutor {
        ToolExecutor::new(
            Arc::new(FixedProvider(tools)),
            strategy,
            ToolContext {
                run_id: Uuid::new_v4(),
                thread_id: Uuid::new_v4(),
                config: Arc::new(RunConfig::new("m")),
            },
        )
    }

    fn call(id: &str, name: &str, args: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args.into(),
        }
    }

    #[tokio::test]
    async fn executes_and_parses_arguments() {
        let ex = executor(vec![Arc::new(EchoTool)], ExecutionStrategy::Sequential);
        let outcomes = ex
            .execute(&[call("c1", "echo", "{\"value\":\"hi\"}")])
            .await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.success);
        assert_eq!(outcomes[0].input["value"], "hi");
        assert_eq!(outcomes[0].result.data["value"], "hi");
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failed_result() {
        let ex = executor(vec![Arc::new(EchoTool)], ExecutionStrategy::Sequential);
        let outcomes = ex.execute(&[call("c1", "ghost", "{}")]).await;
        assert!(!outcomes[0].result.success);
        assert_eq!(
            outcomes[0].result.metadata_value("error_name"),
            Some(&Value::String("tool_not_found".into()))
        );
    }

    #[tokio::test]
    async fn bad_arguments_are_a_failed_result() {
        let ex = executor(vec![Arc::new(EchoTool)], ExecutionStrategy::Sequential);
        let outcomes = ex.execute(&[call("c1", "echo", "{broken")]).await;
        assert!(!outcomes[0].result.success);
        assert_eq!(
            outcomes[0].result.metadata_value("error_name"),
            Some(&Value::String("validation_error".into()))
        );
    }

    #[tokio::test]
    async fn panicking_tool_still_produces_an_outcome() {
        let ex = executor(
            vec![Arc::new(EchoTool), Arc::new(PanicTool)],
            ExecutionStrategy::Parallel,
        );
        let outcomes = ex
            .execute(&[call("c1", "boom", "{}"), call("c2", "echo", "{}")])
            .await;
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].result.success);
        assert!(outcomes[1].result.success);
    }

    #[tokio::test]
    async fn parallel_results_match_input_order() {
        let ex = executor(
            vec![Arc::new(SlowTool(40)), Arc::new(SlowTool(1))],
            ExecutionStrategy::Parallel,
        );
        let outcomes = ex
            .execute(&[call("c1", "slow_40", "{}"), call("c2", "slow_1", "{}")])
            .await;
        assert_eq!(outcomes[0].tool_call_id, "c1");
        assert_eq!(outcomes[1].tool_call_id, "c2");
    }

    #[tokio::test]
    async fn sequential_failure_does_not_halt_batch() {
        let ex = executor(vec![Arc::new(EchoTool)], ExecutionStrategy::Sequential);
        let outcomes = ex
            .execute(&[
                call("c1", "missing", "{}"),
                call("c2", "echo", "{\"value\":1}"),
            ])
            .await;
        assert!(!outcomes[0].result.success);
        assert!(outcomes[1].result.success);
    }

    #[tokio::test]
    async fn empty_arguments_become_empty_object() {
        let ex = executor(vec![Arc::new(EchoTool)], ExecutionStrategy::Sequential);
        let outcomes = ex.execute(&[call("c1", "echo", "")]).await;
        assert!(outcomes[0].result.success);
        assert_eq!(outcomes[0].input, serde_json::json!({}));
    }
}
